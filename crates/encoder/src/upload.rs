//! Upload transport
//!
//! Streams a file to a pre-signed URL with a single PUT, reporting byte-level
//! progress and honouring cancellation between chunks.

use crate::config::UploadConfig;
use crate::events::ProgressFn;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Error type for upload operations
#[derive(Debug, Error)]
pub enum UploadError {
    /// Local file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection or protocol failure
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upload target rejected the body
    #[error("Failed to upload file: {status} {message}")]
    Status { status: u16, message: String },

    /// Cancellation observed before or during the stream
    #[error("aborted")]
    Aborted,
}

/// Byte-streaming transport to a pre-signed location
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// PUT the whole of `file` to `target`
    ///
    /// `on_progress` receives percent complete, only when bytes were sent.
    async fn upload(
        &self,
        target: &str,
        file: &Path,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<(), UploadError>;
}

/// reqwest-backed [`UploadTransport`]
#[derive(Debug, Clone)]
pub struct HttpUploader {
    http: reqwest::Client,
    chunk_size: usize,
    content_type: String,
}

impl HttpUploader {
    /// Create an uploader whose connections are never reused
    pub fn new(chunk_size: usize, content_type: impl Into<String>) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            http,
            chunk_size: chunk_size.max(1),
            content_type: content_type.into(),
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self, UploadError> {
        Self::new(config.chunk_size, config.content_type.clone())
    }
}

#[async_trait]
impl UploadTransport for HttpUploader {
    async fn upload(
        &self,
        target: &str,
        file: &Path,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<(), UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }

        let handle = File::open(file).await?;
        let total = handle.metadata().await?.len();
        debug!(file = %file.display(), bytes = total, "upload starting");

        let chunk_token = cancel.clone();
        let mut sent: u64 = 0;
        let stream = ReaderStream::with_capacity(handle, self.chunk_size).map(move |chunk| {
            if chunk_token.is_cancelled() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "aborted",
                ));
            }
            let chunk = chunk?;
            if !chunk.is_empty() && total > 0 {
                sent += chunk.len() as u64;
                on_progress((sent as f64 / total as f64 * 100.0).min(100.0));
            }
            Ok(chunk)
        });

        let request = self
            .http
            .put(target)
            .header(CONTENT_TYPE, &self.content_type)
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream))
            .send();

        let response = tokio::select! {
            response = request => response,
            _ = cancel.cancelled() => return Err(UploadError::Aborted),
        };

        let response = match response {
            Ok(response) => response,
            Err(_) if cancel.is_cancelled() => return Err(UploadError::Aborted),
            Err(e) => return Err(UploadError::Http(e)),
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(UploadError::Status {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        info!(file = %file.display(), bytes = total, %status, "upload finished");
        Ok(())
    }
}
