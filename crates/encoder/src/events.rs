//! Job lifecycle events and the listener contract
//!
//! The controller emits [`JobEvent`]s over a channel; embedding applications
//! either consume the channel directly or adapt it to a [`JobListener`] with
//! [`dispatch_events`].

use crate::publish::RemoteVideo;
use serde::Serialize;
use tokio::sync::mpsc;

/// Progress callback handed to the transcoder and upload transport
pub type ProgressFn = Box<dyn Fn(f64) + Send + Sync>;

/// Lifecycle event of a single job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Started { id: String },
    EncodeProgress { id: String, percent: f64 },
    UploadProgress { id: String, percent: f64 },
    UploadComplete { id: String, record: RemoteVideo },
    Failed { id: String, message: String },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Started { id }
            | JobEvent::EncodeProgress { id, .. }
            | JobEvent::UploadProgress { id, .. }
            | JobEvent::UploadComplete { id, .. }
            | JobEvent::Failed { id, .. } => id,
        }
    }

    /// Whether this is the last event of its job
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::UploadComplete { .. } | JobEvent::Failed { .. }
        )
    }
}

/// Callback-style consumer of job events
pub trait JobListener: Send {
    fn on_start(&mut self, id: &str);
    fn on_progress(&mut self, id: &str, percent: f64);
    fn on_upload_progress(&mut self, id: &str, percent: f64);
    fn on_upload_complete(&mut self, id: &str, record: &RemoteVideo);
    fn on_error(&mut self, id: &str, message: &str);
}

/// Forward every event from `events` to `listener` until the channel closes
pub async fn dispatch_events<L: JobListener>(
    mut events: mpsc::UnboundedReceiver<JobEvent>,
    listener: &mut L,
) {
    while let Some(event) = events.recv().await {
        deliver(&event, listener);
    }
}

/// Deliver one event to the matching listener callback
pub fn deliver<L: JobListener + ?Sized>(event: &JobEvent, listener: &mut L) {
    match event {
        JobEvent::Started { id } => listener.on_start(id),
        JobEvent::EncodeProgress { id, percent } => listener.on_progress(id, *percent),
        JobEvent::UploadProgress { id, percent } => listener.on_upload_progress(id, *percent),
        JobEvent::UploadComplete { id, record } => listener.on_upload_complete(id, record),
        JobEvent::Failed { id, message } => listener.on_error(id, message),
    }
}
