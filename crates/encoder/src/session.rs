//! Authenticated session supplied to each job at start time

use crate::config::{Config, EncodeOutputSpec};
use chrono::Utc;
use thiserror::Error;
use url::Url;

/// Error type for session resolution
#[derive(Debug, Error)]
pub enum SessionError {
    /// No access token or user id configured
    #[error("Not signed in: missing access token or user id")]
    MissingCredentials,

    /// Access token has expired
    #[error("Credentials expired")]
    Expired,

    /// Endpoint is not a valid absolute URL
    #[error("Invalid API endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },
}

/// Snapshot of the session and encode settings a job runs under
///
/// Read once when the job starts; later changes to the provider do not
/// affect a job already in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// API base URL, always ending in `/`
    pub endpoint: Url,
    /// Full `Authorization` header value
    pub authorization: String,
    pub user_id: String,
    /// Encode parameters and target container for this job
    pub output: EncodeOutputSpec,
}

impl Session {
    /// Build a session, normalising the endpoint so relative joins keep its path
    pub fn new(
        endpoint: &str,
        authorization: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let normalized = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{}/", endpoint)
        };
        let endpoint = Url::parse(&normalized).map_err(|source| SessionError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;

        Ok(Self {
            endpoint,
            authorization: authorization.into(),
            user_id: user_id.into(),
            output: EncodeOutputSpec::default(),
        })
    }

    pub fn with_output(mut self, output: EncodeOutputSpec) -> Self {
        self.output = output;
        self
    }
}

/// Source of the authenticated session
pub trait SessionProvider: Send + Sync {
    fn session(&self) -> Result<Session, SessionError>;
}

impl SessionProvider for Config {
    fn session(&self) -> Result<Session, SessionError> {
        if !self.credentials.is_present() {
            return Err(SessionError::MissingCredentials);
        }
        if self.credentials.is_expired(Utc::now()) {
            return Err(SessionError::Expired);
        }

        let session = Session::new(
            &self.api.endpoint,
            self.credentials.authorization(),
            self.credentials.user_id.clone(),
        )?;
        Ok(session.with_output(self.output.clone()))
    }
}

impl SessionProvider for Session {
    fn session(&self) -> Result<Session, SessionError> {
        Ok(self.clone())
    }
}
