pub mod bluesky;
pub mod linkedin;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::payload::Payload;
use crate::types::{Credentials, Destination, PlatformKind, Result};

pub use bluesky::BlueskyPublisher;
pub use linkedin::LinkedInPublisher;
pub use telegram::TelegramPublisher;

/// Errors from a destination's publish capability. Transient errors are
/// retry-eligible; permanent ones (for example an invalid credential)
/// fail the record immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }

    /// Classify an HTTP status: rate limiting, timeouts and server errors may
    /// clear up on retry, other client errors will not.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        let message = format!("HTTP {status}: {body}");
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            PlatformError::Transient(message)
        } else {
            PlatformError::Permanent(message)
        }
    }

    /// Network-level failures (connect errors, timeouts) are transient.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => Self::from_status(status, error.to_string()),
            None => PlatformError::Transient(error.to_string()),
        }
    }
}

/// The single capability the dispatch engine needs from a platform:
/// publish a payload, get back the external post identifier.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn kind(&self) -> PlatformKind;

    async fn publish(&self, payload: &Payload) -> std::result::Result<String, PlatformError>;
}

/// Build the publisher for a configured destination. New platforms register
/// a credentials variant and a match arm here, not a subclass hierarchy.
pub fn build_publisher(destination: &Destination) -> Result<Arc<dyn Publisher>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    Ok(match &destination.credentials {
        Credentials::Telegram { token, chat_id } => Arc::new(TelegramPublisher::new(
            client,
            token.clone(),
            chat_id.clone(),
        )),
        Credentials::Bluesky {
            handle,
            password,
            service,
        } => Arc::new(BlueskyPublisher::new(
            client,
            handle.clone(),
            password.clone(),
            service.clone(),
        )),
        Credentials::Linkedin { urn, access_token } => Arc::new(LinkedInPublisher::new(
            client,
            urn.clone(),
            access_token.clone(),
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(PlatformError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(PlatformError::from_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(!PlatformError::from_status(StatusCode::UNAUTHORIZED, String::new()).is_transient());
        assert!(!PlatformError::from_status(StatusCode::BAD_REQUEST, String::new()).is_transient());
    }
}
