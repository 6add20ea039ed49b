// crates/client/src/error.rs
use std::time::Duration;

use noisescope_core::ValidationError;
use thiserror::Error;

/// The duplex channel to the worker failed. The session ends in `Errored`
/// and is never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("could not connect to worker: {0}")]
    Connect(String),

    #[error("worker did not accept the connection within {0:?}")]
    ConnectTimeout(Duration),

    #[error("stream dropped: {0}")]
    Dropped(String),

    #[error("worker closed the stream before reporting done")]
    ClosedEarly,

    #[error("worker reported an error: {0}")]
    Worker(String),

    #[error("could not encode job: {0}")]
    Encode(String),

    #[error("stream task exited: {0}")]
    TaskExited(String),
}

/// Errors surfaced to callers of the client API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Streaming error: {0}")]
    Transport(#[from] TransportError),

    #[error("Worker returned {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected response from worker: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

impl ClientError {
    /// True when the caller supplied bad input and nothing was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Worker("out of memory".into());
        assert!(err.to_string().contains("out of memory"));
        let err = TransportError::ConnectTimeout(Duration::from_secs(5));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_validation_wraps() {
        let err: ClientError = ValidationError::EmptyImage.into();
        assert!(err.is_validation());
        assert!(err.to_string().starts_with("Validation failed"));
    }

    #[test]
    fn test_http_error_display() {
        let err = ClientError::Http {
            status: 400,
            detail: "Diffusion failed: bad image".into(),
        };
        assert_eq!(err.to_string(), "Worker returned 400: Diffusion failed: bad image");
    }
}
