//! Error taxonomy shared by the poll, stream and hydration paths.
//!
//! None of these ever reach the Reconciler: each is captured into the state
//! of the subscription or stream buffer that owns it.

use thiserror::Error;

/// HTTP statuses recognised as a temporary backend outage.
pub const TRANSIENT_STATUSES: [u16; 3] = [502, 503, 504];

/// Failure of a request/response fetch (poll snapshot or detail lookup).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Recognised outage signal (502/503/504 class).
    #[error("service unavailable (status {status})")]
    Unavailable { status: u16 },

    #[error("not found")]
    NotFound,

    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if TRANSIENT_STATUSES.contains(&status) {
            Self::Unavailable { status }
        } else if status == 404 {
            Self::NotFound
        } else {
            Self::Http {
                status,
                message: message.into(),
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Failure on a push connection or inside one of its frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream transport error: {0}")]
    Transport(String),

    /// Undecodable event body. The event is dropped, nothing else changes.
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("unknown event kind: {0}")]
    UnknownEvent(String),
}
