//! Error kinds shared by every handler.
//!
//! The set is deliberately closed: callers branch on the kind to decide
//! whether a failure is terminal (bad configuration, bad input) or came
//! from a collaborator and may succeed on a later attempt.

use axum::http::StatusCode;
use thiserror::Error;

/// Result alias used across the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required setting is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller sent something we cannot act on.
    #[error("{0}")]
    Validation(String),

    /// A managed collaborator (knowledge base, model, blob store, ...) failed.
    ///
    /// `status` carries the HTTP status the collaborator answered with, when
    /// there was one.
    #[error("{service} request failed: {message}")]
    Upstream {
        service: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Writing to or reading from the conversation store failed.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            status: None,
            message: message.into(),
        }
    }

    pub fn upstream_status(service: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Whether repeating the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Persistence(_))
    }

    /// HTTP status a handler should answer with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Upstream {
                status: Some(404), ..
            } => StatusCode::NOT_FOUND,
            Self::Upstream {
                status: Some(401 | 403),
                ..
            } => StatusCode::FORBIDDEN,
            Self::Upstream { .. } | Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream {
            service: "http",
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}
