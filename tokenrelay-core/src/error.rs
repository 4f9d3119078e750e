//! Error types.
//!
//! [`ApiError`] is what callers of the request pipeline see.
//! [`TokenRelayError`] wraps every error the crate can produce.

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;
use crate::refresh::RefreshFailure;
use crate::store::StoreError;

/// Maximum length for error response bodies kept in [`ApiError::Server`].
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Failure of a call made through the pipeline.
///
/// An expired access credential never shows up here: it is handled by the
/// refresh protocol and only surfaces as [`ApiError::SessionTerminated`] if
/// the refresh fails too.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No response was received (offline, DNS, connection reset, timeout).
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// A response arrived with a failure status.
    #[error("server returned {status}: {body}")]
    Server { status: StatusCode, body: String },

    /// The session could not be renewed. Stored credentials have been
    /// cleared; the user must authenticate again.
    #[error("session terminated: {reason}")]
    SessionTerminated { reason: RefreshFailure },

    /// Credentials could not be persisted under
    /// [`PersistencePolicy::Strict`](crate::PersistencePolicy::Strict).
    #[error("failed to persist credentials: {0}")]
    Storage(#[from] StoreError),

    /// The response body was not what the endpoint promises.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// The request could not be built (bad path or body).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        Self::Server {
            status,
            body: truncate_body(body),
        }
    }

    /// The one error the surrounding application must react to by forcing
    /// re-authentication.
    pub fn is_session_terminated(&self) -> bool {
        matches!(self, Self::SessionTerminated { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Network(e) if e.is_timeout())
    }

    /// Status code of a [`ApiError::Server`] error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<RefreshFailure> for ApiError {
    fn from(reason: RefreshFailure) -> Self {
        Self::SessionTerminated { reason }
    }
}

/// Truncate a response body to avoid logging excessive data.
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }

    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Top-level error type encompassing all errors of this crate.
#[derive(Debug, Error)]
pub enum TokenRelayError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
