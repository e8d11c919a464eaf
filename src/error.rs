use std::time::Duration;

use crate::config::ConfigError;

/// Error type shared by every stage of an exchange.
///
/// None of these are retried internally; [`ClientError::is_retryable`] is a
/// hint for callers that want to implement their own policy.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("{code}: {message}")]
    SessionCreationFailed { code: String, message: String },
    #[error("InvalidSession: {0}")]
    SessionInvalid(String),
    #[error("{code}: {message}")]
    GenerationError { code: String, message: String },
    #[error("No message was generated.")]
    EmptyResponse,
    #[error("Unexpected message author: {0}")]
    UnexpectedAuthor(String),
    #[error("Timed out waiting for response after {0:?}")]
    Timeout(Duration),
    #[error("Request aborted")]
    Aborted,
    #[error("Stream closed before the response completed")]
    StreamClosed,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category, used for logging and retry hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Session,
    Generation,
    Deadline,
    Cancelled,
    Transport,
    Local,
}

impl ClientError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::SessionCreationFailed { .. } | ClientError::SessionInvalid(_) => {
                ErrorCategory::Session
            }
            ClientError::GenerationError { .. }
            | ClientError::EmptyResponse
            | ClientError::UnexpectedAuthor(_) => ErrorCategory::Generation,
            ClientError::Timeout(_) => ErrorCategory::Deadline,
            ClientError::Aborted => ErrorCategory::Cancelled,
            ClientError::StreamClosed | ClientError::Transport(_) => ErrorCategory::Transport,
            ClientError::Config(_) | ClientError::Cache(_) | ClientError::Internal(_) => {
                ErrorCategory::Local
            }
        }
    }

    /// Whether repeating the same call could plausibly succeed.
    ///
    /// An invalid session is retryable only with a fresh session, which the
    /// client obtains automatically when the caller drops the stale one.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout(_)
                | ClientError::StreamClosed
                | ClientError::Transport(_)
                | ClientError::SessionInvalid(_)
        )
    }
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(format!("WebSocket error: {err}"))
    }
}
