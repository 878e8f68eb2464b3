use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Transport dropped or unreachable. Retried with bounded backoff.
    #[error("connection failed: {0}")]
    Connectivity(String),

    /// Row-level permission denial. Never retried.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The operation was not attempted.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl ChatError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Backend(_))
    }

    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(body),
            StatusCode::NOT_FOUND => Self::NotFound(body),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Self::Validation(body),
            _ => Self::Backend(format!("{}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status, err.to_string());
        }
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::Connectivity(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connectivity(err.to_string())
    }
}
