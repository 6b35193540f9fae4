use thiserror::Error;

/// Failures talking to the chat backend.
#[derive(Error, Debug)]
pub enum NetError {
    /// Transport-level failure (DNS, TLS, connection reset, ...).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("Malformed response: {0}")]
    Decode(String),

    /// Request did not complete in time.
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The backend is unreachable (used by the fake and by offline short-circuits).
    #[error("Backend unreachable")]
    Unreachable,

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),
}

impl NetError {
    /// Whether retrying later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NetError::Transport(_) | NetError::Timeout(_) | NetError::Unreachable => true,
            NetError::Status { status, .. } => *status >= 500 || *status == 429,
            NetError::Decode(_) | NetError::InvalidUrl(_) => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetError>;
