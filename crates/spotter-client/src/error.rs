use std::time::Duration;

use thiserror::Error;

use spotter_net::NetError;
use spotter_shared::ValidationError;

/// Errors returned by [`EngineHandle`](crate::engine::EngineHandle) calls.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Backend error: {0}")]
    Backend(#[from] NetError),

    /// The engine task is gone (shut down or panicked).
    #[error("Engine is not running")]
    Stopped,
}

/// Why a persistence attempt did not produce a canonical id.
///
/// Never returned to UI control flow; it is folded into message status and
/// queue state and reported through the notifier.
#[derive(Error, Debug)]
pub enum PersistenceFailure {
    #[error("offline")]
    Offline,

    #[error("no response after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Backend(#[from] NetError),

    /// A reply was held back because the message it answers has not been
    /// persisted yet.
    #[error("reply target not persisted yet")]
    ParentUnsent,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
