use spotter_shared::MessageId;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error from the queue journal.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the journal directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A message with this id is already in the store.
    #[error("Duplicate message id: {0}")]
    DuplicateMessageId(MessageId),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Snapshot (de)serialization failure.
    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
