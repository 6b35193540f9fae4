//! # spotter-store
//!
//! Synchronous state stores backing the chat sync engine.
//!
//! Every store here is a plain owned struct mutated through `&mut self`; the
//! engine actor in `spotter-client` is the single owner, so none of them carry
//! locks.  The optional [`Database`] journal mirrors the offline queue to
//! SQLite so queued messages survive a restart.

pub mod conversations;
pub mod database;
pub mod drafts;
pub mod journal;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod queue;
pub mod reactions;
pub mod status;

mod error;

pub use conversations::ConversationDirectory;
pub use database::Database;
pub use drafts::DraftStore;
pub use error::StoreError;
pub use messages::MessageStore;
pub use models::*;
pub use queue::{FlushResult, OfflineQueue};
pub use reactions::ReactionSet;
pub use status::{progress, StatusChange};
