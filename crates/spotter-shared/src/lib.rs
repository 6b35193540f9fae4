//! # spotter-shared
//!
//! Types shared by every crate of the trainer console's chat sync engine:
//! message and conversation identifiers, status / role / type enums, the
//! REST wire DTOs exchanged with the chat backend, and validation errors.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ValidationError;
pub use types::*;
