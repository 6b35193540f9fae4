//! The chat backend as the engine consumes it.

use async_trait::async_trait;

use spotter_shared::protocol::{
    EditMessageRequest, PostMessageRequest, RoomSummary, RoomUpdate, ServerMessage,
};
use spotter_shared::{CanonicalId, ConversationId};

use crate::error::Result;

/// HTTP-style collaborator surface.
///
/// Implementations must be cheap to share behind an `Arc`; the engine calls
/// them from spawned tasks.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `GET /rooms`
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>>;

    /// `GET /rooms/{id}/messages`, oldest first.
    async fn room_messages(&self, room: &ConversationId) -> Result<Vec<ServerMessage>>;

    /// `POST /messages`; the response carries the canonical id.
    async fn post_message(&self, request: &PostMessageRequest) -> Result<ServerMessage>;

    /// `PUT /rooms/{id}`
    async fn update_room(&self, room: &ConversationId, update: &RoomUpdate) -> Result<()>;

    /// `PUT /messages/{id}`
    async fn edit_message(&self, id: &CanonicalId, edit: &EditMessageRequest) -> Result<()>;

    /// `DELETE /messages/{id}`
    async fn delete_message(&self, id: &CanonicalId) -> Result<()>;

    /// `GET /health`
    async fn health(&self) -> Result<()>;
}
