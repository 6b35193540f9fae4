//! REST wire DTOs exchanged with the chat backend.
//!
//! Field names follow the backend's camelCase JSON.  These types are the
//! boundary between the engine and the HTTP collaborator; the engine's own
//! models live in `spotter-store`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CanonicalId, ConversationId, MessageType};

/// Entry of `GET /rooms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: ConversationId,
    pub name: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_blocked: bool,
}

/// Metadata of an attached payload (image, video, file, voice note).
///
/// Upload itself happens elsewhere; the engine only carries the result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A message as the server knows it (history entries and `POST /messages`
/// responses).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub id: CanonicalId,
    pub room_id: ConversationId,
    pub sender_id: String,
    #[serde(default)]
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_meta: Option<FileMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<CanonicalId>,
    #[serde(default)]
    pub is_edited: bool,
}

/// Body of `POST /messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub text: String,
    pub room_id: ConversationId,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_meta: Option<FileMeta>,
    /// Only ever a canonical id; replies to unconfirmed messages are local.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<CanonicalId>,
}

/// Body of `PUT /rooms/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdate {
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
}

/// Body of `PUT /messages/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageRequest {
    pub text: String,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_body_uses_backend_field_names() {
        let req = PostMessageRequest {
            text: "Leg day moved to Thursday".into(),
            room_id: ConversationId::new("r1"),
            sender_id: "coach".into(),
            timestamp: DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            message_type: MessageType::Text,
            file_meta: None,
            reply_to_id: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["roomId"], "r1");
        assert_eq!(json["senderId"], "coach");
        assert_eq!(json["type"], "text");
        assert!(json.get("fileMeta").is_none());
    }

    #[test]
    fn server_message_tolerates_missing_optionals() {
        let raw = r#"{
            "id": "m-9",
            "roomId": "r1",
            "senderId": "client-42",
            "text": "done!",
            "timestamp": "2026-03-01T10:00:05Z"
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.id, CanonicalId::new("m-9"));
        assert_eq!(msg.message_type, MessageType::Text);
        assert!(msg.file_meta.is_none());
        assert!(!msg.is_edited);
    }
}
