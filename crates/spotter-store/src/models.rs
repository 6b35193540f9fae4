//! Domain models held by the stores.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer and written into the queue journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use spotter_shared::protocol::{FileMeta, RoomSummary, ServerMessage};
use spotter_shared::{
    CanonicalId, ConversationId, MessageId, MessageStatus, MessageType, SenderRole,
    ValidationError,
};

use crate::reactions::ReactionSet;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message as the UI sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Provisional until the server confirms it, canonical afterwards.
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_role: SenderRole,
    /// Backend user id of the author.
    pub sender_id: String,
    pub text: String,
    /// Client-side creation time; never rewritten by reconciliation.
    pub created_at: DateTime<Utc>,
    /// Server timestamp from the persistence response.
    pub confirmed_at: Option<DateTime<Utc>>,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub reply_to: Option<MessageId>,
    pub attachment: Option<FileMeta>,
    pub reactions: ReactionSet,
    pub is_pinned: bool,
    pub is_edited: bool,
}

impl Message {
    /// Build a message from a server record.
    ///
    /// `self_id` decides the sender role; `status` is what the server record
    /// implies for this client (history is at least `sent`).
    pub fn from_server(server: &ServerMessage, self_id: &str, status: MessageStatus) -> Self {
        let sender_role = if server.sender_id == self_id {
            SenderRole::Own
        } else {
            SenderRole::Counterpart
        };
        Self {
            id: MessageId::Canonical(server.id.clone()),
            conversation_id: server.room_id.clone(),
            sender_role,
            sender_id: server.sender_id.clone(),
            text: server.text.clone(),
            created_at: server.timestamp,
            confirmed_at: Some(server.timestamp),
            message_type: server.message_type,
            status,
            reply_to: server.reply_to_id.clone().map(MessageId::Canonical),
            attachment: server.file_meta.clone(),
            reactions: ReactionSet::default(),
            is_pinned: false,
            is_edited: server.is_edited,
        }
    }

    pub fn is_own(&self) -> bool {
        self.sender_role == SenderRole::Own
    }

    /// Canonical reply target, if the message replies to a confirmed one.
    pub fn canonical_reply_to(&self) -> Option<CanonicalId> {
        self.reply_to.as_ref().and_then(|r| r.as_canonical().cloned())
    }

    /// Short text used for the conversation list.
    pub fn preview(&self) -> String {
        let base = if self.text.trim().is_empty() {
            match self.message_type {
                MessageType::Text => String::new(),
                MessageType::Image => "[image]".to_string(),
                MessageType::Video => "[video]".to_string(),
                MessageType::File => "[file]".to_string(),
                MessageType::Voice => "[voice note]".to_string(),
            }
        } else {
            self.text.trim().to_string()
        };
        let max = spotter_shared::constants::PREVIEW_MAX_CHARS;
        if base.chars().count() > max {
            let mut cut: String = base.chars().take(max).collect();
            cut.push('…');
            cut
        } else {
            base
        }
    }
}

// ---------------------------------------------------------------------------
// Outgoing content
// ---------------------------------------------------------------------------

/// What the UI hands to `submit`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingContent {
    pub text: String,
    pub message_type: MessageType,
    pub attachment: Option<FileMeta>,
    pub reply_to: Option<MessageId>,
}

impl OutgoingContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_attachment(message_type: MessageType, attachment: FileMeta) -> Self {
        Self {
            message_type,
            attachment: Some(attachment),
            ..Self::default()
        }
    }

    pub fn replying_to(mut self, id: MessageId) -> Self {
        self.reply_to = Some(id);
        self
    }

    /// Non-empty text or an attached payload; media types need the payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.message_type.is_media() && self.attachment.is_none() {
            return Err(ValidationError::MissingPayload(self.message_type));
        }
        if self.text.trim().is_empty() && self.attachment.is_none() {
            return Err(ValidationError::EmptyContent);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A conversation entry in the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    pub display_name: String,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub is_online: bool,
    pub is_archived: bool,
    pub is_blocked: bool,
}

impl Conversation {
    pub fn new(id: ConversationId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            last_message_preview: None,
            last_message_at: None,
            unread_count: 0,
            is_online: false,
            is_archived: false,
            is_blocked: false,
        }
    }
}

impl From<RoomSummary> for Conversation {
    fn from(r: RoomSummary) -> Self {
        Self {
            id: r.id,
            display_name: r.name,
            last_message_preview: r.last_message,
            last_message_at: r.last_message_at,
            unread_count: r.unread_count,
            is_online: r.is_online,
            is_archived: r.is_archived,
            is_blocked: r.is_blocked,
        }
    }
}

/// Directory entry joined with the conversation's current draft.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSnapshot {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub draft: String,
}

// ---------------------------------------------------------------------------
// Offline queue entry
// ---------------------------------------------------------------------------

/// A message whose persistence failed, waiting for a replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfflineQueueEntry {
    pub message: Message,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

impl OfflineQueueEntry {
    pub fn new(message: Message, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            message,
            enqueued_at,
            attempts: 1,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.message.id
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.message.conversation_id
    }
}
