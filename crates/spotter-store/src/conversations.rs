//! Conversation list with aggregate metadata.
//!
//! Entries are created when the room list is first loaded (or when a message
//! names an unknown conversation) and are never removed; archival is a flag.

use std::collections::HashMap;

use tracing::debug;

use spotter_shared::protocol::RoomSummary;
use spotter_shared::{ConversationId, SenderRole};

use crate::models::{Conversation, Message};

#[derive(Debug, Default)]
pub struct ConversationDirectory {
    conversations: HashMap<ConversationId, Conversation>,
}

impl ConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh from a `GET /rooms` entry.
    ///
    /// Local unread counts are kept when they are higher than the server's,
    /// since messages may have arrived after the server computed its count.
    pub fn upsert_summary(&mut self, summary: RoomSummary) {
        match self.conversations.get_mut(&summary.id) {
            Some(existing) => {
                let unread = existing.unread_count.max(summary.unread_count);
                let keep_newer_preview = match (existing.last_message_at, summary.last_message_at) {
                    (Some(local), Some(remote)) => local > remote,
                    (Some(_), None) => true,
                    _ => false,
                };
                let (preview, at) = (
                    existing.last_message_preview.take(),
                    existing.last_message_at,
                );
                *existing = Conversation::from(summary);
                existing.unread_count = unread;
                if keep_newer_preview {
                    existing.last_message_preview = preview;
                    existing.last_message_at = at;
                }
            }
            None => {
                debug!(conversation = %summary.id, "Adding conversation to directory");
                self.conversations
                    .insert(summary.id.clone(), Conversation::from(summary));
            }
        }
    }

    /// Make sure an entry exists, named after its id if nothing better is known.
    pub fn ensure(&mut self, id: &ConversationId) -> &mut Conversation {
        self.conversations
            .entry(id.clone())
            .or_insert_with(|| Conversation::new(id.clone(), id.as_str()))
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Fold a newly visible message into the aggregates.
    ///
    /// Counterpart messages bump the unread count unless the conversation is
    /// focused.
    pub fn record_message(&mut self, message: &Message, focused: bool) {
        let conv = self.ensure(&message.conversation_id);
        let newer = conv
            .last_message_at
            .map_or(true, |at| message.created_at >= at);
        if newer {
            conv.last_message_preview = Some(message.preview());
            conv.last_message_at = Some(message.created_at);
        }
        if message.sender_role == SenderRole::Counterpart && !focused {
            conv.unread_count = conv.unread_count.saturating_add(1);
        }
    }

    /// Recompute the preview from whatever message is now last.
    pub fn refresh_preview(&mut self, id: &ConversationId, last: Option<&Message>) {
        if let Some(conv) = self.conversations.get_mut(id) {
            conv.last_message_preview = last.map(Message::preview);
            conv.last_message_at = last.map(|m| m.created_at);
        }
    }

    pub fn clear_unread(&mut self, id: &ConversationId) {
        if let Some(conv) = self.conversations.get_mut(id) {
            conv.unread_count = 0;
        }
    }

    pub fn set_online(&mut self, id: &ConversationId, online: bool) {
        self.ensure(id).is_online = online;
    }

    pub fn set_archived(&mut self, id: &ConversationId, archived: bool) {
        self.ensure(id).is_archived = archived;
    }

    pub fn set_blocked(&mut self, id: &ConversationId, blocked: bool) {
        self.ensure(id).is_blocked = blocked;
    }

    pub fn is_blocked(&self, id: &ConversationId) -> bool {
        self.conversations.get(id).is_some_and(|c| c.is_blocked)
    }

    /// Most recently active first; archived entries only when asked for.
    pub fn list(&self, include_archived: bool) -> Vec<&Conversation> {
        let mut out: Vec<&Conversation> = self
            .conversations
            .values()
            .filter(|c| include_archived || !c.is_archived)
            .collect();
        out.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        out
    }
}
