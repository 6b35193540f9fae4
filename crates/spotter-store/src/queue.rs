//! Ordered buffer of messages that failed to persist.
//!
//! Entries are kept in enqueue order.  Only per-conversation order is
//! meaningful; the flush driver replays each conversation's entries FIFO.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use spotter_shared::{CanonicalId, ConversationId, MessageId};

use crate::models::OfflineQueueEntry;

/// Outcome of one flush run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushResult {
    /// Entries persisted and removed during the run.
    pub flushed: usize,
    /// Entries whose replay failed (they stay queued).
    pub failed: usize,
    /// Queue length when the run finished.
    pub remaining: usize,
}

#[derive(Debug, Default)]
pub struct OfflineQueue {
    entries: VecDeque<OfflineQueueEntry>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.  An entry for the same message is refreshed in place
    /// (snapshot replaced, attempts bumped) so it keeps its position.
    ///
    /// Returns the stored entry.
    pub fn enqueue(&mut self, entry: OfflineQueueEntry) -> &OfflineQueueEntry {
        if let Some(pos) = self.position(entry.id()) {
            let existing = &mut self.entries[pos];
            existing.attempts = existing.attempts.saturating_add(1);
            existing.message = entry.message;
            debug!(id = %existing.message.id, attempts = existing.attempts, "Refreshed queued message");
            return &self.entries[pos];
        }
        debug!(id = %entry.id(), conversation = %entry.conversation_id(), "Queued message");
        self.entries.push_back(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<OfflineQueueEntry> {
        let pos = self.position(id)?;
        self.entries.remove(pos)
    }

    pub fn get(&self, id: &MessageId) -> Option<&OfflineQueueEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.position(id).is_some()
    }

    /// All entries in enqueue order.
    pub fn peek_all(&self) -> Vec<&OfflineQueueEntry> {
        self.entries.iter().collect()
    }

    pub fn entries_for(&self, conversation: &ConversationId) -> Vec<&OfflineQueueEntry> {
        self.entries
            .iter()
            .filter(|e| e.conversation_id() == conversation)
            .collect()
    }

    /// Oldest entry of `conversation`.
    pub fn next_for(&self, conversation: &ConversationId) -> Option<&OfflineQueueEntry> {
        self.entries
            .iter()
            .find(|e| e.conversation_id() == conversation)
    }

    /// Conversations with queued entries, in order of their oldest entry.
    pub fn conversations(&self) -> Vec<ConversationId> {
        let mut out: Vec<ConversationId> = Vec::new();
        for e in &self.entries {
            if !out.contains(e.conversation_id()) {
                out.push(e.conversation_id().clone());
            }
        }
        out
    }

    /// Point queued replies at the canonical id of a reconciled message.
    ///
    /// Returns the ids of the rewritten entries.
    pub fn rewrite_reply_refs(
        &mut self,
        provisional: &MessageId,
        canonical: &CanonicalId,
    ) -> Vec<MessageId> {
        let mut touched = Vec::new();
        for e in self.entries.iter_mut() {
            if e.message.reply_to.as_ref() == Some(provisional) {
                e.message.reply_to = Some(MessageId::Canonical(canonical.clone()));
                touched.push(e.message.id.clone());
            }
        }
        touched
    }

    /// Detach queued replies from a message that was deleted.
    pub fn clear_reply_refs(&mut self, target: &MessageId) -> Vec<MessageId> {
        let mut touched = Vec::new();
        for e in self.entries.iter_mut() {
            if e.message.reply_to.as_ref() == Some(target) {
                e.message.reply_to = None;
                touched.push(e.message.id.clone());
            }
        }
        touched
    }

    /// Replace the text of a queued message after a local edit.
    pub fn update_text(&mut self, id: &MessageId, text: &str) -> bool {
        match self.position(id) {
            Some(pos) => {
                let m = &mut self.entries[pos].message;
                m.text = text.to_string();
                m.is_edited = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == id)
    }
}
