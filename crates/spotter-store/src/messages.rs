//! Ordered per-conversation message log.
//!
//! Messages live in an arena of slots.  `index` maps every live id to its
//! slot, `order` holds each conversation's slots in insertion order, and
//! `replies` maps a reply target id to the slots that point at it.  Rewriting
//! a provisional id to its canonical form therefore only touches the side
//! maps and the affected slots, never the whole store.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use spotter_shared::{CanonicalId, ConversationId, MessageId, MessageStatus};

use crate::error::{Result, StoreError};
use crate::models::Message;
use crate::status::{progress, StatusChange};

type Slot = usize;

/// What a reconciliation did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The provisional message now carries the canonical id.
    Rewritten,
    /// The canonical id was already present; that copy was dropped in favour
    /// of the local message.
    Merged,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    slots: Vec<Option<Message>>,
    index: HashMap<MessageId, Slot>,
    order: HashMap<ConversationId, Vec<Slot>>,
    replies: HashMap<MessageId, Vec<Slot>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail of the message's conversation.
    pub fn append(&mut self, message: Message) -> Result<()> {
        if self.index.contains_key(&message.id) {
            return Err(StoreError::DuplicateMessageId(message.id));
        }
        let slot = self.slots.len();
        self.index.insert(message.id.clone(), slot);
        self.order
            .entry(message.conversation_id.clone())
            .or_default()
            .push(slot);
        if let Some(target) = &message.reply_to {
            self.replies.entry(target.clone()).or_default().push(slot);
        }
        self.slots.push(Some(message));
        Ok(())
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let slot = *self.index.get(id)?;
        self.slots.get(slot)?.as_ref()
    }

    /// Mutable access to everything except identity and ordering.
    ///
    /// Callers must not change `id`, `conversation_id` or `reply_to` through
    /// this handle; use [`reconcile`](Self::reconcile) for identity changes.
    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        let slot = *self.index.get(id)?;
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Messages of one conversation in insertion order.
    pub fn conversation(&self, conversation: &ConversationId) -> Vec<&Message> {
        self.order
            .get(conversation)
            .map(|slots| {
                slots
                    .iter()
                    .filter_map(|s| self.slots.get(*s).and_then(Option::as_ref))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn last_message(&self, conversation: &ConversationId) -> Option<&Message> {
        self.order
            .get(conversation)?
            .iter()
            .rev()
            .find_map(|s| self.slots.get(*s).and_then(Option::as_ref))
    }

    pub fn len(&self, conversation: &ConversationId) -> usize {
        self.order.get(conversation).map(Vec::len).unwrap_or(0)
    }

    /// Whether `id` is a message of `conversation`.
    pub fn belongs_to(&self, id: &MessageId, conversation: &ConversationId) -> bool {
        self.get(id)
            .is_some_and(|m| &m.conversation_id == conversation)
    }

    /// Apply a status through the progression rules.
    pub fn set_status(&mut self, id: &MessageId, target: MessageStatus) -> Option<StatusChange> {
        let message = self.get_mut(id)?;
        let change = progress(message.status, target);
        match change {
            StatusChange::Applied { to, .. } => message.status = to,
            StatusChange::Rejected { from, to } => {
                debug!(id = %id, %from, %to, "Ignoring out-of-order status update");
            }
            StatusChange::Unchanged => {}
        }
        Some(change)
    }

    /// Rewrite `provisional` to `canonical` in place.
    ///
    /// Returns `None` when the provisional id is no longer in the store.
    pub fn reconcile(
        &mut self,
        provisional: &MessageId,
        canonical: &CanonicalId,
        confirmed_at: DateTime<Utc>,
    ) -> Option<Reconciled> {
        let slot = self.index.remove(provisional)?;
        let new_id = MessageId::Canonical(canonical.clone());

        // The server may already have pushed its copy to us.  The local slot
        // wins: it holds the position and the local state.
        let outcome = match self.index.get(&new_id).copied() {
            Some(pushed) if pushed != slot => {
                self.drop_slot(pushed);
                Reconciled::Merged
            }
            _ => Reconciled::Rewritten,
        };
        let message = self.slots.get_mut(slot)?.as_mut()?;
        message.id = new_id.clone();
        message.confirmed_at = Some(confirmed_at);
        self.index.insert(new_id.clone(), slot);

        if let Some(referrers) = self.replies.remove(provisional) {
            for s in &referrers {
                if let Some(Some(m)) = self.slots.get_mut(*s) {
                    m.reply_to = Some(new_id.clone());
                }
            }
            self.replies.entry(new_id).or_default().extend(referrers);
        }
        Some(outcome)
    }

    /// Remove a message.  Replies to it lose their reply target.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let slot = self.index.remove(id)?;
        let removed = self.drop_slot(slot);
        if let Some(referrers) = self.replies.remove(id) {
            for s in referrers {
                if let Some(Some(m)) = self.slots.get_mut(s) {
                    m.reply_to = None;
                }
            }
        }
        removed
    }

    /// Merge a server history page for one conversation.
    ///
    /// Resulting order is the server's history order, followed by every local
    /// message the history does not contain, in its existing order.  Known
    /// messages keep their local state (status, reactions, pin).
    pub fn merge_history(&mut self, conversation: &ConversationId, history: Vec<Message>) {
        let mut seen: HashSet<Slot> = HashSet::new();
        let mut new_order = Vec::with_capacity(history.len());

        for message in history {
            if message.conversation_id != *conversation {
                continue;
            }
            match self.index.get(&message.id) {
                Some(&slot) => {
                    if seen.insert(slot) {
                        new_order.push(slot);
                    }
                }
                None => {
                    let slot = self.slots.len();
                    self.index.insert(message.id.clone(), slot);
                    if let Some(target) = &message.reply_to {
                        self.replies.entry(target.clone()).or_default().push(slot);
                    }
                    self.slots.push(Some(message));
                    seen.insert(slot);
                    new_order.push(slot);
                }
            }
        }

        if let Some(existing) = self.order.get(conversation) {
            new_order.extend(existing.iter().filter(|s| !seen.contains(s)));
        }
        self.order.insert(conversation.clone(), new_order);
    }

    fn drop_slot(&mut self, slot: Slot) -> Option<Message> {
        let message = self.slots.get_mut(slot)?.take()?;
        if let Some(slots) = self.order.get_mut(&message.conversation_id) {
            slots.retain(|s| *s != slot);
        }
        if let Some(target) = &message.reply_to {
            if let Some(referrers) = self.replies.get_mut(target) {
                referrers.retain(|s| *s != slot);
            }
        }
        Some(message)
    }
}
