//! Single-owner chat state and its transitions.
//!
//! [`ChatState`] bundles every store the engine mutates.  Each `apply_*`
//! method is one synchronous step: it validates, mutates and returns what
//! changed, so the engine only has to translate results into events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use spotter_shared::protocol::{RoomSummary, ServerMessage};
use spotter_shared::{
    ConversationId, MessageId, MessageStatus, ProvisionalId, SenderRole, ValidationError,
};
use spotter_store::messages::Reconciled;
use spotter_store::{
    ConversationDirectory, ConversationSnapshot, DraftStore, Message, MessageStore,
    OfflineQueue, OfflineQueueEntry, OutgoingContent, ReactionSet, StatusChange, StoreError,
};

/// Result of [`ChatState::apply_reconciliation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Applied {
        conversation_id: ConversationId,
        canonical: MessageId,
        /// The server's pushed copy was already present and has been folded
        /// into the local message.
        merged: bool,
        /// Queued entries whose reply reference was rewritten.
        requeued: Vec<MessageId>,
    },
    /// The provisional message is gone (deleted while in flight).
    Conflict,
}

#[derive(Debug)]
pub struct ChatState {
    self_id: String,
    messages: MessageStore,
    directory: ConversationDirectory,
    drafts: DraftStore,
    queue: OfflineQueue,
    focused: Option<ConversationId>,
}

impl ChatState {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            messages: MessageStore::new(),
            directory: ConversationDirectory::new(),
            drafts: DraftStore::new(),
            queue: OfflineQueue::new(),
            focused: None,
        }
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    fn is_focused(&self, conversation: &ConversationId) -> bool {
        self.focused.as_ref() == Some(conversation)
    }

    // -- Sending --

    /// Validate `content` and insert it at the tail of `conversation` with
    /// status `sending`, then clear the draft.
    ///
    /// Nothing is mutated when validation fails.
    pub fn apply_optimistic_send(
        &mut self,
        conversation: &ConversationId,
        content: OutgoingContent,
        id: ProvisionalId,
        now: DateTime<Utc>,
    ) -> Result<Message, ValidationError> {
        content.validate()?;
        if self.directory.is_blocked(conversation) {
            return Err(ValidationError::ConversationBlocked(conversation.clone()));
        }
        if let Some(target) = &content.reply_to {
            if !self.messages.belongs_to(target, conversation) {
                return Err(ValidationError::UnknownReplyTarget {
                    conversation: conversation.clone(),
                    reply_to: target.clone(),
                });
            }
        }

        let message = Message {
            id: MessageId::Provisional(id),
            conversation_id: conversation.clone(),
            sender_role: SenderRole::Own,
            sender_id: self.self_id.clone(),
            text: content.text,
            created_at: now,
            confirmed_at: None,
            message_type: content.message_type,
            status: MessageStatus::Sending,
            reply_to: content.reply_to,
            attachment: content.attachment,
            reactions: ReactionSet::default(),
            is_pinned: false,
            is_edited: false,
        };

        self.messages
            .append(message.clone())
            .map_err(|e| match e {
                StoreError::DuplicateMessageId(id) => ValidationError::DuplicateId(id),
                _ => ValidationError::DuplicateId(message.id.clone()),
            })?;
        self.directory.record_message(&message, true);
        self.drafts.clear(conversation);
        Ok(message)
    }

    /// Move a failed message back to `sending`.  Its queue entry stays until
    /// the resend succeeds.
    pub fn apply_resend(&mut self, id: &MessageId) -> Result<Message, ValidationError> {
        let message = self
            .messages
            .get(id)
            .ok_or_else(|| ValidationError::UnknownMessage(id.clone()))?;
        if message.status != MessageStatus::Error {
            return Err(ValidationError::NotResendable {
                id: id.clone(),
                status: message.status,
            });
        }
        if self.directory.is_blocked(&message.conversation_id) {
            return Err(ValidationError::ConversationBlocked(
                message.conversation_id.clone(),
            ));
        }
        self.messages.set_status(id, MessageStatus::Sending);
        self.snapshot(id)
    }

    /// Prepare a queued entry for replay.  Returns `None` (and drops the
    /// entry) when its message no longer exists.
    pub fn begin_flush_entry(&mut self, id: &MessageId) -> Option<Message> {
        if !self.messages.contains(id) {
            warn!(id = %id, "Queued message vanished from the store, dropping entry");
            self.queue.remove(id);
            return None;
        }
        self.messages.set_status(id, MessageStatus::Sending);
        self.messages.get(id).cloned()
    }

    /// Rewrite the provisional message to its canonical id, mark it `sent`
    /// and fix every queued reference to it.
    pub fn apply_reconciliation(
        &mut self,
        provisional: &MessageId,
        server: &ServerMessage,
    ) -> Reconciliation {
        self.queue.remove(provisional);

        let canonical = MessageId::Canonical(server.id.clone());
        let merged = match self
            .messages
            .reconcile(provisional, &server.id, server.timestamp)
        {
            Some(Reconciled::Rewritten) => false,
            Some(Reconciled::Merged) => true,
            None => {
                debug!(id = %provisional, canonical = %server.id, "Dropping reconciliation for missing message");
                return Reconciliation::Conflict;
            }
        };

        self.messages.set_status(&canonical, MessageStatus::Sent);
        let requeued = self.queue.rewrite_reply_refs(provisional, &server.id);

        Reconciliation::Applied {
            conversation_id: server.room_id.clone(),
            canonical,
            merged,
            requeued,
        }
    }

    /// Mark the message `error` and queue a snapshot of it.
    pub fn apply_persist_failure(
        &mut self,
        id: &MessageId,
        now: DateTime<Utc>,
    ) -> Option<OfflineQueueEntry> {
        self.messages.set_status(id, MessageStatus::Error)?;
        let snapshot = self.messages.get(id)?.clone();
        Some(self.queue.enqueue(OfflineQueueEntry::new(snapshot, now)).clone())
    }

    pub fn apply_status_advance(
        &mut self,
        id: &MessageId,
        target: MessageStatus,
    ) -> Option<StatusChange> {
        self.messages.set_status(id, target)
    }

    /// The counterpart opened the conversation: every delivered own message
    /// becomes `read`.  Returns the ids that changed.
    pub fn apply_counterpart_viewed(&mut self, conversation: &ConversationId) -> Vec<MessageId> {
        let delivered: Vec<MessageId> = self
            .messages
            .conversation(conversation)
            .into_iter()
            .filter(|m| m.is_own() && m.status == MessageStatus::Delivered)
            .map(|m| m.id.clone())
            .collect();

        delivered
            .into_iter()
            .filter(|id| {
                self.messages
                    .set_status(id, MessageStatus::Read)
                    .is_some_and(|c| c.is_applied())
            })
            .collect()
    }

    // -- Receiving --

    /// Append a pushed server message unless its id is already known.
    pub fn apply_incoming(&mut self, server: &ServerMessage) -> Option<Message> {
        if self
            .messages
            .contains(&MessageId::Canonical(server.id.clone()))
        {
            debug!(id = %server.id, "Ignoring already known message");
            return None;
        }
        let focused = self.is_focused(&server.room_id);
        let status = if server.sender_id == self.self_id {
            MessageStatus::Sent
        } else if focused {
            MessageStatus::Read
        } else {
            MessageStatus::Delivered
        };
        let message = Message::from_server(server, &self.self_id, status);
        if let Some(target) = &message.reply_to {
            if !self.messages.belongs_to(target, &message.conversation_id) {
                debug!(id = %server.id, reply_to = %target, "Reply target not loaded locally");
            }
        }
        self.messages.append(message.clone()).ok()?;
        self.directory.record_message(&message, focused);
        Some(message)
    }

    /// Merge a history page; returns the number of messages now in the conversation.
    pub fn apply_history(
        &mut self,
        conversation: &ConversationId,
        history: Vec<ServerMessage>,
    ) -> usize {
        let messages = history
            .iter()
            .map(|s| {
                let status = if s.sender_id == self.self_id {
                    MessageStatus::Sent
                } else {
                    MessageStatus::Read
                };
                Message::from_server(s, &self.self_id, status)
            })
            .collect();
        self.messages.merge_history(conversation, messages);
        self.directory.ensure(conversation);
        self.directory
            .refresh_preview(conversation, self.messages.last_message(conversation));
        self.messages.len(conversation)
    }

    pub fn apply_rooms(&mut self, rooms: Vec<RoomSummary>) -> usize {
        let n = rooms.len();
        for room in rooms {
            self.directory.upsert_summary(room);
        }
        if let Some(focused) = self.focused.clone() {
            self.directory.clear_unread(&focused);
        }
        n
    }

    /// Restore journaled entries after a restart.  Their messages come back
    /// with status `error`.
    ///
    /// A reply whose target is neither loaded nor journaled in the same
    /// conversation loses its reply reference.
    pub fn restore_queue(&mut self, entries: Vec<OfflineQueueEntry>) -> usize {
        let journaled: HashMap<MessageId, ConversationId> = entries
            .iter()
            .map(|e| (e.id().clone(), e.conversation_id().clone()))
            .collect();
        let mut restored = 0;
        for mut entry in entries {
            entry.message.status = MessageStatus::Error;
            if let Some(target) = &entry.message.reply_to {
                let conversation = &entry.message.conversation_id;
                let known = self.messages.belongs_to(target, conversation)
                    || journaled.get(target) == Some(conversation);
                if !known {
                    debug!(id = %entry.id(), reply_to = %target, "Detaching reply to an unknown message");
                    entry.message.reply_to = None;
                }
            }
            if !self.messages.contains(entry.id()) {
                if let Err(e) = self.messages.append(entry.message.clone()) {
                    warn!(error = %e, "Skipping journaled entry");
                    continue;
                }
                self.directory.record_message(&entry.message, true);
            }
            self.queue.enqueue(entry);
            restored += 1;
        }
        restored
    }

    // -- Directory flags --

    pub fn set_presence(&mut self, conversation: &ConversationId, online: bool) {
        self.directory.set_online(conversation, online);
    }

    pub fn set_archived(&mut self, conversation: &ConversationId, archived: bool) {
        self.directory.set_archived(conversation, archived);
    }

    /// Blocking a conversation stops new sends and resends into it.
    pub fn set_blocked(&mut self, conversation: &ConversationId, blocked: bool) {
        self.directory.set_blocked(conversation, blocked);
    }

    // -- Focus and drafts --

    /// Focus a conversation (or none); returns the restored draft.
    pub fn focus(&mut self, conversation: Option<ConversationId>) -> String {
        self.focused = conversation;
        match self.focused.clone() {
            Some(id) => {
                self.directory.ensure(&id);
                self.directory.clear_unread(&id);
                self.drafts.get(&id).to_string()
            }
            None => String::new(),
        }
    }

    pub fn set_draft(&mut self, conversation: &ConversationId, text: impl Into<String>) {
        self.drafts.set(conversation, text);
    }

    pub fn draft(&self, conversation: &ConversationId) -> &str {
        self.drafts.get(conversation)
    }

    // -- Message mutations --

    /// Returns whether `reactor` now has `emoji` on the message.
    pub fn toggle_reaction(
        &mut self,
        id: &MessageId,
        emoji: &str,
        reactor: &str,
    ) -> Result<bool, ValidationError> {
        let message = self
            .messages
            .get_mut(id)
            .ok_or_else(|| ValidationError::UnknownMessage(id.clone()))?;
        Ok(message.reactions.toggle(emoji, reactor))
    }

    pub fn toggle_pin(&mut self, id: &MessageId) -> Result<bool, ValidationError> {
        let message = self
            .messages
            .get_mut(id)
            .ok_or_else(|| ValidationError::UnknownMessage(id.clone()))?;
        message.is_pinned = !message.is_pinned;
        Ok(message.is_pinned)
    }

    /// Replace the text of a message (and of its queued snapshot).
    pub fn apply_edit(&mut self, id: &MessageId, text: &str) -> Result<Message, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyEdit);
        }
        let message = self
            .messages
            .get_mut(id)
            .ok_or_else(|| ValidationError::UnknownMessage(id.clone()))?;
        message.text = text.to_string();
        message.is_edited = true;
        let conversation = message.conversation_id.clone();

        self.queue.update_text(id, text);
        if self
            .messages
            .last_message(&conversation)
            .is_some_and(|m| &m.id == id)
        {
            self.directory
                .refresh_preview(&conversation, self.messages.last_message(&conversation));
        }
        self.snapshot(id)
    }

    /// Remove a message, its queue entry and every reference to it.
    ///
    /// Returns the removed message and the queued entries whose reply
    /// reference was cleared.
    pub fn remove_message(
        &mut self,
        id: &MessageId,
    ) -> Result<(Message, Vec<MessageId>), ValidationError> {
        let removed = self
            .messages
            .remove(id)
            .ok_or_else(|| ValidationError::UnknownMessage(id.clone()))?;
        self.queue.remove(id);
        let detached = self.queue.clear_reply_refs(id);
        let conversation = &removed.conversation_id;
        self.directory
            .refresh_preview(conversation, self.messages.last_message(conversation));
        Ok((removed, detached))
    }

    // -- Queries --

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.messages.get(id).cloned()
    }

    pub fn conversation_messages(&self, conversation: &ConversationId) -> Vec<Message> {
        self.messages
            .conversation(conversation)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn conversations(&self, include_archived: bool) -> Vec<ConversationSnapshot> {
        self.directory
            .list(include_archived)
            .into_iter()
            .map(|c| ConversationSnapshot {
                conversation: c.clone(),
                draft: self.drafts.get(&c.id).to_string(),
            })
            .collect()
    }

    pub fn queued(&self) -> Vec<OfflineQueueEntry> {
        self.queue.peek_all().into_iter().cloned().collect()
    }

    pub fn queued_entry(&self, id: &MessageId) -> Option<&OfflineQueueEntry> {
        self.queue.get(id)
    }

    fn snapshot(&self, id: &MessageId) -> Result<Message, ValidationError> {
        self.messages
            .get(id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownMessage(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotter_shared::protocol::FileMeta;
    use spotter_shared::{CanonicalId, MessageType};

    fn conv() -> ConversationId {
        ConversationId::new("client-42")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn pid(seq: u64) -> ProvisionalId {
        ProvisionalId::generate(1_000, seq, 0xfeed)
    }

    fn server(id: &str, sender: &str, text: &str, secs: i64) -> ServerMessage {
        ServerMessage {
            id: CanonicalId::new(id),
            room_id: conv(),
            sender_id: sender.into(),
            text: text.into(),
            timestamp: at(secs),
            message_type: MessageType::Text,
            file_meta: None,
            reply_to_id: None,
            is_edited: false,
        }
    }

    fn send(state: &mut ChatState, seq: u64, text: &str) -> MessageId {
        state
            .apply_optimistic_send(&conv(), OutgoingContent::text(text), pid(seq), at(10))
            .unwrap()
            .id
    }

    fn texts(state: &ChatState) -> Vec<String> {
        state
            .conversation_messages(&conv())
            .into_iter()
            .map(|m| m.text)
            .collect()
    }

    #[test]
    fn empty_submission_mutates_nothing() {
        let mut state = ChatState::new("coach");
        state.set_draft(&conv(), "draft");
        let err = state
            .apply_optimistic_send(&conv(), OutgoingContent::text("   "), pid(1), at(1))
            .unwrap_err();
        assert_eq!(err, ValidationError::EmptyContent);
        assert_eq!(state.messages().len(&conv()), 0);
        assert_eq!(state.draft(&conv()), "draft");
    }

    #[test]
    fn attachment_only_submission_is_accepted() {
        let mut state = ChatState::new("coach");
        let content = OutgoingContent::with_attachment(
            MessageType::Voice,
            FileMeta {
                name: "memo.ogg".into(),
                size: 2048,
                mime_type: "audio/ogg".into(),
                url: None,
            },
        );
        let message = state
            .apply_optimistic_send(&conv(), content, pid(1), at(1))
            .unwrap();
        assert_eq!(message.status, MessageStatus::Sending);
        let preview = state.directory().get(&conv()).unwrap().last_message_preview.clone();
        assert_eq!(preview.as_deref(), Some("[voice note]"));
    }

    #[test]
    fn send_clears_draft_and_appends_at_tail() {
        let mut state = ChatState::new("coach");
        state.set_draft(&conv(), "hello");
        assert_eq!(state.draft(&conv()), "hello");
        send(&mut state, 1, "hello");
        send(&mut state, 2, "again");
        assert_eq!(state.draft(&conv()), "");
        assert_eq!(texts(&state), vec!["hello", "again"]);
    }

    #[test]
    fn reply_must_target_same_conversation() {
        let mut state = ChatState::new("coach");
        let parent = send(&mut state, 1, "parent");

        let other = ConversationId::new("client-7");
        let err = state
            .apply_optimistic_send(
                &other,
                OutgoingContent::text("re").replying_to(parent.clone()),
                pid(2),
                at(2),
            )
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownReplyTarget { .. }));

        assert!(state
            .apply_optimistic_send(
                &conv(),
                OutgoingContent::text("re").replying_to(parent),
                pid(3),
                at(3),
            )
            .is_ok());
    }

    #[test]
    fn blocked_conversation_rejects_sends() {
        let mut state = ChatState::new("coach");
        state.apply_rooms(vec![RoomSummary {
            id: conv(),
            name: "Sam".into(),
            last_message: None,
            last_message_at: None,
            unread_count: 0,
            is_online: false,
            is_archived: false,
            is_blocked: true,
        }]);
        let err = state
            .apply_optimistic_send(&conv(), OutgoingContent::text("hi"), pid(1), at(1))
            .unwrap_err();
        assert_eq!(err, ValidationError::ConversationBlocked(conv()));
    }

    #[test]
    fn reconciliation_rewrites_id_and_queue_references() {
        let mut state = ChatState::new("coach");
        let parent = send(&mut state, 1, "parent");
        let child = state
            .apply_optimistic_send(
                &conv(),
                OutgoingContent::text("child").replying_to(parent.clone()),
                pid(2),
                at(11),
            )
            .unwrap()
            .id;
        state.apply_persist_failure(&child, at(12)).unwrap();

        let outcome = state.apply_reconciliation(&parent, &server("srv-1", "coach", "parent", 20));
        let canonical = MessageId::canonical("srv-1");
        assert_eq!(
            outcome,
            Reconciliation::Applied {
                conversation_id: conv(),
                canonical: canonical.clone(),
                merged: false,
                requeued: vec![child.clone()],
            }
        );

        let m = state.message(&canonical).unwrap();
        assert_eq!(m.status, MessageStatus::Sent);
        assert_eq!(m.created_at, at(10));
        assert!(state.message(&parent).is_none());
        assert_eq!(state.message(&child).unwrap().reply_to, Some(canonical.clone()));
        assert_eq!(
            state.queued_entry(&child).unwrap().message.reply_to,
            Some(canonical)
        );
    }

    #[test]
    fn reconciliation_after_delete_is_a_conflict() {
        let mut state = ChatState::new("coach");
        let id = send(&mut state, 1, "oops");
        state.remove_message(&id).unwrap();
        assert_eq!(
            state.apply_reconciliation(&id, &server("srv-1", "coach", "oops", 20)),
            Reconciliation::Conflict
        );
        assert_eq!(state.messages().len(&conv()), 0);
    }

    #[test]
    fn pushed_echo_before_response_merges() {
        let mut state = ChatState::new("coach");
        let id = send(&mut state, 1, "hi");
        let echo = server("srv-1", "coach", "hi", 20);
        assert!(state.apply_incoming(&echo).is_some());
        assert_eq!(state.messages().len(&conv()), 2);

        let outcome = state.apply_reconciliation(&id, &echo);
        assert!(matches!(outcome, Reconciliation::Applied { merged: true, .. }));
        assert_eq!(texts(&state), vec!["hi"]);
    }

    #[test]
    fn pushed_echo_keeps_order_and_local_state() {
        let mut state = ChatState::new("coach");
        let a = send(&mut state, 1, "A");
        send(&mut state, 2, "B");
        state.toggle_pin(&a).unwrap();
        state.toggle_reaction(&a, "👍", "client").unwrap();
        state.apply_edit(&a, "A, edited").unwrap();

        let echo = server("srv-1", "coach", "A", 20);
        state.apply_incoming(&echo).unwrap();
        assert_eq!(texts(&state), vec!["A, edited", "B", "A"]);

        let outcome = state.apply_reconciliation(&a, &echo);
        assert!(matches!(outcome, Reconciliation::Applied { merged: true, .. }));
        assert_eq!(texts(&state), vec!["A, edited", "B"]);

        let m = state.message(&MessageId::canonical("srv-1")).unwrap();
        assert!(m.is_pinned);
        assert!(m.is_edited);
        assert!(m.reactions.contains("👍", "client"));
        assert_eq!(m.created_at, at(10));
        assert_eq!(m.confirmed_at, Some(at(20)));
        assert_eq!(m.message_type, MessageType::Text);
        assert_eq!(m.status, MessageStatus::Sent);
    }

    #[test]
    fn failure_queues_and_resend_keeps_entry() {
        let mut state = ChatState::new("coach");
        let id = send(&mut state, 1, "Hi");
        let entry = state.apply_persist_failure(&id, at(11)).unwrap();
        assert_eq!(entry.attempts, 1);
        assert_eq!(state.message(&id).unwrap().status, MessageStatus::Error);

        let resent = state.apply_resend(&id).unwrap();
        assert_eq!(resent.status, MessageStatus::Sending);
        assert_eq!(resent.id, id);
        assert_eq!(state.queue().len(), 1);

        let again = state.apply_persist_failure(&id, at(12)).unwrap();
        assert_eq!(again.attempts, 2);
        assert_eq!(state.queue().len(), 1);
    }

    #[test]
    fn only_failed_messages_can_be_resent() {
        let mut state = ChatState::new("coach");
        let id = send(&mut state, 1, "Hi");
        assert!(matches!(
            state.apply_resend(&id),
            Err(ValidationError::NotResendable { status: MessageStatus::Sending, .. })
        ));
    }

    #[test]
    fn counterpart_viewed_reads_only_delivered() {
        let mut state = ChatState::new("coach");
        let a = send(&mut state, 1, "a");
        let b = send(&mut state, 2, "b");
        state.apply_reconciliation(&a, &server("s-a", "coach", "a", 20));
        state.apply_reconciliation(&b, &server("s-b", "coach", "b", 21));
        let a = MessageId::canonical("s-a");
        state.apply_status_advance(&a, MessageStatus::Delivered);

        assert_eq!(state.apply_counterpart_viewed(&conv()), vec![a.clone()]);
        assert_eq!(state.message(&a).unwrap().status, MessageStatus::Read);
        assert_eq!(
            state.message(&MessageId::canonical("s-b")).unwrap().status,
            MessageStatus::Sent
        );
        assert!(state.apply_counterpart_viewed(&conv()).is_empty());
    }

    #[test]
    fn incoming_counts_unread_only_when_unfocused() {
        let mut state = ChatState::new("coach");
        state.apply_incoming(&server("s-1", "client", "one", 1)).unwrap();
        assert_eq!(state.directory().get(&conv()).unwrap().unread_count, 1);
        assert!(state.apply_incoming(&server("s-1", "client", "one", 1)).is_none());

        state.focus(Some(conv()));
        assert_eq!(state.directory().get(&conv()).unwrap().unread_count, 0);
        let m = state.apply_incoming(&server("s-2", "client", "two", 2)).unwrap();
        assert_eq!(m.status, MessageStatus::Read);
        assert_eq!(state.directory().get(&conv()).unwrap().unread_count, 0);
    }

    #[test]
    fn draft_survives_focus_switch() {
        let mut state = ChatState::new("coach");
        let other = ConversationId::new("client-7");
        state.focus(Some(conv()));
        state.set_draft(&conv(), "half a thought");
        state.focus(Some(other));
        assert_eq!(state.focus(Some(conv())), "half a thought");
    }

    #[test]
    fn history_lands_before_pending_messages() {
        let mut state = ChatState::new("coach");
        send(&mut state, 1, "pending");
        let n = state.apply_history(
            &conv(),
            vec![server("h1", "client", "old", 1), server("h2", "coach", "older reply", 2)],
        );
        assert_eq!(n, 3);
        assert_eq!(texts(&state), vec!["old", "older reply", "pending"]);
    }

    #[test]
    fn edit_updates_queued_snapshot() {
        let mut state = ChatState::new("coach");
        let id = send(&mut state, 1, "typo");
        state.apply_persist_failure(&id, at(11));
        assert_eq!(state.apply_edit(&id, " "), Err(ValidationError::EmptyEdit));

        let edited = state.apply_edit(&id, "fixed").unwrap();
        assert!(edited.is_edited);
        assert_eq!(state.queued_entry(&id).unwrap().message.text, "fixed");
        let preview = state.directory().get(&conv()).unwrap().last_message_preview.clone();
        assert_eq!(preview.as_deref(), Some("fixed"));
    }

    #[test]
    fn remove_drops_queue_entry_and_refreshes_preview() {
        let mut state = ChatState::new("coach");
        send(&mut state, 1, "first");
        let second = send(&mut state, 2, "second");
        state.apply_persist_failure(&second, at(11));

        let (removed, detached) = state.remove_message(&second).unwrap();
        assert_eq!(removed.text, "second");
        assert!(detached.is_empty());
        assert!(state.queue().is_empty());
        let preview = state.directory().get(&conv()).unwrap().last_message_preview.clone();
        assert_eq!(preview.as_deref(), Some("first"));
        assert!(state.remove_message(&second).is_err());
    }

    #[test]
    fn reactions_and_pins_toggle() {
        let mut state = ChatState::new("coach");
        let id = send(&mut state, 1, "nice set");
        assert!(state.toggle_reaction(&id, "👍", "u1").unwrap());
        assert!(!state.toggle_reaction(&id, "👍", "u1").unwrap());
        assert!(state.message(&id).unwrap().reactions.is_empty());
        assert!(state.toggle_pin(&id).unwrap());
        assert!(!state.toggle_pin(&id).unwrap());
        assert!(state.toggle_pin(&MessageId::canonical("missing")).is_err());
    }

    #[test]
    fn restored_entries_come_back_as_errors() {
        let mut original = ChatState::new("coach");
        let id = send(&mut original, 1, "queued");
        original.apply_persist_failure(&id, at(11));
        let entries = original.queued();

        let mut state = ChatState::new("coach");
        assert_eq!(state.restore_queue(entries), 1);
        assert_eq!(state.message(&id).unwrap().status, MessageStatus::Error);
        assert_eq!(state.queue().len(), 1);
        assert_eq!(texts(&state), vec!["queued"]);
    }

    #[test]
    fn restored_replies_to_unknown_targets_are_detached() {
        let mut original = ChatState::new("coach");
        let parent = send(&mut original, 1, "parent");
        let child = original
            .apply_optimistic_send(
                &conv(),
                OutgoingContent::text("child").replying_to(parent.clone()),
                pid(2),
                at(11),
            )
            .unwrap()
            .id;
        let orphan = original
            .apply_optimistic_send(
                &conv(),
                OutgoingContent::text("orphan").replying_to(parent.clone()),
                pid(3),
                at(12),
            )
            .unwrap()
            .id;
        for id in [&parent, &child, &orphan] {
            original.apply_persist_failure(id, at(13)).unwrap();
        }
        let entries = original.queued();

        // Restoring with the parent's entry present keeps the reference.
        let mut state = ChatState::new("coach");
        assert_eq!(state.restore_queue(entries.clone()), 3);
        assert_eq!(state.message(&child).unwrap().reply_to, Some(parent.clone()));

        // Without it the reply would point at nothing.
        let mut state = ChatState::new("coach");
        let without_parent: Vec<_> = entries.into_iter().filter(|e| e.id() != &parent).collect();
        assert_eq!(state.restore_queue(without_parent), 2);
        assert_eq!(state.message(&orphan).unwrap().reply_to, None);
        assert_eq!(state.queued_entry(&orphan).unwrap().message.reply_to, None);
        assert!(state.message(&parent).is_none());
    }

    #[test]
    fn directory_flags_reach_the_listing() {
        let mut state = ChatState::new("coach");
        state.set_presence(&conv(), true);
        assert!(state.conversations(false)[0].conversation.is_online);

        state.set_blocked(&conv(), true);
        assert!(state
            .apply_optimistic_send(&conv(), OutgoingContent::text("hi"), pid(1), at(1))
            .is_err());

        state.set_archived(&conv(), true);
        assert!(state.conversations(false).is_empty());
        assert_eq!(state.conversations(true).len(), 1);
    }
}
