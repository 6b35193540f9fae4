//! Optimistic insert, persistence attempt, reconciliation or failure routing.
//!
//! The pipeline never owns state.  The engine hands it the [`ChatState`] for
//! the synchronous steps and spawns the future returned by
//! [`SendPipeline::persist`] for the network step.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use spotter_net::{ChatApi, NetError};
use spotter_shared::protocol::{PostMessageRequest, ServerMessage};
use spotter_shared::{ConversationId, MessageId, ValidationError};
use spotter_store::{Message, OfflineQueueEntry, OutgoingContent};

use crate::clock::{Clock, ProvisionalIdGenerator};
use crate::error::PersistenceFailure;
use crate::state::{ChatState, Reconciliation};

/// What a finished persistence attempt did to the state.
#[derive(Debug)]
pub enum SendOutcome {
    Confirmed {
        provisional: MessageId,
        canonical: MessageId,
        conversation_id: ConversationId,
        merged: bool,
        /// Queued entries whose reply reference now points at `canonical`.
        requeued: Vec<MessageId>,
        server: ServerMessage,
    },
    Failed {
        entry: OfflineQueueEntry,
        failure: PersistenceFailure,
    },
    /// The message was removed before the attempt finished.
    Dropped,
}

pub struct SendPipeline {
    api: Arc<dyn ChatApi>,
    clock: Arc<dyn Clock>,
    ids: ProvisionalIdGenerator,
    sender_id: String,
    send_timeout: Duration,
}

impl SendPipeline {
    pub fn new(
        api: Arc<dyn ChatApi>,
        clock: Arc<dyn Clock>,
        sender_id: impl Into<String>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            api,
            clock,
            ids: ProvisionalIdGenerator::new(),
            sender_id: sender_id.into(),
            send_timeout,
        }
    }

    /// Generate a provisional id, insert the message as `sending` and clear
    /// the draft.  The caller starts the persistence attempt.
    pub fn submit(
        &mut self,
        state: &mut ChatState,
        conversation: &ConversationId,
        content: OutgoingContent,
    ) -> Result<Message, ValidationError> {
        let now = self.clock.now();
        let id = self.ids.next(now);
        let message = state.apply_optimistic_send(conversation, content, id, now)?;
        debug!(id = %message.id, conversation = %conversation, "Optimistic insert");
        Ok(message)
    }

    pub fn request_for(&self, message: &Message) -> PostMessageRequest {
        PostMessageRequest {
            text: message.text.clone(),
            room_id: message.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            timestamp: message.created_at,
            message_type: message.message_type,
            file_meta: message.attachment.clone(),
            reply_to_id: message.canonical_reply_to(),
        }
    }

    /// One bounded `POST /messages`.  The returned future owns everything it
    /// needs; dropping it abandons the request.
    pub fn persist(
        &self,
        request: PostMessageRequest,
    ) -> impl Future<Output = Result<ServerMessage, PersistenceFailure>> + Send + 'static {
        let api = Arc::clone(&self.api);
        let limit = self.send_timeout;
        async move {
            match tokio::time::timeout(limit, api.post_message(&request)).await {
                Ok(Ok(message)) => Ok(message),
                Ok(Err(NetError::Unreachable)) => Err(PersistenceFailure::Offline),
                Ok(Err(e)) => Err(PersistenceFailure::Backend(e)),
                Err(_) => Err(PersistenceFailure::Timeout(limit)),
            }
        }
    }

    /// Fold a finished attempt for `id` back into the state.
    pub fn complete(
        &self,
        state: &mut ChatState,
        id: &MessageId,
        result: Result<ServerMessage, PersistenceFailure>,
    ) -> SendOutcome {
        match result {
            Ok(server) => match state.apply_reconciliation(id, &server) {
                Reconciliation::Applied {
                    conversation_id,
                    canonical,
                    merged,
                    requeued,
                } => {
                    debug!(provisional = %id, canonical = %canonical, merged, "Reconciled");
                    SendOutcome::Confirmed {
                        provisional: id.clone(),
                        canonical,
                        conversation_id,
                        merged,
                        requeued,
                        server,
                    }
                }
                Reconciliation::Conflict => SendOutcome::Dropped,
            },
            Err(failure) => match state.apply_persist_failure(id, self.clock.now()) {
                Some(entry) => {
                    warn!(id = %id, attempts = entry.attempts, error = %failure, "Send failed, message queued");
                    SendOutcome::Failed { entry, failure }
                }
                None => {
                    debug!(id = %id, "Send failed for a removed message");
                    SendOutcome::Dropped
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::DateTime;
    use spotter_net::FakeChatApi;
    use spotter_shared::MessageStatus;

    fn conv() -> ConversationId {
        ConversationId::new("client-42")
    }

    fn pipeline(api: Arc<FakeChatApi>, timeout: Duration) -> SendPipeline {
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap()));
        SendPipeline::new(api, clock, "coach", timeout)
    }

    #[tokio::test]
    async fn successful_attempt_reconciles() {
        let api = Arc::new(FakeChatApi::new());
        let mut pipeline = pipeline(api.clone(), Duration::from_secs(30));
        let mut state = ChatState::new("coach");

        let message = pipeline
            .submit(&mut state, &conv(), OutgoingContent::text("Hi"))
            .unwrap();
        assert!(message.id.is_provisional());

        let result = pipeline.persist(pipeline.request_for(&message)).await;
        let outcome = pipeline.complete(&mut state, &message.id, result);
        let SendOutcome::Confirmed { canonical, .. } = outcome else {
            panic!("expected confirmation, got {outcome:?}");
        };
        let stored = state.message(&canonical).unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
        assert_eq!(stored.text, "Hi");
        assert_eq!(stored.created_at, message.created_at);
        assert!(state.message(&message.id).is_none());
        assert_eq!(api.persisted()[0].sender_id, "coach");
    }

    #[tokio::test]
    async fn unreachable_backend_queues_message() {
        let api = Arc::new(FakeChatApi::new());
        api.set_online(false);
        let mut pipeline = pipeline(api, Duration::from_secs(30));
        let mut state = ChatState::new("coach");

        let message = pipeline
            .submit(&mut state, &conv(), OutgoingContent::text("Hi"))
            .unwrap();
        let result = pipeline.persist(pipeline.request_for(&message)).await;
        assert!(matches!(result, Err(PersistenceFailure::Offline)));

        let outcome = pipeline.complete(&mut state, &message.id, result);
        assert!(matches!(outcome, SendOutcome::Failed { .. }));
        assert_eq!(state.message(&message.id).unwrap().status, MessageStatus::Error);
        assert_eq!(state.queue().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_request_times_out() {
        let api = Arc::new(FakeChatApi::new());
        api.hold_posts(true);
        let mut pipeline = pipeline(api.clone(), Duration::from_secs(30));
        let mut state = ChatState::new("coach");

        let message = pipeline
            .submit(&mut state, &conv(), OutgoingContent::text("stuck"))
            .unwrap();
        let result = pipeline.persist(pipeline.request_for(&message)).await;
        assert!(matches!(result, Err(PersistenceFailure::Timeout(d)) if d == Duration::from_secs(30)));
        assert!(api.persisted().is_empty());
    }

    #[test]
    fn provisional_reply_targets_are_not_sent() {
        let api = Arc::new(FakeChatApi::new());
        let mut pipeline = pipeline(api, Duration::from_secs(30));
        let mut state = ChatState::new("coach");
        let parent = pipeline
            .submit(&mut state, &conv(), OutgoingContent::text("parent"))
            .unwrap();
        let child = pipeline
            .submit(
                &mut state,
                &conv(),
                OutgoingContent::text("child").replying_to(parent.id),
            )
            .unwrap();
        assert_eq!(pipeline.request_for(&child).reply_to_id, None);
    }
}
