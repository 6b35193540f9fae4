//! The sync engine actor.
//!
//! One tokio task owns the [`ChatState`].  UI code talks to it through a
//! cloneable [`EngineHandle`] that sends typed commands; network calls run in
//! spawned tasks and report back on a second channel, so every mutation
//! happens inside the actor between suspensions.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use spotter_net::{ChatApi, NetError};
use spotter_shared::protocol::{EditMessageRequest, RoomSummary, RoomUpdate, ServerMessage};
use spotter_shared::{CanonicalId, ConnectivityState, ConversationId, MessageId, MessageStatus};
use spotter_store::{
    ConversationSnapshot, Database, FlushResult, Message, OfflineQueueEntry, OutgoingContent,
};

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{EngineError, PersistenceFailure, Result};
use crate::events::{EngineEvent, LogNotifier, Notification, Notifier};
use crate::pipeline::{SendOutcome, SendPipeline};
use crate::state::ChatState;

const COMMAND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands sent *into* the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    /// Optimistically insert and send a new message.
    Submit {
        conversation: ConversationId,
        content: OutgoingContent,
        reply: oneshot::Sender<Result<MessageId>>,
    },
    /// Retry a message in `error`, keeping its provisional id.
    Resend {
        id: MessageId,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Replay the offline queue.
    Flush(oneshot::Sender<FlushResult>),
    SetDraft {
        conversation: ConversationId,
        text: String,
    },
    GetDraft {
        conversation: ConversationId,
        reply: oneshot::Sender<String>,
    },
    /// Focus a conversation (or none); replies with its draft.
    Focus {
        conversation: Option<ConversationId>,
        reply: oneshot::Sender<String>,
    },
    ToggleReaction {
        id: MessageId,
        emoji: String,
        reactor: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    TogglePin {
        id: MessageId,
        reply: oneshot::Sender<Result<bool>>,
    },
    Edit {
        id: MessageId,
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Delete {
        id: MessageId,
        reply: oneshot::Sender<Result<()>>,
    },
    /// The message reached the counterpart's device.
    DeliveryAck(MessageId),
    /// The counterpart viewed the conversation.
    CounterpartViewed(ConversationId),
    /// A message pushed by the backend.
    Receive(ServerMessage),
    LoadRooms(oneshot::Sender<Result<usize>>),
    LoadHistory {
        conversation: ConversationId,
        reply: oneshot::Sender<Result<usize>>,
    },
    ConnectivityChanged(ConnectivityState),
    /// The counterpart came online or went offline.
    SetPresence {
        conversation: ConversationId,
        online: bool,
    },
    SetArchived {
        conversation: ConversationId,
        archived: bool,
    },
    SetBlocked {
        conversation: ConversationId,
        blocked: bool,
    },
    GetMessages {
        conversation: ConversationId,
        reply: oneshot::Sender<Vec<Message>>,
    },
    GetMessage {
        id: MessageId,
        reply: oneshot::Sender<Option<Message>>,
    },
    GetConversations {
        include_archived: bool,
        reply: oneshot::Sender<Vec<ConversationSnapshot>>,
    },
    GetQueue(oneshot::Sender<Vec<OfflineQueueEntry>>),
    GetConnectivity(oneshot::Sender<ConnectivityState>),
    /// Stop the engine; in-flight requests are abandoned.
    Shutdown,
}

/// Completions of spawned network work.
enum Report {
    Persisted {
        id: MessageId,
        conversation: ConversationId,
        origin: SendOrigin,
        result: std::result::Result<ServerMessage, PersistenceFailure>,
    },
    Rooms {
        result: std::result::Result<Vec<RoomSummary>, NetError>,
        reply: oneshot::Sender<Result<usize>>,
    },
    History {
        conversation: ConversationId,
        result: std::result::Result<Vec<ServerMessage>, NetError>,
        reply: oneshot::Sender<Result<usize>>,
    },
    DeliveryAck(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOrigin {
    Submit,
    Resend,
    Flush,
}

/// Bookkeeping for one flush run.
#[derive(Default)]
struct FlushRun {
    /// At most one replayed entry per conversation.
    in_flight: HashMap<ConversationId, MessageId>,
    /// Conversations that hit a failure during this run.
    halted: HashSet<ConversationId>,
    result: FlushResult,
    waiters: Vec<oneshot::Sender<FlushResult>>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct EngineBuilder {
    api: Arc<dyn ChatApi>,
    config: ClientConfig,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    journal: Option<Database>,
    connectivity: Option<ConnectivityState>,
}

impl EngineBuilder {
    pub fn new(api: Arc<dyn ChatApi>, config: ClientConfig) -> Self {
        Self {
            api,
            config,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            journal: None,
            connectivity: None,
        }
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mirror the offline queue to `journal` and restore it on start.
    pub fn journal(mut self, journal: Database) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Connectivity assumed until the first report; defaults to the health
    /// policy's initial state.
    pub fn connectivity(mut self, state: ConnectivityState) -> Self {
        self.connectivity = Some(state);
        self
    }

    /// Spawn the engine task.  Must be called inside a tokio runtime.
    pub fn spawn(self) -> EngineHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (report_tx, report_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut state = ChatState::new(self.config.sender_id.clone());
        if let Some(db) = &self.journal {
            match db.load_queue() {
                Ok(entries) if !entries.is_empty() => {
                    let restored = state.restore_queue(entries);
                    info!(restored, "Restored offline queue from journal");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to read queue journal"),
            }
        }

        let pipeline = SendPipeline::new(
            Arc::clone(&self.api),
            self.clock,
            self.config.sender_id.clone(),
            self.config.send_timeout,
        );

        let engine = Engine {
            state,
            pipeline,
            api: self.api,
            notifier: self.notifier,
            journal: self.journal,
            events: events.clone(),
            reports: report_tx,
            connectivity: self
                .connectivity
                .unwrap_or(self.config.health.initial_state),
            simulated_delivery: self.config.simulated_delivery,
            in_flight: HashSet::new(),
            deleted_in_flight: HashSet::new(),
            awaiting_parent: HashMap::new(),
            flush: None,
        };
        tokio::spawn(engine.run(cmd_rx, report_rx));

        EngineHandle { tx: cmd_tx, events }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Engine {
    state: ChatState,
    pipeline: SendPipeline,
    api: Arc<dyn ChatApi>,
    notifier: Arc<dyn Notifier>,
    journal: Option<Database>,
    events: broadcast::Sender<EngineEvent>,
    reports: mpsc::Sender<Report>,
    connectivity: ConnectivityState,
    simulated_delivery: Option<Duration>,
    /// Messages with a persistence attempt currently running.
    in_flight: HashSet<MessageId>,
    /// Provisional messages deleted while their attempt was running.
    deleted_in_flight: HashSet<MessageId>,
    /// Replies held back until the provisional message they answer settles.
    awaiting_parent: HashMap<MessageId, Vec<(MessageId, SendOrigin)>>,
    flush: Option<FlushRun>,
}

impl Engine {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        mut reports: mpsc::Receiver<Report>,
    ) {
        info!(
            queued = self.state.queue().len(),
            connectivity = ?self.connectivity,
            "Sync engine started"
        );

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(EngineCommand::Shutdown) => {
                            info!("Engine shutdown requested");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            info!("All engine handles dropped, shutting down");
                            break;
                        }
                    }
                }
                Some(report) = reports.recv() => self.handle_report(report),
            }
        }

        info!("Sync engine stopped");
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Submit {
                conversation,
                content,
                reply,
            } => {
                let _ = reply.send(self.submit(conversation, content));
            }
            EngineCommand::Resend { id, reply } => {
                let _ = reply.send(self.resend(id));
            }
            EngineCommand::Flush(reply) => self.start_flush(Some(reply)),
            EngineCommand::SetDraft { conversation, text } => {
                self.state.set_draft(&conversation, text);
            }
            EngineCommand::GetDraft {
                conversation,
                reply,
            } => {
                let _ = reply.send(self.state.draft(&conversation).to_string());
            }
            EngineCommand::Focus {
                conversation,
                reply,
            } => {
                let draft = self.state.focus(conversation);
                self.emit(EngineEvent::ConversationsChanged);
                let _ = reply.send(draft);
            }
            EngineCommand::ToggleReaction {
                id,
                emoji,
                reactor,
                reply,
            } => {
                let result = self
                    .state
                    .toggle_reaction(&id, &emoji, &reactor)
                    .map_err(EngineError::from);
                if result.is_ok() {
                    self.emit(EngineEvent::MessageUpdated { id });
                }
                let _ = reply.send(result);
            }
            EngineCommand::TogglePin { id, reply } => {
                let result = self.state.toggle_pin(&id).map_err(EngineError::from);
                if result.is_ok() {
                    self.emit(EngineEvent::MessageUpdated { id });
                }
                let _ = reply.send(result);
            }
            EngineCommand::Edit { id, text, reply } => {
                let _ = reply.send(self.edit(id, &text));
            }
            EngineCommand::Delete { id, reply } => {
                let _ = reply.send(self.delete(id));
            }
            EngineCommand::DeliveryAck(id) => self.delivery_ack(id),
            EngineCommand::CounterpartViewed(conversation) => {
                for id in self.state.apply_counterpart_viewed(&conversation) {
                    self.emit(EngineEvent::StatusChanged {
                        id,
                        status: MessageStatus::Read,
                    });
                }
            }
            EngineCommand::Receive(message) => {
                if let Some(m) = self.state.apply_incoming(&message) {
                    debug!(id = %m.id, conversation = %m.conversation_id, "Received message");
                    self.emit(EngineEvent::MessageInserted {
                        conversation_id: m.conversation_id,
                        id: m.id,
                    });
                    self.emit(EngineEvent::ConversationsChanged);
                }
            }
            EngineCommand::LoadRooms(reply) => {
                let api = Arc::clone(&self.api);
                let reports = self.reports.clone();
                tokio::spawn(async move {
                    let result = api.list_rooms().await;
                    let _ = reports.send(Report::Rooms { result, reply }).await;
                });
            }
            EngineCommand::LoadHistory {
                conversation,
                reply,
            } => {
                let api = Arc::clone(&self.api);
                let reports = self.reports.clone();
                tokio::spawn(async move {
                    let result = api.room_messages(&conversation).await;
                    let _ = reports
                        .send(Report::History {
                            conversation,
                            result,
                            reply,
                        })
                        .await;
                });
            }
            EngineCommand::ConnectivityChanged(state) => self.connectivity_changed(state),
            EngineCommand::SetPresence {
                conversation,
                online,
            } => {
                self.state.set_presence(&conversation, online);
                self.emit(EngineEvent::ConversationsChanged);
            }
            EngineCommand::SetArchived {
                conversation,
                archived,
            } => {
                self.state.set_archived(&conversation, archived);
                self.emit(EngineEvent::ConversationsChanged);
            }
            EngineCommand::SetBlocked {
                conversation,
                blocked,
            } => {
                info!(conversation = %conversation, blocked, "Conversation block changed");
                self.state.set_blocked(&conversation, blocked);
                self.emit(EngineEvent::ConversationsChanged);
            }
            EngineCommand::GetMessages {
                conversation,
                reply,
            } => {
                let _ = reply.send(self.state.conversation_messages(&conversation));
            }
            EngineCommand::GetMessage { id, reply } => {
                let _ = reply.send(self.state.message(&id));
            }
            EngineCommand::GetConversations {
                include_archived,
                reply,
            } => {
                let _ = reply.send(self.state.conversations(include_archived));
            }
            EngineCommand::GetQueue(reply) => {
                let _ = reply.send(self.state.queued());
            }
            EngineCommand::GetConnectivity(reply) => {
                let _ = reply.send(self.connectivity);
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn handle_report(&mut self, report: Report) {
        match report {
            Report::Persisted {
                id,
                conversation,
                origin,
                result,
            } => self.on_persisted(id, conversation, origin, result),
            Report::Rooms { result, reply } => {
                let result = match result {
                    Ok(rooms) => {
                        let n = self.state.apply_rooms(rooms);
                        debug!(rooms = n, "Loaded conversations");
                        self.emit(EngineEvent::ConversationsChanged);
                        Ok(n)
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to load conversations");
                        self.notifier
                            .notify(Notification::error("Could not load conversations"));
                        Err(EngineError::Backend(e))
                    }
                };
                let _ = reply.send(result);
            }
            Report::History {
                conversation,
                result,
                reply,
            } => {
                let result = match result {
                    Ok(history) => {
                        let n = self.state.apply_history(&conversation, history);
                        debug!(conversation = %conversation, messages = n, "Merged history");
                        self.emit(EngineEvent::HistoryMerged {
                            conversation_id: conversation,
                        });
                        self.emit(EngineEvent::ConversationsChanged);
                        Ok(n)
                    }
                    Err(e) => {
                        warn!(conversation = %conversation, error = %e, "Failed to load history");
                        self.notifier
                            .notify(Notification::error("Could not load messages"));
                        Err(EngineError::Backend(e))
                    }
                };
                let _ = reply.send(result);
            }
            Report::DeliveryAck(id) => self.delivery_ack(id),
        }
    }

    // -- Sending --

    fn submit(&mut self, conversation: ConversationId, content: OutgoingContent) -> Result<MessageId> {
        let message = self
            .pipeline
            .submit(&mut self.state, &conversation, content)?;
        let id = message.id.clone();
        self.emit(EngineEvent::MessageInserted {
            conversation_id: conversation.clone(),
            id: id.clone(),
        });
        self.emit(EngineEvent::ConversationsChanged);
        self.send_or_queue(message, SendOrigin::Submit);
        Ok(id)
    }

    fn resend(&mut self, id: MessageId) -> Result<()> {
        let message = self.state.apply_resend(&id)?;
        info!(id = %id, "Resending message");
        self.emit(EngineEvent::StatusChanged {
            id: id.clone(),
            status: MessageStatus::Sending,
        });
        self.send_or_queue(message, SendOrigin::Resend);
        Ok(())
    }

    /// Send now, hold a reply until its parent settles, or queue.
    fn send_or_queue(&mut self, message: Message, origin: SendOrigin) {
        if let Some(parent) = self.unsent_parent(&message) {
            if self.in_flight.contains(&parent) || self.is_held(&parent) {
                debug!(id = %message.id, parent = %parent, "Holding reply until its parent is confirmed");
                self.awaiting_parent
                    .entry(parent)
                    .or_default()
                    .push((message.id, origin));
            } else {
                debug!(id = %message.id, parent = %parent, "Parent is queued, queueing reply behind it");
                self.finish_attempt(
                    message.id,
                    message.conversation_id,
                    origin,
                    Err(PersistenceFailure::ParentUnsent),
                );
            }
            return;
        }

        if self.connectivity.is_connected() {
            self.dispatch(message, origin);
        } else {
            debug!(id = %message.id, "Disconnected, queueing without a network attempt");
            self.finish_attempt(
                message.id,
                message.conversation_id,
                origin,
                Err(PersistenceFailure::Offline),
            );
        }
    }

    /// The provisional message `message` replies to, if it has not reached
    /// the server yet.
    fn unsent_parent(&self, message: &Message) -> Option<MessageId> {
        let parent = message.reply_to.as_ref().filter(|p| p.is_provisional())?;
        let unsent = self.in_flight.contains(parent)
            || self.is_held(parent)
            || self.state.queue().contains(parent);
        unsent.then(|| parent.clone())
    }

    fn is_held(&self, id: &MessageId) -> bool {
        self.awaiting_parent
            .values()
            .any(|held| held.iter().any(|(child, _)| child == id))
    }

    /// `parent` settled: send or queue the replies that waited for it.
    fn release_replies(&mut self, parent: &MessageId) {
        let Some(held) = self.awaiting_parent.remove(parent) else {
            return;
        };
        for (id, origin) in held {
            // Deleted while held.
            let Some(message) = self.state.message(&id) else {
                continue;
            };
            self.send_or_queue(message, origin);
        }
    }

    /// Start a persistence attempt in its own task.
    fn dispatch(&mut self, message: Message, origin: SendOrigin) {
        let id = message.id.clone();
        let conversation = message.conversation_id.clone();
        let attempt = self.pipeline.persist(self.pipeline.request_for(&message));
        self.in_flight.insert(id.clone());
        debug!(id = %id, ?origin, "Persisting message");

        let reports = self.reports.clone();
        tokio::spawn(async move {
            let result = attempt.await;
            let _ = reports
                .send(Report::Persisted {
                    id,
                    conversation,
                    origin,
                    result,
                })
                .await;
        });
    }

    fn on_persisted(
        &mut self,
        id: MessageId,
        conversation: ConversationId,
        origin: SendOrigin,
        result: std::result::Result<ServerMessage, PersistenceFailure>,
    ) {
        self.in_flight.remove(&id);
        if self.deleted_in_flight.remove(&id) {
            if let Ok(server) = &result {
                debug!(id = %id, canonical = %server.id, "Message deleted while sending, removing it remotely");
                self.delete_remote(server.id.clone());
            }
            self.record_flush_attempt(&conversation, origin, None);
            self.pump_flush();
            self.release_replies(&id);
            return;
        }
        self.finish_attempt(id, conversation, origin, result);
    }

    fn finish_attempt(
        &mut self,
        id: MessageId,
        conversation: ConversationId,
        origin: SendOrigin,
        result: std::result::Result<ServerMessage, PersistenceFailure>,
    ) {
        let succeeded = match self.pipeline.complete(&mut self.state, &id, result) {
            SendOutcome::Confirmed {
                provisional,
                canonical,
                conversation_id,
                merged,
                requeued,
                server,
            } => {
                self.journal_remove(&provisional);
                for queued in &requeued {
                    self.journal_save(queued);
                }
                info!(provisional = %provisional, canonical = %canonical, merged, "Message sent");
                self.emit(EngineEvent::MessageReconciled {
                    conversation_id,
                    provisional,
                    canonical: canonical.clone(),
                });
                self.emit(EngineEvent::StatusChanged {
                    id: canonical.clone(),
                    status: MessageStatus::Sent,
                });
                self.emit_queue_len();
                self.after_confirmed(&canonical, &server);
                if !requeued.is_empty() && origin != SendOrigin::Flush {
                    // Queued replies can go now that their target is known.
                    self.start_flush(None);
                }
                Some(true)
            }
            SendOutcome::Failed { entry, failure } => {
                self.journal_save(entry.id());
                self.emit(EngineEvent::StatusChanged {
                    id: entry.id().clone(),
                    status: MessageStatus::Error,
                });
                self.emit_queue_len();
                if origin != SendOrigin::Flush {
                    if let Some(notice) = failure_notice(&failure) {
                        self.notifier.notify(notice);
                    }
                }
                // A reply queued behind its parent does not stop a running flush.
                match failure {
                    PersistenceFailure::ParentUnsent => None,
                    _ => Some(false),
                }
            }
            SendOutcome::Dropped => None,
        };
        self.record_flush_attempt(&conversation, origin, succeeded);
        self.pump_flush();
        self.release_replies(&id);
    }

    /// Follow-up calls once the server knows about a message.
    fn after_confirmed(&mut self, canonical: &MessageId, server: &ServerMessage) {
        let Some(message) = self.state.message(canonical) else {
            return;
        };
        let Some(canonical_id) = canonical.as_canonical().cloned() else {
            return;
        };

        if message.text != server.text {
            debug!(id = %canonical, "Edited while sending, pushing the edit");
            self.edit_remote(canonical_id, message.text.clone());
        }

        let update = self
            .state
            .directory()
            .get(&message.conversation_id)
            .and_then(|c| {
                Some(RoomUpdate {
                    last_message: c.last_message_preview.clone()?,
                    last_message_at: c.last_message_at?,
                })
            })
            .unwrap_or_else(|| RoomUpdate {
                last_message: message.preview(),
                last_message_at: message.created_at,
            });
        let api = Arc::clone(&self.api);
        let room = message.conversation_id.clone();
        self.spawn_remote(
            "update_room",
            async move { api.update_room(&room, &update).await },
            None,
        );

        if let Some(delay) = self.simulated_delivery {
            let reports = self.reports.clone();
            let id = canonical.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = reports.send(Report::DeliveryAck(id)).await;
            });
        }
    }

    fn delivery_ack(&mut self, id: MessageId) {
        let applied = self
            .state
            .apply_status_advance(&id, MessageStatus::Delivered)
            .is_some_and(|c| c.is_applied());
        if applied {
            self.emit(EngineEvent::StatusChanged {
                id,
                status: MessageStatus::Delivered,
            });
        }
    }

    // -- Offline queue --

    fn start_flush(&mut self, reply: Option<oneshot::Sender<FlushResult>>) {
        if let Some(run) = self.flush.as_mut() {
            debug!("Flush already running, joining it");
            run.waiters.extend(reply);
            return;
        }

        let queued = self.state.queue().len();
        if queued == 0 || !self.connectivity.is_connected() {
            if queued > 0 {
                debug!(queued, "Disconnected, skipping flush");
            }
            if let Some(reply) = reply {
                let _ = reply.send(FlushResult {
                    remaining: queued,
                    ..FlushResult::default()
                });
            }
            return;
        }

        info!(queued, "Flushing offline queue");
        self.flush = Some(FlushRun {
            waiters: reply.into_iter().collect(),
            ..FlushRun::default()
        });
        self.pump_flush();
    }

    fn record_flush_attempt(
        &mut self,
        conversation: &ConversationId,
        origin: SendOrigin,
        succeeded: Option<bool>,
    ) {
        let Some(run) = self.flush.as_mut() else {
            return;
        };
        if origin == SendOrigin::Flush {
            run.in_flight.remove(conversation);
            match succeeded {
                Some(true) => run.result.flushed += 1,
                Some(false) => {
                    run.result.failed += 1;
                    run.halted.insert(conversation.clone());
                }
                None => {}
            }
        } else if succeeded == Some(false) {
            run.halted.insert(conversation.clone());
        }
    }

    /// Dispatch the next entry of every idle conversation, or finish the run.
    fn pump_flush(&mut self) {
        let Some(mut run) = self.flush.take() else {
            return;
        };
        let mut waiting = false;

        if self.connectivity.is_connected() {
            for conversation in self.state.queue().conversations() {
                if run.halted.contains(&conversation) || run.in_flight.contains_key(&conversation) {
                    continue;
                }
                while let Some(next) = self
                    .state
                    .queue()
                    .next_for(&conversation)
                    .map(|e| e.id().clone())
                {
                    if self.in_flight.contains(&next) {
                        // A manual resend of this entry is running.
                        waiting = true;
                        break;
                    }
                    match self.state.begin_flush_entry(&next) {
                        Some(message) => {
                            self.emit(EngineEvent::StatusChanged {
                                id: next.clone(),
                                status: message.status,
                            });
                            run.in_flight.insert(conversation.clone(), next);
                            self.dispatch(message, SendOrigin::Flush);
                            break;
                        }
                        None => self.journal_remove(&next),
                    }
                }
            }
        }

        if run.in_flight.is_empty() && !waiting {
            self.finish_flush(run);
        } else {
            self.flush = Some(run);
        }
    }

    fn finish_flush(&mut self, run: FlushRun) {
        let mut result = run.result;
        result.remaining = self.state.queue().len();
        info!(
            flushed = result.flushed,
            failed = result.failed,
            remaining = result.remaining,
            "Offline queue flush finished"
        );

        if result.flushed > 0 {
            self.notifier.notify(Notification::success(format!(
                "{} queued message(s) sent",
                result.flushed
            )));
        }
        if result.failed > 0 {
            self.notifier.notify(Notification::warning(format!(
                "{} message(s) still waiting to be sent",
                result.remaining
            )));
        }
        self.emit(EngineEvent::FlushFinished { result });
        for waiter in run.waiters {
            let _ = waiter.send(result);
        }
    }

    fn connectivity_changed(&mut self, state: ConnectivityState) {
        let previous = std::mem::replace(&mut self.connectivity, state);
        if previous == state {
            return;
        }
        self.emit(EngineEvent::Connectivity { state });
        match state {
            ConnectivityState::Connected => {
                info!(queued = self.state.queue().len(), "Connectivity restored");
                self.start_flush(None);
            }
            ConnectivityState::Disconnected => warn!("Connectivity lost"),
        }
    }

    // -- Edits and deletes --

    fn edit(&mut self, id: MessageId, text: &str) -> Result<()> {
        let message = self.state.apply_edit(&id, text)?;
        self.emit(EngineEvent::MessageUpdated { id: id.clone() });
        self.emit(EngineEvent::ConversationsChanged);

        match id.as_canonical() {
            Some(canonical) => self.edit_remote(canonical.clone(), message.text),
            // Queued snapshots carry the edit; running attempts are fixed up
            // after reconciliation.
            None => self.journal_save(&id),
        }
        Ok(())
    }

    fn delete(&mut self, id: MessageId) -> Result<()> {
        let was_queued = self.state.queue().contains(&id);
        let (removed, detached) = self.state.remove_message(&id)?;
        info!(id = %id, conversation = %removed.conversation_id, "Deleted message");

        if was_queued {
            self.journal_remove(&id);
            self.emit_queue_len();
        }
        for queued in &detached {
            self.journal_save(queued);
        }
        self.emit(EngineEvent::MessageRemoved {
            conversation_id: removed.conversation_id,
            id: id.clone(),
        });
        self.emit(EngineEvent::ConversationsChanged);

        match &id {
            MessageId::Canonical(canonical) => self.delete_remote(canonical.clone()),
            MessageId::Provisional(_) if self.in_flight.contains(&id) => {
                self.deleted_in_flight.insert(id);
            }
            MessageId::Provisional(_) => self.release_replies(&id),
        }
        Ok(())
    }

    fn edit_remote(&self, id: CanonicalId, text: String) {
        let api = Arc::clone(&self.api);
        self.spawn_remote(
            "edit_message",
            async move { api.edit_message(&id, &EditMessageRequest { text }).await },
            Some("Edit could not be saved"),
        );
    }

    fn delete_remote(&self, id: CanonicalId) {
        let api = Arc::clone(&self.api);
        self.spawn_remote(
            "delete_message",
            async move { api.delete_message(&id).await },
            Some("Message could not be deleted on the server"),
        );
    }

    /// Best-effort backend call; failures are logged and optionally notified.
    fn spawn_remote<F>(&self, call: &'static str, fut: F, notice: Option<&'static str>)
    where
        F: Future<Output = std::result::Result<(), NetError>> + Send + 'static,
    {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            match fut.await {
                Ok(()) => debug!(call, "Backend call succeeded"),
                Err(e) => {
                    warn!(call, error = %e, "Backend call failed");
                    if let Some(message) = notice {
                        notifier.notify(Notification::error(message));
                    }
                }
            }
        });
    }

    // -- Journal and events --

    fn journal_save(&self, id: &MessageId) {
        let (Some(db), Some(entry)) = (&self.journal, self.state.queued_entry(id)) else {
            return;
        };
        if let Err(e) = db.save_entry(entry) {
            warn!(id = %id, error = %e, "Failed to journal queued message");
        }
    }

    fn journal_remove(&self, id: &MessageId) {
        if let Some(db) = &self.journal {
            if let Err(e) = db.remove_entry(id) {
                warn!(id = %id, error = %e, "Failed to remove message from journal");
            }
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_queue_len(&self) {
        self.emit(EngineEvent::QueueChanged {
            len: self.state.queue().len(),
        });
    }
}

fn failure_notice(failure: &PersistenceFailure) -> Option<Notification> {
    let notice = match failure {
        PersistenceFailure::Offline => Notification::warning(
            "You're offline. The message will be sent when the connection is restored.",
        ),
        PersistenceFailure::Timeout(_) => {
            Notification::error("Sending timed out. The message will be retried.")
        }
        PersistenceFailure::Backend(_) => {
            Notification::error("Message could not be sent. It will be retried.")
        }
        // The parent's own failure was already reported.
        PersistenceFailure::ParentUnsent => return None,
    };
    Some(notice)
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable entry point to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    async fn cast(&self, cmd: EngineCommand) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| EngineError::Stopped)
    }

    /// Insert `content` optimistically and start sending it.  Only
    /// validation problems are returned; send failures surface as status
    /// changes and notifications.
    pub async fn submit(
        &self,
        conversation: &ConversationId,
        content: OutgoingContent,
    ) -> Result<MessageId> {
        let conversation = conversation.clone();
        self.call(|reply| EngineCommand::Submit {
            conversation,
            content,
            reply,
        })
        .await?
    }

    pub async fn resend(&self, id: &MessageId) -> Result<()> {
        let id = id.clone();
        self.call(|reply| EngineCommand::Resend { id, reply }).await?
    }

    /// Replay the offline queue; joins a run that is already going.
    pub async fn flush(&self) -> Result<FlushResult> {
        self.call(EngineCommand::Flush).await
    }

    pub async fn set_draft(&self, conversation: &ConversationId, text: impl Into<String>) -> Result<()> {
        self.cast(EngineCommand::SetDraft {
            conversation: conversation.clone(),
            text: text.into(),
        })
        .await
    }

    pub async fn draft(&self, conversation: &ConversationId) -> Result<String> {
        let conversation = conversation.clone();
        self.call(|reply| EngineCommand::GetDraft {
            conversation,
            reply,
        })
        .await
    }

    /// Focus a conversation and get its draft back.
    pub async fn focus(&self, conversation: Option<&ConversationId>) -> Result<String> {
        let conversation = conversation.cloned();
        self.call(|reply| EngineCommand::Focus {
            conversation,
            reply,
        })
        .await
    }

    pub async fn toggle_reaction(&self, id: &MessageId, emoji: &str, reactor: &str) -> Result<bool> {
        let (id, emoji, reactor) = (id.clone(), emoji.to_string(), reactor.to_string());
        self.call(|reply| EngineCommand::ToggleReaction {
            id,
            emoji,
            reactor,
            reply,
        })
        .await?
    }

    pub async fn toggle_pin(&self, id: &MessageId) -> Result<bool> {
        let id = id.clone();
        self.call(|reply| EngineCommand::TogglePin { id, reply }).await?
    }

    pub async fn edit(&self, id: &MessageId, text: impl Into<String>) -> Result<()> {
        let (id, text) = (id.clone(), text.into());
        self.call(|reply| EngineCommand::Edit { id, text, reply }).await?
    }

    pub async fn delete(&self, id: &MessageId) -> Result<()> {
        let id = id.clone();
        self.call(|reply| EngineCommand::Delete { id, reply }).await?
    }

    pub async fn delivery_ack(&self, id: &MessageId) -> Result<()> {
        self.cast(EngineCommand::DeliveryAck(id.clone())).await
    }

    pub async fn counterpart_viewed(&self, conversation: &ConversationId) -> Result<()> {
        self.cast(EngineCommand::CounterpartViewed(conversation.clone()))
            .await
    }

    pub async fn receive(&self, message: ServerMessage) -> Result<()> {
        self.cast(EngineCommand::Receive(message)).await
    }

    /// Fetch `GET /rooms` into the directory; returns the number of rooms.
    pub async fn load_rooms(&self) -> Result<usize> {
        self.call(EngineCommand::LoadRooms).await?
    }

    /// Merge `GET /rooms/{id}/messages`; returns the conversation's size.
    pub async fn load_history(&self, conversation: &ConversationId) -> Result<usize> {
        let conversation = conversation.clone();
        self.call(|reply| EngineCommand::LoadHistory {
            conversation,
            reply,
        })
        .await?
    }

    pub async fn connectivity_changed(&self, state: ConnectivityState) -> Result<()> {
        self.cast(EngineCommand::ConnectivityChanged(state)).await
    }

    pub async fn set_presence(&self, conversation: &ConversationId, online: bool) -> Result<()> {
        self.cast(EngineCommand::SetPresence {
            conversation: conversation.clone(),
            online,
        })
        .await
    }

    pub async fn set_archived(&self, conversation: &ConversationId, archived: bool) -> Result<()> {
        self.cast(EngineCommand::SetArchived {
            conversation: conversation.clone(),
            archived,
        })
        .await
    }

    /// Sends and resends into a blocked conversation are rejected.
    pub async fn set_blocked(&self, conversation: &ConversationId, blocked: bool) -> Result<()> {
        self.cast(EngineCommand::SetBlocked {
            conversation: conversation.clone(),
            blocked,
        })
        .await
    }

    pub async fn messages(&self, conversation: &ConversationId) -> Result<Vec<Message>> {
        let conversation = conversation.clone();
        self.call(|reply| EngineCommand::GetMessages {
            conversation,
            reply,
        })
        .await
    }

    pub async fn message(&self, id: &MessageId) -> Result<Option<Message>> {
        let id = id.clone();
        self.call(|reply| EngineCommand::GetMessage { id, reply }).await
    }

    pub async fn conversations(&self, include_archived: bool) -> Result<Vec<ConversationSnapshot>> {
        self.call(|reply| EngineCommand::GetConversations {
            include_archived,
            reply,
        })
        .await
    }

    pub async fn queue(&self) -> Result<Vec<OfflineQueueEntry>> {
        self.call(EngineCommand::GetQueue).await
    }

    pub async fn connectivity(&self) -> Result<ConnectivityState> {
        self.call(EngineCommand::GetConnectivity).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.cast(EngineCommand::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelNotifier;
    use spotter_net::FakeChatApi;
    use spotter_shared::{NotificationKind, ValidationError};

    fn conv() -> ConversationId {
        ConversationId::new("client-42")
    }

    fn start(api: &Arc<FakeChatApi>, connectivity: ConnectivityState) -> (EngineHandle, mpsc::UnboundedReceiver<Notification>) {
        let (notifier, notifications) = ChannelNotifier::new();
        let config = ClientConfig {
            sender_id: "coach".into(),
            ..ClientConfig::default()
        };
        let handle = EngineBuilder::new(api.clone(), config)
            .notifier(Arc::new(notifier))
            .connectivity(connectivity)
            .spawn();
        (handle, notifications)
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<EngineEvent>,
        pred: impl Fn(&EngineEvent) -> bool,
    ) -> EngineEvent {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn submit_reconciles_and_updates_room() {
        let api = Arc::new(FakeChatApi::new());
        let (engine, _n) = start(&api, ConnectivityState::Connected);
        let mut events = engine.subscribe();

        let id = engine.submit(&conv(), OutgoingContent::text("Hi")).await.unwrap();
        let event = wait_for(&mut events, |e| matches!(e, EngineEvent::MessageReconciled { .. })).await;
        let EngineEvent::MessageReconciled { provisional, canonical, .. } = event else {
            unreachable!()
        };
        assert_eq!(provisional, id);

        let stored = engine.message(&canonical).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
        assert!(engine.message(&id).await.unwrap().is_none());
        assert!(engine.queue().await.unwrap().is_empty());

        tokio::task::yield_now().await;
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn validation_errors_are_returned() {
        let api = Arc::new(FakeChatApi::new());
        let (engine, _n) = start(&api, ConnectivityState::Connected);
        let err = engine.submit(&conv(), OutgoingContent::text("")).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(engine.messages(&conv()).await.unwrap().is_empty());
        assert_eq!(api.post_attempts(), 0);
    }

    #[tokio::test]
    async fn offline_submit_warns_and_skips_network() {
        let api = Arc::new(FakeChatApi::new());
        let (engine, mut notifications) = start(&api, ConnectivityState::Disconnected);

        let id = engine.submit(&conv(), OutgoingContent::text("Hi")).await.unwrap();
        let m = engine.message(&id).await.unwrap().unwrap();
        assert_eq!(m.status, MessageStatus::Error);
        assert_eq!(engine.queue().await.unwrap().len(), 1);
        assert_eq!(api.post_attempts(), 0);
        assert_eq!(notifications.recv().await.unwrap().kind, NotificationKind::Warning);
    }

    #[tokio::test]
    async fn backend_failure_notifies_error() {
        let api = Arc::new(FakeChatApi::new());
        api.fail_next_posts(1);
        let (engine, mut notifications) = start(&api, ConnectivityState::Connected);
        let mut events = engine.subscribe();

        let id = engine.submit(&conv(), OutgoingContent::text("Hi")).await.unwrap();
        wait_for(&mut events, |e| {
            matches!(e, EngineEvent::StatusChanged { status: MessageStatus::Error, .. })
        })
        .await;
        assert_eq!(notifications.recv().await.unwrap().kind, NotificationKind::Error);

        engine.resend(&id).await.unwrap();
        wait_for(&mut events, |e| matches!(e, EngineEvent::MessageReconciled { .. })).await;
        assert!(engine.queue().await.unwrap().is_empty());
        assert_eq!(api.persisted().len(), 1);
    }

    #[tokio::test]
    async fn flushing_empty_queue_is_a_noop() {
        let api = Arc::new(FakeChatApi::new());
        let (engine, _n) = start(&api, ConnectivityState::Connected);
        assert_eq!(engine.flush().await.unwrap(), FlushResult::default());
        assert_eq!(engine.flush().await.unwrap(), FlushResult::default());
        assert_eq!(api.post_attempts(), 0);
    }

    #[tokio::test]
    async fn delete_during_send_removes_remotely() {
        let api = Arc::new(FakeChatApi::new());
        api.hold_posts(true);
        let (engine, _n) = start(&api, ConnectivityState::Connected);
        let mut events = engine.subscribe();

        let id = engine.submit(&conv(), OutgoingContent::text("oops")).await.unwrap();
        api.wait_for_held(1).await;
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::MessageInserted { .. }
        ));
        engine.delete(&id).await.unwrap();
        assert!(api.release("oops", true));

        // The drop is silent; wait until the remote delete lands.
        while api.deletes().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(engine.messages(&conv()).await.unwrap().is_empty());
        assert!(engine.queue().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_delivery_advances_status() {
        let api = Arc::new(FakeChatApi::new());
        let config = ClientConfig {
            sender_id: "coach".into(),
            simulated_delivery: Some(Duration::from_secs(2)),
            ..ClientConfig::default()
        };
        let engine = EngineBuilder::new(api.clone(), config)
            .connectivity(ConnectivityState::Connected)
            .spawn();
        let mut events = engine.subscribe();

        engine.submit(&conv(), OutgoingContent::text("Hi")).await.unwrap();
        let event = wait_for(&mut events, |e| {
            matches!(e, EngineEvent::StatusChanged { status: MessageStatus::Delivered, .. })
        })
        .await;
        let EngineEvent::StatusChanged { id, .. } = event else {
            unreachable!()
        };

        engine.counterpart_viewed(&conv()).await.unwrap();
        let m = engine.message(&id).await.unwrap().unwrap();
        assert_eq!(m.status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn edit_of_sent_message_reaches_backend() {
        let api = Arc::new(FakeChatApi::new());
        let (engine, _n) = start(&api, ConnectivityState::Connected);
        let mut events = engine.subscribe();

        engine.submit(&conv(), OutgoingContent::text("tpyo")).await.unwrap();
        let EngineEvent::MessageReconciled { canonical, .. } =
            wait_for(&mut events, |e| matches!(e, EngineEvent::MessageReconciled { .. })).await
        else {
            unreachable!()
        };

        engine.edit(&canonical, "typo").await.unwrap();
        while api.edits().is_empty() {
            tokio::task::yield_now().await;
        }
        let (id, text) = api.edits().remove(0);
        assert_eq!(MessageId::Canonical(id), canonical);
        assert_eq!(text, "typo");
        assert!(engine.message(&canonical).await.unwrap().unwrap().is_edited);
    }

    #[tokio::test]
    async fn reply_waits_for_its_parent_to_be_confirmed() {
        let api = Arc::new(FakeChatApi::new());
        api.hold_posts(true);
        let (engine, _n) = start(&api, ConnectivityState::Connected);
        let mut events = engine.subscribe();

        let parent = engine.submit(&conv(), OutgoingContent::text("parent")).await.unwrap();
        let child = engine
            .submit(&conv(), OutgoingContent::text("child").replying_to(parent.clone()))
            .await
            .unwrap();
        api.wait_for_held(1).await;

        // Only the parent is on the wire.
        assert!(!api.release("child", true));
        assert_eq!(api.held_count(), 1);
        let held = engine.message(&child).await.unwrap().unwrap();
        assert_eq!(held.status, MessageStatus::Sending);

        assert!(api.release("parent", true));
        let EngineEvent::MessageReconciled { canonical, .. } = wait_for(&mut events, |e| {
            matches!(e, EngineEvent::MessageReconciled { provisional, .. } if *provisional == parent)
        })
        .await
        else {
            unreachable!()
        };
        api.wait_for_held(1).await;
        assert!(api.release("child", true));
        wait_for(&mut events, |e| {
            matches!(e, EngineEvent::MessageReconciled { provisional, .. } if *provisional == child)
        })
        .await;

        let persisted = api.persisted();
        assert_eq!(persisted[0].text, "parent");
        assert_eq!(persisted[1].text, "child");
        assert_eq!(persisted[1].reply_to_id.as_ref(), canonical.as_canonical());
    }

    #[tokio::test]
    async fn reply_to_a_failed_parent_is_queued_behind_it() {
        let api = Arc::new(FakeChatApi::new());
        api.hold_posts(true);
        let (engine, mut notifications) = start(&api, ConnectivityState::Connected);

        let parent = engine.submit(&conv(), OutgoingContent::text("parent")).await.unwrap();
        engine
            .submit(&conv(), OutgoingContent::text("child").replying_to(parent.clone()))
            .await
            .unwrap();
        api.wait_for_held(1).await;
        assert!(api.release("parent", false));

        assert_eq!(notifications.recv().await.unwrap().kind, NotificationKind::Error);
        let queued: Vec<_> = engine
            .queue()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message.text)
            .collect();
        assert_eq!(queued, vec!["parent", "child"]);
        assert_eq!(api.post_attempts(), 1);

        api.hold_posts(false);
        let result = engine.flush().await.unwrap();
        assert_eq!(result.flushed, 2);
        // One summary, nothing per message for the held-back reply.
        assert_eq!(notifications.recv().await.unwrap().kind, NotificationKind::Success);
        assert!(notifications.try_recv().is_err());

        let messages = engine.messages(&conv()).await.unwrap();
        let persisted = api.persisted();
        assert_eq!(persisted[1].reply_to_id.as_ref(), messages[0].id.as_canonical());
        assert_eq!(messages[1].reply_to, Some(messages[0].id.clone()));
    }

    #[tokio::test]
    async fn directory_flags_are_applied() {
        let api = Arc::new(FakeChatApi::new());
        let (engine, _n) = start(&api, ConnectivityState::Connected);

        engine.set_presence(&conv(), true).await.unwrap();
        let listed = engine.conversations(false).await.unwrap();
        assert!(listed[0].conversation.is_online);

        engine.set_blocked(&conv(), true).await.unwrap();
        let err = engine.submit(&conv(), OutgoingContent::text("hi")).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::ConversationBlocked(_))
        ));
        assert_eq!(api.post_attempts(), 0);

        engine.set_archived(&conv(), true).await.unwrap();
        assert!(engine.conversations(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stopped_engine_reports_stopped() {
        let api = Arc::new(FakeChatApi::new());
        let (engine, _n) = start(&api, ConnectivityState::Connected);
        engine.shutdown().await.unwrap();
        while !engine.tx.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(engine.queue().await, Err(EngineError::Stopped)));
    }
}
