//! Outbound signals: user-facing notifications and engine state events.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use spotter_shared::constants::{NOTIFY_ERROR, NOTIFY_INFO, NOTIFY_SUCCESS, NOTIFY_WARNING};
use spotter_shared::{ConnectivityState, ConversationId, MessageId, MessageStatus, NotificationKind};
use spotter_store::FlushResult;

/// A toast for the UI; the engine never renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    /// Auto-dismiss after this long.
    pub duration: Duration,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        let duration = match kind {
            NotificationKind::Success => NOTIFY_SUCCESS,
            NotificationKind::Info => NOTIFY_INFO,
            NotificationKind::Warning => NOTIFY_WARNING,
            NotificationKind::Error => NOTIFY_ERROR,
        };
        Self {
            kind,
            message: message.into(),
            duration,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, message)
    }
}

/// Notification collaborator.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Logs notifications; the default when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: Notification) {
        match n.kind {
            NotificationKind::Error => tracing::error!(message = %n.message, "notification"),
            NotificationKind::Warning => tracing::warn!(message = %n.message, "notification"),
            NotificationKind::Success | NotificationKind::Info => {
                tracing::info!(message = %n.message, "notification")
            }
        }
    }
}

/// Forwards notifications into a channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("Notification receiver dropped");
        }
    }
}

/// State changes broadcast to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    MessageInserted {
        conversation_id: ConversationId,
        id: MessageId,
    },
    MessageReconciled {
        conversation_id: ConversationId,
        provisional: MessageId,
        canonical: MessageId,
    },
    StatusChanged {
        id: MessageId,
        status: MessageStatus,
    },
    /// Text, reactions or pin changed.
    MessageUpdated {
        id: MessageId,
    },
    MessageRemoved {
        conversation_id: ConversationId,
        id: MessageId,
    },
    /// A history page was merged into a conversation.
    HistoryMerged {
        conversation_id: ConversationId,
    },
    ConversationsChanged,
    QueueChanged {
        len: usize,
    },
    Connectivity {
        state: ConnectivityState,
    },
    FlushFinished {
        result: FlushResult,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_follow_kind() {
        assert_eq!(Notification::error("x").duration, NOTIFY_ERROR);
        assert_eq!(Notification::success("x").duration, NOTIFY_SUCCESS);
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let event = EngineEvent::StatusChanged {
            id: MessageId::canonical("srv-1"),
            status: MessageStatus::Delivered,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "statusChanged");
        assert_eq!(json["status"], "delivered");
    }

    #[test]
    fn channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Notification::warning("offline"));
        let got = rx.try_recv().unwrap();
        assert_eq!(got.kind, NotificationKind::Warning);
        assert_eq!(got.message, "offline");
    }
}
