use thiserror::Error;

use crate::types::{ConversationId, MessageId, MessageStatus};

/// Rejections surfaced synchronously to the caller.  None of these mutate
/// engine state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message has neither text nor an attached payload")]
    EmptyContent,

    #[error("A {0:?} message needs an attached payload")]
    MissingPayload(crate::types::MessageType),

    #[error("Reply target {reply_to} is not part of conversation {conversation}")]
    UnknownReplyTarget {
        conversation: ConversationId,
        reply_to: MessageId,
    },

    #[error("Message id already in use: {0}")]
    DuplicateId(MessageId),

    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),

    #[error("Message {id} is {status}; only failed messages can be resent")]
    NotResendable { id: MessageId, status: MessageStatus },

    #[error("Edited text must not be empty")]
    EmptyEdit,

    #[error("Conversation {0} is blocked")]
    ConversationBlocked(ConversationId),
}
