//! The event union consumed by the store.
//!
//! Backend-pushed protocol events and upload-orchestrator lifecycle events
//! share this vocabulary so the reducer treats both sources uniformly.

use chrono::{DateTime, Utc};

use crate::types::{
    Attachment, AttachmentId, Conversation, ConversationId, Message, MessageId, Role, ToolCallId,
};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConversationCreated {
        conversation: Conversation,
    },
    ConversationUpdated {
        conversation: Conversation,
    },
    ConversationArchived {
        conversation_id: ConversationId,
    },

    /// Legacy single-shot message delivery, still emitted by older backends.
    MessageCreated {
        message: Message,
    },

    TextMessageStart {
        message_id: MessageId,
        /// Defaults to the active conversation when the backend omits it.
        conversation_id: Option<ConversationId>,
        role: Role,
        created_at: Option<DateTime<Utc>>,
    },
    TextMessageContent {
        message_id: MessageId,
        delta: String,
    },
    TextMessageEnd {
        message_id: MessageId,
    },
    MessageErrored {
        message_id: MessageId,
        error: String,
    },
    MessageCanceled {
        message_id: MessageId,
    },

    ToolCallStart {
        tool_call_id: ToolCallId,
        name: String,
        message_id: MessageId,
        conversation_id: Option<ConversationId>,
    },
    ToolCallArgs {
        tool_call_id: ToolCallId,
        delta: String,
    },
    ToolCallEnd {
        tool_call_id: ToolCallId,
    },
    ToolCallResult {
        tool_call_id: ToolCallId,
        message_id: Option<MessageId>,
        conversation_id: Option<ConversationId>,
        content: String,
    },

    AttachmentUploading {
        attachment: Attachment,
    },
    AttachmentProgress {
        attachment_id: AttachmentId,
        progress: f64,
    },
    AttachmentAvailable {
        attachment: Attachment,
    },
    AttachmentFailed {
        attachment_id: AttachmentId,
        error: String,
    },

    StateSnapshot {
        conversation_id: Option<ConversationId>,
        state: serde_json::Map<String, serde_json::Value>,
    },
}

impl ClientEvent {
    /// Stable kind tag, matching the wire vocabulary. Useful for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConversationCreated { .. } => "conversation.created",
            Self::ConversationUpdated { .. } => "conversation.updated",
            Self::ConversationArchived { .. } => "conversation.archived",
            Self::MessageCreated { .. } => "message.created",
            Self::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            Self::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            Self::MessageErrored { .. } => "message.errored",
            Self::MessageCanceled { .. } => "message.canceled",
            Self::ToolCallStart { .. } => "TOOL_CALL_START",
            Self::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            Self::ToolCallEnd { .. } => "TOOL_CALL_END",
            Self::ToolCallResult { .. } => "TOOL_CALL_RESULT",
            Self::AttachmentUploading { .. } => "attachment.uploading",
            Self::AttachmentProgress { .. } => "attachment.progress",
            Self::AttachmentAvailable { .. } => "attachment.available",
            Self::AttachmentFailed { .. } => "attachment.failed",
            Self::StateSnapshot { .. } => "STATE_SNAPSHOT",
        }
    }
}
