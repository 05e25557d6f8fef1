//! Stable client-facing vocabulary for the Palaver chat state layer.
//!
//! Downstream crates import entity types, the event union, and the transport
//! traits from here rather than reaching into `palaver-core` internals.

pub mod error;
pub mod event;
pub mod transport;
pub mod types;
pub mod wire;

pub use error::{ApiError, DecodeError, ProtocolViolation, TransferError};
pub use event::ClientEvent;
pub use transport::{
    ChatTransport, ProgressFn, SendMessageOptions, TransferOptions, TransferProgress,
    UploadTransport,
};
pub use types::{
    AgentState, Attachment, AttachmentId, AttachmentState, Conversation, ConversationId,
    ConversationStatus, FinalizedUpload, Message, MessageId, MessageStatus, Role, ToolCall,
    ToolCallId, UploadTicket,
};
pub use wire::decode_event;

/// Prefix used for ids generated on the client before the backend has issued
/// a canonical id. Reconciliation treats messages and attachments carrying
/// this prefix as optimistic entries.
pub const CLIENT_ID_PREFIX: &str = "local-";
