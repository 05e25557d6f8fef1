//! Transport traits consumed by the store and the upload orchestrator.
//!
//! The store treats the backend purely as a small set of imperative request
//! methods plus an injected stream of [`crate::ClientEvent`]s; concrete
//! implementations (HTTP, in-process fakes) live elsewhere.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, TransferError};
use crate::types::{
    Attachment, AttachmentId, Conversation, ConversationId, FinalizedUpload, Message, MessageId,
    UploadTicket,
};

/// Options accompanying a `send_message` call.
#[derive(Debug, Clone, Default)]
pub struct SendMessageOptions {
    pub attachments: Vec<Attachment>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Byte-level progress of an in-flight transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
    pub loaded: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.loaded as f64 / self.total as f64) * 100.0
    }
}

pub type ProgressFn = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Options for the transfer phase of an upload.
#[derive(Clone)]
pub struct TransferOptions {
    pub on_progress: Option<ProgressFn>,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl TransferOptions {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            on_progress: None,
            timeout: Self::DEFAULT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOptions")
            .field("has_progress", &self.on_progress.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Imperative request surface of the chat backend.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    async fn create_conversation(&self, title: Option<String>) -> Result<Conversation, ApiError>;

    async fn update_conversation(
        &self,
        conversation_id: &ConversationId,
        title: Option<String>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Conversation, ApiError>;

    async fn archive_conversation(&self, conversation_id: &ConversationId)
    -> Result<(), ApiError>;

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ApiError>;

    /// `None` for the conversation id signals "create implicitly"; the store
    /// relies on a subsequent `conversation.created` event to learn the id.
    async fn send_message(
        &self,
        conversation_id: Option<&ConversationId>,
        text: &str,
        options: SendMessageOptions,
    ) -> Result<(), ApiError>;

    async fn cancel_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<(), ApiError>;

    /// Hint to the backend which thread subsequent events should target.
    async fn set_active_thread(&self, conversation_id: &ConversationId) -> Result<(), ApiError>;
}

/// I/O capability for the three-phase upload protocol. The transfer method
/// must support byte-level progress reporting; plain request/response
/// abstractions without upload-progress visibility are insufficient here.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn initiate_upload(
        &self,
        owner_type: &str,
        file_name: &str,
        mime_type: &str,
    ) -> Result<UploadTicket, ApiError>;

    async fn transfer(
        &self,
        url: &str,
        bytes: Vec<u8>,
        options: TransferOptions,
    ) -> Result<(), TransferError>;

    async fn finalize_upload(
        &self,
        content_id: &AttachmentId,
    ) -> Result<FinalizedUpload, ApiError>;
}
