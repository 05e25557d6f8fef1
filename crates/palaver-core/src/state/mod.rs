//! State modules for the store layer.

pub mod chat_store;
pub use chat_store::{ChatStore, ToolCallInProgress};

pub mod projections;
pub use projections::{
    Memo, active_conversation_attachments, active_conversations, conversation_messages,
    is_any_streaming, suggested_questions,
};
