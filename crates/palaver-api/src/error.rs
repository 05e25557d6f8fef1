//! Error types for the client-facing API surface.

use std::time::Duration;

use thiserror::Error;

use crate::types::{MessageId, ToolCallId};

/// Failure of an imperative backend call (non-2xx response or transport
/// breakage before a response was obtained).
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed with status {status}: {message}")]
    Status {
        status: u16,
        message: String,
        /// Parsed error body when the backend returned one.
        body: Option<serde_json::Value>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure of the byte-transfer phase of an upload.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("transfer rejected with status {status}")]
    Status { status: u16 },

    #[error("network error during transfer: {0}")]
    Network(String),

    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),

    #[error("transfer canceled")]
    Canceled,
}

/// Failure to decode a wire event envelope into the typed union.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unknown event kind: {kind}")]
    UnknownKind { kind: String },

    #[error("malformed event payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event envelope has no type tag")]
    MissingKind,
}

/// An event that references state the store does not have. Violations are
/// logged and counted, never fatal: the chat experience stays available even
/// when the backend misbehaves.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("TOOL_CALL_END for unknown tool call {tool_call_id}")]
    ToolCallEndWithoutStart { tool_call_id: ToolCallId },

    #[error("TOOL_CALL_ARGS for unknown tool call {tool_call_id}")]
    ToolCallArgsWithoutStart { tool_call_id: ToolCallId },

    #[error("content delta for unknown message {message_id}")]
    DeltaForUnknownMessage { message_id: MessageId },

    #[error("terminal event for unknown message {message_id}")]
    EndForUnknownMessage { message_id: MessageId },
}
