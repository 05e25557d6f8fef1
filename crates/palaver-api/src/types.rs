//! Entity types shared between the store and its consumers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier for a conversation thread.
    ConversationId
);
string_id!(
    /// Identifier for a single message, unique across the whole store.
    MessageId
);
string_id!(
    /// Identifier for a tool invocation.
    ToolCallId
);
string_id!(
    /// Identifier for an attachment. Transitions from a client-generated
    /// temporary value to a backend-issued content id once the initiate
    /// phase responds.
    AttachmentId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
}

/// A thread of messages between a user and an agent. Conversations are never
/// physically removed from the store; archiving flips the status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: ConversationStatus,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Pending,
    Streaming,
    Completed,
    Errored,
    Canceled,
}

impl MessageStatus {
    /// Terminal statuses freeze the message content.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Canceled)
    }
}

/// A finalized tool invocation attached to an assistant message. Arguments
/// are kept as the raw accumulated string; callers parse when needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: String,
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub status: MessageStatus,
    /// Absent timestamps sort as the epoch during bulk-load reconciliation.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Role::Tool` messages carrying a tool result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
}

impl Message {
    /// Sort key for bulk-load reconciliation.
    pub fn sort_timestamp(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttachmentState {
    #[default]
    Pending,
    Uploading,
    Uploaded,
    Available,
    Failed,
}

impl AttachmentState {
    /// Ordering used to prevent silent regressions: `available` never drops
    /// back to an earlier phase via a merge.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Uploading => 1,
            Self::Uploaded => 2,
            Self::Available => 3,
            // Failed is an explicit terminal override, ranked above all.
            Self::Failed => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: AttachmentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<AttachmentId>,
    pub name: String,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    #[serde(default)]
    pub state: AttachmentState,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Per-conversation, backend-owned key-value bag synchronized via snapshot
/// events. The attachment registry is the one slice the store reads and
/// writes with typed semantics; everything else is carried opaquely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attachments: HashMap<AttachmentId, Attachment>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AgentState {
    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty() && self.extra.is_empty()
    }

    /// Shallow key-by-key merge of a snapshot payload. Keys absent from the
    /// snapshot keep their previous values; the attachment slice is merged
    /// per id rather than replaced.
    pub fn merge_snapshot(&mut self, snapshot: serde_json::Map<String, serde_json::Value>) {
        for (key, value) in snapshot {
            if key == "attachments" {
                if let Ok(attachments) =
                    serde_json::from_value::<HashMap<AttachmentId, Attachment>>(value)
                {
                    for attachment in attachments.into_values() {
                        self.upsert_attachment(attachment);
                    }
                }
            } else {
                self.extra.insert(key, value);
            }
        }
    }

    /// Insert or merge one attachment, keyed by its final id. An entry whose
    /// state is further along (e.g. `available`) is never regressed by an
    /// earlier-phase copy; metadata from the incoming copy still merges in.
    pub fn upsert_attachment(&mut self, incoming: Attachment) {
        if let Some(temp_id) = &incoming.client_temp_id {
            // A backend-issued id supersedes the temporary bookkeeping key.
            if temp_id != &incoming.id {
                self.attachments.remove(temp_id);
            }
        }
        match self.attachments.get_mut(&incoming.id) {
            Some(existing) if incoming.state.rank() < existing.state.rank() => {
                for (k, v) in incoming.metadata {
                    existing.metadata.entry(k).or_insert(v);
                }
            }
            _ => {
                self.attachments.insert(incoming.id.clone(), incoming);
            }
        }
    }
}

/// Response from the initiate phase of an upload: a backend-issued content id
/// plus a presigned destination for the byte transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub content_id: AttachmentId,
    pub upload_url: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Response from the finalize phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedUpload {
    pub content_id: AttachmentId,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub mime_type: String,
}
