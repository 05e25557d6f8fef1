//! ChatStore - canonical conversation/message/attachment/agent-state model.
//!
//! The store is the sole owner of canonical state. Event processors and the
//! session's imperative operations mutate it; everything else reads. Every
//! mutation bumps a revision counter that read projections diff against.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use palaver_api::{
    AgentState, Attachment, AttachmentId, AttachmentState, CLIENT_ID_PREFIX, Conversation,
    ConversationId, ConversationStatus, Message, MessageId, MessageStatus, ProtocolViolation,
    Role, ToolCall, ToolCallId,
};

/// A tool invocation whose name/arguments are still arriving incrementally.
/// Consumed and removed when the terminal TOOL_CALL_END is processed.
#[derive(Debug, Clone)]
pub struct ToolCallInProgress {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: String,
    pub message_id: MessageId,
}

#[derive(Debug, Default)]
pub struct ChatStore {
    /// All known conversations in arrival order. Never shrinks; archiving
    /// flips the status.
    conversations: IndexMap<ConversationId, Conversation>,
    /// Every message, unique by id across all conversations.
    messages: HashMap<MessageId, Message>,
    /// Ordered message ids per conversation. Insertion order, re-sorted by
    /// created_at after any bulk load.
    sequences: HashMap<ConversationId, Vec<MessageId>>,
    /// Accumulating text per mid-stream message. An entry exists iff the
    /// message status is `Streaming`.
    streaming: HashMap<MessageId, String>,
    /// Tool calls whose args are still accumulating, keyed by tool call id.
    pending_tool_calls: HashMap<ToolCallId, ToolCallInProgress>,
    /// Global attachment view for active-upload UI feedback. Cleared on
    /// conversation switch; the per-conversation AgentState copy is the
    /// durable home.
    attachments: IndexMap<AttachmentId, Attachment>,
    /// Per-conversation agent state, persisted across conversation switches.
    agent_state: HashMap<ConversationId, AgentState>,
    active_conversation_id: Option<ConversationId>,
    loaded_conversations: HashSet<ConversationId>,
    loading_conversations: HashSet<ConversationId>,
    /// Revision number for dirty tracking
    revision: u64,
    /// Bumped whenever per-conversation agent state changes; the session
    /// uses it to schedule debounced cache writes.
    agent_state_revision: u64,
    protocol_violations: u64,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the per-conversation agent-state map, used once at construction
    /// from the persistence cache.
    pub fn restore_agent_state(&mut self, state: HashMap<ConversationId, AgentState>) {
        self.agent_state = state;
        self.revision += 1;
    }

    /// Get current revision number for dirty tracking
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn agent_state_revision(&self) -> u64 {
        self.agent_state_revision
    }

    pub fn protocol_violations(&self) -> u64 {
        self.protocol_violations
    }

    /// Record a protocol violation: logged and counted, never fatal.
    pub fn record_violation(&mut self, violation: &ProtocolViolation) {
        tracing::warn!(target: "store.protocol", "protocol violation: {violation}");
        self.protocol_violations += 1;
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn touch_agent_state(&mut self) {
        self.revision += 1;
        self.agent_state_revision += 1;
    }

    // ---- conversations ------------------------------------------------

    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.values()
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Wholesale replacement from a full list fetch. Later events still
    /// patch individual entries.
    pub fn replace_conversations(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        self.touch();
    }

    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        self.conversations
            .insert(conversation.id.clone(), conversation);
        self.touch();
    }

    pub fn mark_archived(&mut self, id: &ConversationId) {
        if let Some(conversation) = self.conversations.get_mut(id) {
            conversation.status = ConversationStatus::Archived;
            self.touch();
        }
    }

    pub fn active_conversation_id(&self) -> Option<&ConversationId> {
        self.active_conversation_id.as_ref()
    }

    /// Switch the active conversation. Clears the global attachment view;
    /// the per-conversation AgentState copies are retained.
    pub fn set_active_conversation(&mut self, id: ConversationId) {
        if self.active_conversation_id.as_ref() == Some(&id) {
            return;
        }
        self.active_conversation_id = Some(id);
        self.attachments.clear();
        self.touch();
    }

    /// Adopt a conversation id as active when none is set yet, without
    /// clearing the global attachment view. Used when an implicit create
    /// (send with no conversation) is confirmed by `conversation.created`.
    pub fn adopt_active_if_unset(&mut self, id: &ConversationId) {
        if self.active_conversation_id.is_none() {
            self.active_conversation_id = Some(id.clone());
            self.touch();
        }
    }

    // ---- messages -----------------------------------------------------

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn message_ids(&self, conversation_id: &ConversationId) -> &[MessageId] {
        self.sequences
            .get(conversation_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Messages of one conversation in sequence order.
    pub fn conversation_messages(&self, conversation_id: &ConversationId) -> Vec<&Message> {
        self.message_ids(conversation_id)
            .iter()
            .filter_map(|id| self.messages.get(id))
            .collect()
    }

    fn push_sequence(&mut self, conversation_id: &ConversationId, message_id: &MessageId) {
        let sequence = self.sequences.entry(conversation_id.clone()).or_default();
        if !sequence.contains(message_id) {
            sequence.push(message_id.clone());
        }
    }

    /// Insert or replace a message and ensure it appears exactly once in its
    /// conversation's sequence.
    pub fn upsert_message(&mut self, message: Message) {
        let conversation_id = message.conversation_id.clone();
        let message_id = message.id.clone();
        self.push_sequence(&conversation_id, &message_id);
        self.messages.insert(message_id, message);
        self.touch();
    }

    /// Open a streaming message. Idempotent: a duplicate START for the same
    /// id leaves exactly one sequence entry and does not reset the buffer.
    pub fn begin_streaming(
        &mut self,
        message_id: MessageId,
        conversation_id: ConversationId,
        role: Role,
        created_at: Option<DateTime<Utc>>,
    ) {
        if !self.messages.contains_key(&message_id) {
            self.messages.insert(
                message_id.clone(),
                Message {
                    id: message_id.clone(),
                    role,
                    content: String::new(),
                    conversation_id: conversation_id.clone(),
                    status: MessageStatus::Streaming,
                    created_at: created_at.or_else(|| Some(Utc::now())),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                },
            );
            self.streaming.insert(message_id.clone(), String::new());
        }
        self.push_sequence(&conversation_id, &message_id);
        self.touch();
    }

    /// Append a content delta to the streaming buffer. Message content is
    /// untouched until the flush at END, so N deltas cost O(N) not O(N^2).
    pub fn append_stream_delta(&mut self, message_id: &MessageId, delta: &str) {
        if let Some(buffer) = self.streaming.get_mut(message_id) {
            buffer.push_str(delta);
            self.touch();
            return;
        }
        match self.messages.get(message_id) {
            Some(message) if message.status == MessageStatus::Streaming => {
                self.streaming
                    .insert(message_id.clone(), delta.to_string());
                self.touch();
            }
            _ => {
                let violation = ProtocolViolation::DeltaForUnknownMessage {
                    message_id: message_id.clone(),
                };
                self.record_violation(&violation);
            }
        }
    }

    /// Terminal END: flush the buffer into the message (only when non-empty,
    /// so content set by other paths is not clobbered), drop the buffer, and
    /// mark the message completed.
    pub fn end_streaming(&mut self, message_id: &MessageId) {
        let buffer = self.streaming.remove(message_id);
        let Some(message) = self.messages.get_mut(message_id) else {
            let violation = ProtocolViolation::EndForUnknownMessage {
                message_id: message_id.clone(),
            };
            self.record_violation(&violation);
            return;
        };
        if let Some(buffer) = buffer {
            if !buffer.is_empty() {
                message.content = buffer;
            }
        }
        message.status = MessageStatus::Completed;
        self.touch();
    }

    /// Mark a message errored, independent of buffer state. Any unflushed
    /// partial text is discarded with the buffer.
    pub fn fail_message(&mut self, message_id: &MessageId, error: &str) {
        self.streaming.remove(message_id);
        let Some(message) = self.messages.get_mut(message_id) else {
            let violation = ProtocolViolation::EndForUnknownMessage {
                message_id: message_id.clone(),
            };
            self.record_violation(&violation);
            return;
        };
        tracing::debug!(target: "store.message", "message {message_id} errored: {error}");
        message.status = MessageStatus::Errored;
        self.touch();
    }

    /// Cancel a message. The flush-then-cancel ordering is load-bearing:
    /// partial streamed text must survive into the canceled message so the
    /// UI can keep displaying it.
    pub fn cancel_message(&mut self, message_id: &MessageId) {
        let buffer = self.streaming.remove(message_id);
        let Some(message) = self.messages.get_mut(message_id) else {
            let violation = ProtocolViolation::EndForUnknownMessage {
                message_id: message_id.clone(),
            };
            self.record_violation(&violation);
            return;
        };
        if let Some(buffer) = buffer {
            if !buffer.is_empty() {
                message.content = buffer;
            }
        }
        message.status = MessageStatus::Canceled;
        self.touch();
    }

    pub fn is_streaming(&self, message_id: &MessageId) -> bool {
        self.streaming.contains_key(message_id)
    }

    pub fn any_streaming(&self) -> bool {
        !self.streaming.is_empty()
    }

    // ---- tool calls ---------------------------------------------------

    pub fn pending_tool_call(&self, id: &ToolCallId) -> Option<&ToolCallInProgress> {
        self.pending_tool_calls.get(id)
    }

    /// Open a tool call. Backends that omit an explicit parent-message START
    /// for tool-invoking turns get a synthesized placeholder assistant
    /// message so the call has somewhere to land.
    pub fn start_tool_call(
        &mut self,
        tool_call_id: ToolCallId,
        name: String,
        message_id: MessageId,
        conversation_id: ConversationId,
    ) {
        if !self.messages.contains_key(&message_id) {
            self.messages.insert(
                message_id.clone(),
                Message {
                    id: message_id.clone(),
                    role: Role::Assistant,
                    content: String::new(),
                    conversation_id: conversation_id.clone(),
                    status: MessageStatus::Completed,
                    created_at: Some(Utc::now()),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                },
            );
            self.push_sequence(&conversation_id, &message_id);
        }
        self.pending_tool_calls
            .entry(tool_call_id.clone())
            .or_insert(ToolCallInProgress {
                id: tool_call_id,
                name,
                arguments: String::new(),
                message_id,
            });
        self.touch();
    }

    /// Accumulate an args delta onto the in-progress entry, never onto the
    /// message directly.
    pub fn append_tool_args(&mut self, tool_call_id: &ToolCallId, delta: &str) {
        if let Some(pending) = self.pending_tool_calls.get_mut(tool_call_id) {
            pending.arguments.push_str(delta);
            self.touch();
        } else {
            let violation = ProtocolViolation::ToolCallArgsWithoutStart {
                tool_call_id: tool_call_id.clone(),
            };
            self.record_violation(&violation);
        }
    }

    /// Finalize a tool call: append the accumulated record to the parent
    /// message's tool_calls (dedupe by id, idempotent against redelivery)
    /// and drop the in-progress entry. An END with no matching START is a
    /// protocol violation (out-of-order or duplicate delivery).
    pub fn end_tool_call(&mut self, tool_call_id: &ToolCallId) {
        let Some(pending) = self.pending_tool_calls.remove(tool_call_id) else {
            let violation = ProtocolViolation::ToolCallEndWithoutStart {
                tool_call_id: tool_call_id.clone(),
            };
            self.record_violation(&violation);
            return;
        };
        if let Some(message) = self.messages.get_mut(&pending.message_id) {
            if !message.tool_calls.iter().any(|tc| tc.id == pending.id) {
                message.tool_calls.push(ToolCall {
                    id: pending.id,
                    name: pending.name,
                    arguments: pending.arguments,
                });
            }
        }
        self.touch();
    }

    // ---- attachments --------------------------------------------------

    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.values()
    }

    pub fn attachment(&self, id: &AttachmentId) -> Option<&Attachment> {
        self.attachments.get(id)
    }

    /// Dual-write an attachment: the global map for transient UI feedback,
    /// plus the active conversation's AgentState slice as the durable copy.
    pub fn upsert_attachment(&mut self, attachment: Attachment) {
        if let Some(temp_id) = &attachment.client_temp_id {
            // The backend-issued id supersedes the temporary bookkeeping key.
            if temp_id != &attachment.id {
                self.attachments.shift_remove(temp_id);
            }
        }
        self.attachments
            .insert(attachment.id.clone(), attachment.clone());
        if let Some(active) = self.active_conversation_id.clone() {
            self.agent_state
                .entry(active)
                .or_default()
                .upsert_attachment(attachment);
            self.touch_agent_state();
        } else {
            self.touch();
        }
    }

    /// Progress updates touch only the global copy; per-conversation state
    /// does not persist transfer progress.
    pub fn set_attachment_progress(&mut self, id: &AttachmentId, progress: f64) {
        if let Some(attachment) = self.attachments.get_mut(id) {
            attachment.metadata.insert(
                "progress".to_string(),
                serde_json::Value::from(progress),
            );
            self.touch();
        }
    }

    /// Mark an attachment failed on both homes, but never fabricate a
    /// per-conversation entry for a failure.
    pub fn fail_attachment(&mut self, id: &AttachmentId, error: &str) {
        let mut changed = false;
        if let Some(attachment) = self.attachments.get_mut(id) {
            attachment.state = AttachmentState::Failed;
            attachment
                .metadata
                .insert("error".to_string(), serde_json::Value::from(error));
            changed = true;
        }
        let mut agent_changed = false;
        if let Some(active) = self.active_conversation_id.clone() {
            if let Some(state) = self.agent_state.get_mut(&active) {
                if let Some(attachment) = state.attachments.get_mut(id) {
                    attachment.state = AttachmentState::Failed;
                    attachment
                        .metadata
                        .insert("error".to_string(), serde_json::Value::from(error));
                    agent_changed = true;
                }
            }
        }
        if agent_changed {
            self.touch_agent_state();
        } else if changed {
            self.touch();
        }
    }

    // ---- agent state --------------------------------------------------

    pub fn agent_state(&self, conversation_id: &ConversationId) -> Option<&AgentState> {
        self.agent_state.get(conversation_id)
    }

    /// Shallow key-by-key snapshot merge; fields absent from this snapshot
    /// persist from the previous one.
    pub fn merge_snapshot(
        &mut self,
        conversation_id: &ConversationId,
        snapshot: serde_json::Map<String, serde_json::Value>,
    ) {
        self.agent_state
            .entry(conversation_id.clone())
            .or_default()
            .merge_snapshot(snapshot);
        self.touch_agent_state();
    }

    /// Clone of the persisted slice: conversation id -> agent state.
    pub fn snapshot_agent_state(&self) -> HashMap<ConversationId, AgentState> {
        self.agent_state
            .iter()
            .filter(|(_, state)| !state.is_empty())
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect()
    }

    // ---- load guards and bulk-load reconciliation ---------------------

    /// Try to start a full message load for a conversation. Returns false
    /// when a load is already in flight, or the conversation was loaded
    /// before and `force` is not set.
    pub fn begin_load(&mut self, conversation_id: &ConversationId, force: bool) -> bool {
        if self.loading_conversations.contains(conversation_id) {
            return false;
        }
        if !force && self.loaded_conversations.contains(conversation_id) {
            return false;
        }
        self.loading_conversations.insert(conversation_id.clone());
        true
    }

    pub fn finish_load(&mut self, conversation_id: &ConversationId, success: bool) {
        self.loading_conversations.remove(conversation_id);
        if success {
            self.loaded_conversations.insert(conversation_id.clone());
        }
    }

    pub fn is_loading(&self, conversation_id: &ConversationId) -> bool {
        self.loading_conversations.contains(conversation_id)
    }

    fn is_retainable_local(message: &Message) -> bool {
        message.status == MessageStatus::Streaming
            || message.id.as_str().starts_with(CLIENT_ID_PREFIX)
    }

    /// Install a fetched message list for a conversation, reconciling with
    /// local state: local messages that are still streaming or optimistic
    /// and absent from the server result are retained; the server copy wins
    /// on id collision. The combined list is sorted ascending by created_at
    /// (missing timestamps sort as the epoch).
    pub fn install_fetched_messages(
        &mut self,
        conversation_id: &ConversationId,
        fetched: Vec<Message>,
    ) {
        let server_ids: HashSet<MessageId> = fetched.iter().map(|m| m.id.clone()).collect();

        let old_sequence = self
            .sequences
            .remove(conversation_id)
            .unwrap_or_default();

        let mut retained: Vec<MessageId> = Vec::new();
        for id in old_sequence {
            let keep = self
                .messages
                .get(&id)
                .is_some_and(|m| Self::is_retainable_local(m) && !server_ids.contains(&id));
            if keep {
                retained.push(id);
            } else if server_ids.contains(&id) {
                // Server copy supersedes the local entry; any mid-stream
                // buffer for this id is stale.
                self.streaming.remove(&id);
            } else {
                // Dropped local entry with no server replacement.
                self.messages.remove(&id);
                self.streaming.remove(&id);
            }
        }

        let mut sequence = retained;
        for message in fetched {
            let mut message = message;
            message.conversation_id = conversation_id.clone();
            if !sequence.contains(&message.id) {
                sequence.push(message.id.clone());
            }
            self.messages.insert(message.id.clone(), message);
        }

        sequence.sort_by_key(|id| {
            self.messages
                .get(id)
                .map(Message::sort_timestamp)
                .unwrap_or_default()
        });
        self.sequences.insert(conversation_id.clone(), sequence);
        self.touch();

        // Second reconciliation pass: re-merge streaming/optimistic messages
        // that are live in the store but missing from both the fetch result
        // and the freshly installed sequence. The fetch and the install are
        // not atomic with respect to concurrent event delivery.
        self.remerge_live_locals(conversation_id, &server_ids);
    }

    fn remerge_live_locals(
        &mut self,
        conversation_id: &ConversationId,
        server_ids: &HashSet<MessageId>,
    ) {
        let mut missing: Vec<MessageId> = self
            .messages
            .values()
            .filter(|m| {
                m.conversation_id == *conversation_id
                    && Self::is_retainable_local(m)
                    && !server_ids.contains(&m.id)
            })
            .map(|m| m.id.clone())
            .collect();
        if missing.is_empty() {
            return;
        }
        let sequence = self.sequences.entry(conversation_id.clone()).or_default();
        missing.retain(|id| !sequence.contains(id));
        if missing.is_empty() {
            return;
        }
        sequence.extend(missing);
        let messages = &self.messages;
        sequence.sort_by_key(|id| {
            messages
                .get(id)
                .map(Message::sort_timestamp)
                .unwrap_or_default()
        });
        self.touch();
    }
}
