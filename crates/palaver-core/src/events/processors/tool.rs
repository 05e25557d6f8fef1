//! ToolEventProcessor - handles tool call lifecycle events.
//!
//! Accumulates incremental name/args deltas into the store's in-progress
//! registry and finalizes them onto the parent assistant message.

use crate::events::processor::{EventProcessor, ProcessingContext, ProcessingResult};
use chrono::Utc;
use palaver_api::{ClientEvent, ConversationId, Message, MessageId, MessageStatus, Role};
use uuid::Uuid;

/// Processor for tool-related events
pub struct ToolEventProcessor;

impl ToolEventProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl EventProcessor for ToolEventProcessor {
    fn priority(&self) -> usize {
        75 // After message events
    }

    fn can_handle(&self, event: &ClientEvent) -> bool {
        matches!(
            event,
            ClientEvent::ToolCallStart { .. }
                | ClientEvent::ToolCallArgs { .. }
                | ClientEvent::ToolCallEnd { .. }
                | ClientEvent::ToolCallResult { .. }
        )
    }

    fn process(&mut self, event: ClientEvent, ctx: &mut ProcessingContext) -> ProcessingResult {
        match event {
            ClientEvent::ToolCallStart {
                tool_call_id,
                name,
                message_id,
                conversation_id,
            } => {
                let Some(conversation_id) = conversation_id
                    .or_else(|| ctx.store.active_conversation_id().cloned())
                else {
                    tracing::warn!(
                        target: "store.tool_event",
                        "TOOL_CALL_START for {tool_call_id} with no conversation and no active conversation"
                    );
                    return ProcessingResult::Handled;
                };
                tracing::debug!(
                    target: "store.tool_event",
                    "ToolCallStart: id={tool_call_id}, name={name}, parent={message_id}"
                );
                ctx.store
                    .start_tool_call(tool_call_id, name, message_id, conversation_id);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::ToolCallArgs {
                tool_call_id,
                delta,
            } => {
                ctx.store.append_tool_args(&tool_call_id, &delta);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::ToolCallEnd { tool_call_id } => {
                ctx.store.end_tool_call(&tool_call_id);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::ToolCallResult {
                tool_call_id,
                message_id,
                conversation_id,
                content,
            } => {
                Self::handle_tool_result(tool_call_id, message_id, conversation_id, content, ctx);
                ProcessingResult::Handled
            }
            _ => ProcessingResult::NotHandled,
        }
    }

    fn name(&self) -> &'static str {
        "ToolEventProcessor"
    }
}

impl ToolEventProcessor {
    /// A tool result lands as its own `Role::Tool` message, linked to the
    /// originating call via `tool_call_id`.
    fn handle_tool_result(
        tool_call_id: palaver_api::ToolCallId,
        message_id: Option<MessageId>,
        conversation_id: Option<ConversationId>,
        content: String,
        ctx: &mut ProcessingContext,
    ) {
        let conversation_id = conversation_id
            .or_else(|| {
                // Fall back to the conversation of the call's parent message.
                ctx.store
                    .pending_tool_call(&tool_call_id)
                    .map(|p| p.message_id.clone())
                    .and_then(|mid| ctx.store.message(&mid).map(|m| m.conversation_id.clone()))
            })
            .or_else(|| ctx.store.active_conversation_id().cloned());
        let Some(conversation_id) = conversation_id else {
            tracing::warn!(
                target: "store.tool_event",
                "TOOL_CALL_RESULT for {tool_call_id} with no resolvable conversation"
            );
            return;
        };

        let id = message_id.unwrap_or_else(|| MessageId::from(Uuid::new_v4().to_string()));
        ctx.store.upsert_message(Message {
            id,
            role: Role::Tool,
            content,
            conversation_id,
            status: MessageStatus::Completed,
            created_at: Some(Utc::now()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id),
        });
        *ctx.state_updated = true;
    }
}

impl Default for ToolEventProcessor {
    fn default() -> Self {
        Self::new()
    }
}
