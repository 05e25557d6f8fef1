//! MessageEventProcessor - handles message streaming events.
//!
//! Folds TEXT_MESSAGE_START/CONTENT/END sequences into the store's message
//! model via the streaming buffer, and applies terminal error/cancel
//! transitions. Also accepts the legacy single-shot `message.created`.

use crate::events::processor::{EventProcessor, ProcessingContext, ProcessingResult};
use palaver_api::{ClientEvent, ConversationId};

/// Processor for message-related events
pub struct MessageEventProcessor;

impl MessageEventProcessor {
    pub fn new() -> Self {
        Self
    }

    /// A payload without a conversation id targets the active conversation.
    fn resolve_conversation(
        given: Option<ConversationId>,
        ctx: &ProcessingContext,
    ) -> Option<ConversationId> {
        given.or_else(|| ctx.store.active_conversation_id().cloned())
    }
}

impl EventProcessor for MessageEventProcessor {
    fn priority(&self) -> usize {
        50 // Medium priority - after conversation events, before tool events
    }

    fn can_handle(&self, event: &ClientEvent) -> bool {
        matches!(
            event,
            ClientEvent::MessageCreated { .. }
                | ClientEvent::TextMessageStart { .. }
                | ClientEvent::TextMessageContent { .. }
                | ClientEvent::TextMessageEnd { .. }
                | ClientEvent::MessageErrored { .. }
                | ClientEvent::MessageCanceled { .. }
        )
    }

    fn process(&mut self, event: ClientEvent, ctx: &mut ProcessingContext) -> ProcessingResult {
        match event {
            ClientEvent::MessageCreated { message } => {
                ctx.store.upsert_message(message);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::TextMessageStart {
                message_id,
                conversation_id,
                role,
                created_at,
            } => {
                let Some(conversation_id) = Self::resolve_conversation(conversation_id, ctx)
                else {
                    tracing::warn!(
                        target: "store.message_event",
                        "TEXT_MESSAGE_START for {message_id} with no conversation and no active conversation"
                    );
                    return ProcessingResult::Handled;
                };
                ctx.store
                    .begin_streaming(message_id, conversation_id, role, created_at);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::TextMessageContent { message_id, delta } => {
                ctx.store.append_stream_delta(&message_id, &delta);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::TextMessageEnd { message_id } => {
                ctx.store.end_streaming(&message_id);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::MessageErrored { message_id, error } => {
                ctx.store.fail_message(&message_id, &error);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::MessageCanceled { message_id } => {
                ctx.store.cancel_message(&message_id);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            _ => ProcessingResult::NotHandled,
        }
    }

    fn name(&self) -> &'static str {
        "MessageEventProcessor"
    }
}

impl Default for MessageEventProcessor {
    fn default() -> Self {
        Self::new()
    }
}
