//! ConversationEventProcessor - handles conversation lifecycle events.

use crate::events::processor::{EventProcessor, ProcessingContext, ProcessingResult};
use palaver_api::ClientEvent;

pub struct ConversationEventProcessor;

impl ConversationEventProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl EventProcessor for ConversationEventProcessor {
    fn priority(&self) -> usize {
        25 // Before message events so implicit creates resolve first
    }

    fn can_handle(&self, event: &ClientEvent) -> bool {
        matches!(
            event,
            ClientEvent::ConversationCreated { .. }
                | ClientEvent::ConversationUpdated { .. }
                | ClientEvent::ConversationArchived { .. }
        )
    }

    fn process(&mut self, event: ClientEvent, ctx: &mut ProcessingContext) -> ProcessingResult {
        match event {
            ClientEvent::ConversationCreated { conversation } => {
                let id = conversation.id.clone();
                ctx.store.upsert_conversation(conversation);
                // An implicit create (send with no conversation) relies on
                // this event to learn which thread it is talking to.
                ctx.store.adopt_active_if_unset(&id);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::ConversationUpdated { conversation } => {
                ctx.store.upsert_conversation(conversation);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::ConversationArchived { conversation_id } => {
                ctx.store.mark_archived(&conversation_id);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            _ => ProcessingResult::NotHandled,
        }
    }

    fn name(&self) -> &'static str {
        "ConversationEventProcessor"
    }
}

impl Default for ConversationEventProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatStore;
    use palaver_api::{Conversation, ConversationId, ConversationStatus};

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: ConversationId::from(id),
            title: Some("Title".into()),
            status: ConversationStatus::Active,
            metadata: serde_json::Map::new(),
        }
    }

    fn apply(store: &mut ChatStore, event: ClientEvent) {
        let mut processor = ConversationEventProcessor::new();
        let mut state_updated = false;
        let mut ctx = ProcessingContext {
            store,
            state_updated: &mut state_updated,
        };
        processor.process(event, &mut ctx);
    }

    #[test]
    fn created_adopts_active_pointer_when_unset() {
        let mut store = ChatStore::new();
        apply(
            &mut store,
            ClientEvent::ConversationCreated {
                conversation: conversation("c1"),
            },
        );
        assert_eq!(store.active_conversation_id().unwrap().as_str(), "c1");

        // A later create does not steal the pointer.
        apply(
            &mut store,
            ClientEvent::ConversationCreated {
                conversation: conversation("c2"),
            },
        );
        assert_eq!(store.active_conversation_id().unwrap().as_str(), "c1");
    }

    #[test]
    fn archived_conversations_remain_addressable() {
        let mut store = ChatStore::new();
        apply(
            &mut store,
            ClientEvent::ConversationCreated {
                conversation: conversation("c1"),
            },
        );
        apply(
            &mut store,
            ClientEvent::ConversationArchived {
                conversation_id: ConversationId::from("c1"),
            },
        );

        let conversation = store.conversation(&ConversationId::from("c1")).unwrap();
        assert_eq!(conversation.status, ConversationStatus::Archived);
    }
}
