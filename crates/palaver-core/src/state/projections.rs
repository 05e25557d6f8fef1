//! Read projections over the canonical store.
//!
//! Projections never duplicate state: they derive filtered/sorted views and
//! use the store's revision counter to skip recomputation when nothing
//! changed. A [`Memo`] recomputes if and only if the store revision moved
//! since the cached value was produced.

use palaver_api::{Attachment, Conversation, ConversationId, ConversationStatus, Message};

use crate::state::ChatStore;

/// Revision-gated memoized view.
#[derive(Debug, Default)]
pub struct Memo<T> {
    revision: Option<u64>,
    value: Option<T>,
}

impl<T: Clone> Memo<T> {
    pub fn new() -> Self {
        Self {
            revision: None,
            value: None,
        }
    }

    /// Return the cached value when the store has not changed since it was
    /// computed; otherwise recompute and cache.
    pub fn get_or_compute(&mut self, store: &ChatStore, compute: impl FnOnce(&ChatStore) -> T) -> T {
        let current = store.revision();
        if self.revision == Some(current) {
            if let Some(value) = &self.value {
                return value.clone();
            }
        }
        let value = compute(store);
        self.revision = Some(current);
        self.value = Some(value.clone());
        value
    }
}

/// Ordered messages for one conversation (cloned snapshot).
pub fn conversation_messages(store: &ChatStore, conversation_id: &ConversationId) -> Vec<Message> {
    store
        .conversation_messages(conversation_id)
        .into_iter()
        .cloned()
        .collect()
}

/// Whether any message anywhere in the store is still streaming.
pub fn is_any_streaming(store: &ChatStore) -> bool {
    store.any_streaming()
}

/// Conversations that are not archived, in arrival order.
pub fn active_conversations(store: &ChatStore) -> Vec<Conversation> {
    store
        .conversations()
        .filter(|c| c.status == ConversationStatus::Active)
        .cloned()
        .collect()
}

/// Attachments recorded in the active conversation's agent state.
pub fn active_conversation_attachments(store: &ChatStore) -> Vec<Attachment> {
    let Some(active) = store.active_conversation_id() else {
        return Vec::new();
    };
    store
        .agent_state(active)
        .map(|state| state.attachments.values().cloned().collect())
        .unwrap_or_default()
}

/// Suggested follow-up questions from a conversation's agent state.
pub fn suggested_questions(store: &ChatStore, conversation_id: &ConversationId) -> Vec<String> {
    store
        .agent_state(conversation_id)
        .and_then(|state| state.extra.get("suggestedQuestions"))
        .and_then(|value| value.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
