//! SnapshotEventProcessor - merges full agent-state snapshots.

use crate::events::processor::{EventProcessor, ProcessingContext, ProcessingResult};
use palaver_api::ClientEvent;

pub struct SnapshotEventProcessor;

impl SnapshotEventProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl EventProcessor for SnapshotEventProcessor {
    fn priority(&self) -> usize {
        90
    }

    fn can_handle(&self, event: &ClientEvent) -> bool {
        matches!(event, ClientEvent::StateSnapshot { .. })
    }

    fn process(&mut self, event: ClientEvent, ctx: &mut ProcessingContext) -> ProcessingResult {
        let ClientEvent::StateSnapshot {
            conversation_id,
            state,
        } = event
        else {
            return ProcessingResult::NotHandled;
        };

        let Some(conversation_id) =
            conversation_id.or_else(|| ctx.store.active_conversation_id().cloned())
        else {
            tracing::warn!(
                target: "store.snapshot_event",
                "STATE_SNAPSHOT with no conversation and no active conversation"
            );
            return ProcessingResult::Handled;
        };

        ctx.store.merge_snapshot(&conversation_id, state);
        *ctx.state_updated = true;
        ProcessingResult::Handled
    }

    fn name(&self) -> &'static str {
        "SnapshotEventProcessor"
    }
}

impl Default for SnapshotEventProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatStore;
    use serde_json::json;

    fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        let serde_json::Value::Object(map) = value else {
            unreachable!("literal is an object")
        };
        map
    }

    #[test]
    fn snapshots_merge_instead_of_replace() {
        let mut store = ChatStore::new();
        store.set_active_conversation("c1".into());
        let mut processor = SnapshotEventProcessor::new();

        for snapshot in [
            json!({ "suggestedQuestions": ["q1", "q2"] }),
            json!({ "mode": "focused" }),
        ] {
            let mut state_updated = false;
            let mut ctx = ProcessingContext {
                store: &mut store,
                state_updated: &mut state_updated,
            };
            processor.process(
                ClientEvent::StateSnapshot {
                    conversation_id: None,
                    state: object(snapshot),
                },
                &mut ctx,
            );
        }

        let state = store.agent_state(&"c1".into()).unwrap();
        assert_eq!(state.extra["suggestedQuestions"], json!(["q1", "q2"]));
        assert_eq!(state.extra["mode"], json!("focused"));
    }
}
