//! The session: imperative operations over the store, transport, and cache.
//!
//! All mutation funnels through [`ChatSession::handle_event`] or the bulk
//! loaders, and every mutation happens under the store mutex with no await
//! while it is held. The only suspension points are the transport calls, so
//! events observed mid-fetch are reconciled rather than clobbered.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use palaver_api::{
    ChatTransport, ClientEvent, Conversation, ConversationId, Message, MessageId,
    SendMessageOptions, CLIENT_ID_PREFIX,
};

use crate::error::Result;
use crate::events::{EventPipeline, ProcessingContext};
use crate::persist::{CacheConfig, KvStore, StateCache};
use crate::state::ChatStore;

pub struct ChatSession<T> {
    store: Arc<Mutex<ChatStore>>,
    transport: Arc<T>,
    pipeline: Mutex<EventPipeline>,
    cache: Option<StateCache<Arc<dyn KvStore>>>,
}

impl<T: ChatTransport> ChatSession<T> {
    /// Session without persistence; agent state lives in memory only.
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            store: Arc::new(Mutex::new(ChatStore::new())),
            transport,
            pipeline: Mutex::new(EventPipeline::standard()),
            cache: None,
        }
    }

    /// Session with a write-through agent-state cache. Must be constructed
    /// inside a tokio runtime (the cache spawns its debounce task). Any
    /// snapshot persisted by a previous session is restored immediately.
    pub fn with_cache(transport: Arc<T>, kv: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        let cache = StateCache::new(Arc::new(kv), config);
        let mut store = ChatStore::new();
        if let Some(data) = cache.load() {
            store.restore_agent_state(data);
        }
        Self {
            store: Arc::new(Mutex::new(store)),
            transport,
            pipeline: Mutex::new(EventPipeline::standard()),
            cache: Some(cache),
        }
    }

    /// Shared handle to the canonical state, for projections and inspection.
    pub fn store(&self) -> Arc<Mutex<ChatStore>> {
        self.store.clone()
    }

    /// Run a closure against the store under its lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&ChatStore) -> R) -> R {
        f(&self.lock_store())
    }

    /// Apply one event through the pipeline. Agent-state changes schedule a
    /// debounced cache write; processor failures propagate but leave the
    /// store in whatever consistent state the processors reached.
    pub fn handle_event(&self, event: ClientEvent) -> Result<()> {
        let snapshot = {
            let mut pipeline = self
                .pipeline
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut store = self.lock_store();
            let agent_revision_before = store.agent_state_revision();

            let mut state_updated = false;
            let mut ctx = ProcessingContext {
                store: &mut store,
                state_updated: &mut state_updated,
            };
            pipeline.process_event(event, &mut ctx)?;

            if store.agent_state_revision() == agent_revision_before {
                None
            } else {
                Some(store.snapshot_agent_state())
            }
        };
        if let (Some(cache), Some(snapshot)) = (&self.cache, snapshot) {
            cache.save(snapshot);
        }
        Ok(())
    }

    /// Drain an injected event source until it closes. Individual event
    /// failures are logged, not fatal to the loop.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<ClientEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(error) = self.handle_event(event) {
                tracing::warn!(target: "store.pipeline", "event dropped: {error}");
            }
        }
    }

    /// Fetch the conversation list, replacing the local map wholesale.
    pub async fn load_conversations(&self) -> Result<()> {
        let conversations = self.transport.list_conversations().await?;
        self.lock_store().replace_conversations(conversations);
        Ok(())
    }

    /// Fetch the full message history for a conversation and reconcile it
    /// with local state. A load already in flight for the same id, or a
    /// completed load without `force`, makes this a no-op.
    pub async fn load_messages(&self, conversation_id: &ConversationId, force: bool) -> Result<()> {
        if !self.lock_store().begin_load(conversation_id, force) {
            return Ok(());
        }

        let fetched = match self.transport.list_messages(conversation_id).await {
            Ok(fetched) => fetched,
            Err(error) => {
                self.lock_store().finish_load(conversation_id, false);
                return Err(error.into());
            }
        };

        let mut store = self.lock_store();
        store.install_fetched_messages(conversation_id, fetched);
        store.finish_load(conversation_id, true);
        Ok(())
    }

    /// Send a user message. A known conversation gets an optimistic local
    /// message immediately; `None` asks the backend to create a conversation
    /// implicitly, in which case the `conversation.created` event carries the
    /// id back and no optimistic entry is possible.
    pub async fn send_message(
        &self,
        conversation_id: Option<&ConversationId>,
        text: &str,
        options: SendMessageOptions,
    ) -> Result<()> {
        let local_id = conversation_id.map(|conversation_id| {
            let local_id = MessageId::from(format!("{CLIENT_ID_PREFIX}{}", Uuid::new_v4()));
            self.lock_store().upsert_message(Message {
                id: local_id.clone(),
                role: palaver_api::Role::User,
                content: text.to_string(),
                conversation_id: conversation_id.clone(),
                status: palaver_api::MessageStatus::Pending,
                created_at: Some(Utc::now()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
            local_id
        });

        if let Err(error) = self.transport.send_message(conversation_id, text, options).await {
            if let Some(local_id) = local_id {
                self.lock_store()
                    .fail_message(&local_id, &error.to_string());
            }
            return Err(error.into());
        }
        Ok(())
    }

    /// Ask the backend to stop generation. Local state transitions happen
    /// when the resulting cancel event arrives, not here.
    pub async fn cancel_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<()> {
        self.transport
            .cancel_message(conversation_id, message_id)
            .await?;
        Ok(())
    }

    /// Switch the active conversation pointer (clearing the transient global
    /// attachment view) and hint the backend about the new target thread.
    pub async fn set_active_conversation(&self, conversation_id: ConversationId) -> Result<()> {
        self.lock_store()
            .set_active_conversation(conversation_id.clone());
        self.transport.set_active_thread(&conversation_id).await?;
        Ok(())
    }

    pub async fn create_conversation(&self, title: Option<String>) -> Result<Conversation> {
        let conversation = self.transport.create_conversation(title).await?;
        {
            let mut store = self.lock_store();
            store.upsert_conversation(conversation.clone());
            store.adopt_active_if_unset(&conversation.id);
        }
        Ok(conversation)
    }

    pub async fn update_conversation_title(
        &self,
        conversation_id: &ConversationId,
        title: String,
    ) -> Result<Conversation> {
        let conversation = self
            .transport
            .update_conversation(conversation_id, Some(title), None)
            .await?;
        self.lock_store().upsert_conversation(conversation.clone());
        Ok(conversation)
    }

    pub async fn archive_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        self.transport.archive_conversation(conversation_id).await?;
        self.lock_store().mark_archived(conversation_id);
        Ok(())
    }

    fn lock_store(&self) -> MutexGuard<'_, ChatStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for ChatSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("has_cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use palaver_api::{ApiError, ConversationStatus, MessageStatus, Role};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeTransport {
        message_fetches: AtomicUsize,
        fail_sends: bool,
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn list_conversations(&self) -> std::result::Result<Vec<Conversation>, ApiError> {
            Ok(vec![Conversation {
                id: ConversationId::from("c1"),
                title: Some("First".into()),
                status: ConversationStatus::Active,
                metadata: serde_json::Map::new(),
            }])
        }

        async fn create_conversation(
            &self,
            title: Option<String>,
        ) -> std::result::Result<Conversation, ApiError> {
            Ok(Conversation {
                id: ConversationId::from("c-new"),
                title,
                status: ConversationStatus::Active,
                metadata: serde_json::Map::new(),
            })
        }

        async fn update_conversation(
            &self,
            conversation_id: &ConversationId,
            title: Option<String>,
            _metadata: Option<serde_json::Map<String, serde_json::Value>>,
        ) -> std::result::Result<Conversation, ApiError> {
            Ok(Conversation {
                id: conversation_id.clone(),
                title,
                status: ConversationStatus::Active,
                metadata: serde_json::Map::new(),
            })
        }

        async fn archive_conversation(
            &self,
            _conversation_id: &ConversationId,
        ) -> std::result::Result<(), ApiError> {
            Ok(())
        }

        async fn list_messages(
            &self,
            conversation_id: &ConversationId,
        ) -> std::result::Result<Vec<Message>, ApiError> {
            self.message_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Message {
                id: MessageId::from("m1"),
                role: Role::User,
                content: "hello".into(),
                conversation_id: conversation_id.clone(),
                status: MessageStatus::Completed,
                created_at: None,
                tool_calls: Vec::new(),
                tool_call_id: None,
            }])
        }

        async fn send_message(
            &self,
            _conversation_id: Option<&ConversationId>,
            _text: &str,
            _options: SendMessageOptions,
        ) -> std::result::Result<(), ApiError> {
            if self.fail_sends {
                return Err(ApiError::Status {
                    status: 500,
                    message: "backend unavailable".into(),
                    body: None,
                });
            }
            Ok(())
        }

        async fn cancel_message(
            &self,
            _conversation_id: &ConversationId,
            _message_id: &MessageId,
        ) -> std::result::Result<(), ApiError> {
            Ok(())
        }

        async fn set_active_thread(
            &self,
            _conversation_id: &ConversationId,
        ) -> std::result::Result<(), ApiError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_message_inserts_optimistic_local_entry() {
        let session = ChatSession::new(Arc::new(FakeTransport::default()));
        let conversation_id = ConversationId::from("c1");

        session
            .send_message(Some(&conversation_id), "hi there", SendMessageOptions::default())
            .await
            .unwrap();

        session.with_store(|store| {
            let messages = store.conversation_messages(&conversation_id);
            assert_eq!(messages.len(), 1);
            assert!(messages[0].id.as_str().starts_with(CLIENT_ID_PREFIX));
            assert_eq!(messages[0].status, MessageStatus::Pending);
        });
    }

    #[tokio::test]
    async fn failed_send_marks_optimistic_entry_errored() {
        let session = ChatSession::new(Arc::new(FakeTransport {
            fail_sends: true,
            ..FakeTransport::default()
        }));
        let conversation_id = ConversationId::from("c1");

        let result = session
            .send_message(Some(&conversation_id), "hi", SendMessageOptions::default())
            .await;
        assert!(result.is_err());

        session.with_store(|store| {
            let messages = store.conversation_messages(&conversation_id);
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].status, MessageStatus::Errored);
        });
    }

    #[tokio::test]
    async fn repeat_load_without_force_skips_fetch() {
        let transport = Arc::new(FakeTransport::default());
        let session = ChatSession::new(transport.clone());
        let conversation_id = ConversationId::from("c1");

        session.load_messages(&conversation_id, false).await.unwrap();
        session.load_messages(&conversation_id, false).await.unwrap();
        assert_eq!(transport.message_fetches.load(Ordering::SeqCst), 1);

        session.load_messages(&conversation_id, true).await.unwrap();
        assert_eq!(transport.message_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn load_conversations_replaces_map() {
        let session = ChatSession::new(Arc::new(FakeTransport::default()));
        session.load_conversations().await.unwrap();
        session.with_store(|store| {
            assert_eq!(store.conversations().count(), 1);
        });
    }

    #[tokio::test]
    async fn create_conversation_adopts_active_pointer() {
        let session = ChatSession::new(Arc::new(FakeTransport::default()));
        let conversation = session.create_conversation(Some("fresh".into())).await.unwrap();
        session.with_store(|store| {
            assert_eq!(store.active_conversation_id(), Some(&conversation.id));
        });
    }
}
