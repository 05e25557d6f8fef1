//! Cross-component tests: session + pipeline + uploads + cache working
//! against fake transports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use palaver_api::{
    ApiError, AttachmentId, AttachmentState, ChatTransport, ClientEvent, Conversation,
    ConversationId, ConversationStatus, FinalizedUpload, Message, MessageId, MessageStatus, Role,
    SendMessageOptions, TransferError, TransferOptions, UploadTicket, UploadTransport,
    CLIENT_ID_PREFIX,
};
use palaver_core::persist::{CacheConfig, KvStore, MemoryKvStore};
use palaver_core::uploads::{UploadConfig, UploadFile, UploadManager};
use palaver_core::ChatSession;

fn server_message(id: &str, conversation: &str, secs: i64, content: &str) -> Message {
    use chrono::TimeZone;
    Message {
        id: MessageId::from(id),
        role: Role::Assistant,
        content: content.to_string(),
        conversation_id: ConversationId::from(conversation),
        status: MessageStatus::Completed,
        created_at: chrono::Utc.timestamp_opt(secs, 0).single(),
        tool_calls: Vec::new(),
        tool_call_id: None,
    }
}

/// Transport whose message fetches block until the test grants a permit.
struct GatedTransport {
    fetches: AtomicUsize,
    gate: Semaphore,
    messages: Mutex<Vec<Message>>,
}

impl GatedTransport {
    fn new(messages: Vec<Message>) -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            messages: Mutex::new(messages),
        }
    }

    fn release_fetch(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl ChatTransport for GatedTransport {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        Ok(Vec::new())
    }

    async fn create_conversation(&self, title: Option<String>) -> Result<Conversation, ApiError> {
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
    ) -> Result<Conversation, ApiError> {
        Ok(Conversation {
            id: conversation_id.clone(),
            title,
            status: ConversationStatus::Active,
            metadata: serde_json::Map::new(),
        })
    }

    async fn archive_conversation(&self, _id: &ConversationId) -> Result<(), ApiError> {
        Ok(())
    }

    async fn list_messages(&self, _id: &ConversationId) -> Result<Vec<Message>, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        permit.forget();
        Ok(self.messages.lock().unwrap().clone())
    }

    async fn send_message(
        &self,
        _conversation_id: Option<&ConversationId>,
        _text: &str,
        _options: SendMessageOptions,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn cancel_message(
        &self,
        _conversation_id: &ConversationId,
        _message_id: &MessageId,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn set_active_thread(&self, _id: &ConversationId) -> Result<(), ApiError> {
        Ok(())
    }
}

struct FakeUploadTransport;

#[async_trait]
impl UploadTransport for FakeUploadTransport {
    async fn initiate_upload(
        &self,
        _owner_type: &str,
        file_name: &str,
        _mime_type: &str,
    ) -> Result<UploadTicket, ApiError> {
        Ok(UploadTicket {
            content_id: AttachmentId::from(format!("srv-{file_name}")),
            upload_url: format!("https://uploads.test/{file_name}"),
            status: "pending".into(),
            created_at: None,
        })
    }

    async fn transfer(
        &self,
        _url: &str,
        _bytes: Vec<u8>,
        _options: TransferOptions,
    ) -> Result<(), TransferError> {
        Ok(())
    }

    async fn finalize_upload(
        &self,
        content_id: &AttachmentId,
    ) -> Result<FinalizedUpload, ApiError> {
        Ok(FinalizedUpload {
            content_id: content_id.clone(),
            status: "finalized".into(),
            file_size: 5,
            mime_type: "text/plain".into(),
        })
    }
}

#[tokio::test]
async fn concurrent_loads_for_same_conversation_fetch_once() {
    let _ = tracing_subscriber::fmt::try_init();
    let transport = Arc::new(GatedTransport::new(vec![server_message(
        "m1", "c1", 10, "hello",
    )]));
    let session = Arc::new(ChatSession::new(transport.clone()));
    let conversation_id = ConversationId::from("c1");

    let first = {
        let session = session.clone();
        let conversation_id = conversation_id.clone();
        tokio::spawn(async move { session.load_messages(&conversation_id, false).await })
    };
    // Let the first load reach its fetch and park on the gate.
    tokio::task::yield_now().await;
    assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);

    // A second load for the same id is absorbed by the in-flight guard.
    session.load_messages(&conversation_id, false).await.unwrap();
    assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);

    transport.release_fetch();
    first.await.unwrap().unwrap();

    session.with_store(|store| {
        assert_eq!(store.conversation_messages(&conversation_id).len(), 1);
    });
}

#[tokio::test]
async fn events_arriving_mid_fetch_survive_reconciliation() {
    let _ = tracing_subscriber::fmt::try_init();
    let transport = Arc::new(GatedTransport::new(vec![
        server_message("m1", "c1", 10, "first"),
        server_message("m2", "c1", 20, "second"),
    ]));
    let session = Arc::new(ChatSession::new(transport.clone()));
    let conversation_id = ConversationId::from("c1");
    session
        .set_active_conversation(conversation_id.clone())
        .await
        .unwrap();

    let load = {
        let session = session.clone();
        let conversation_id = conversation_id.clone();
        tokio::spawn(async move { session.load_messages(&conversation_id, true).await })
    };
    tokio::task::yield_now().await;

    // While the fetch is parked, a streaming reply and an optimistic send
    // both land in the store.
    session
        .handle_event(ClientEvent::TextMessageStart {
            message_id: MessageId::from("m-live"),
            conversation_id: None,
            role: Role::Assistant,
            created_at: chrono::DateTime::from_timestamp(15, 0),
        })
        .unwrap();
    session
        .handle_event(ClientEvent::TextMessageContent {
            message_id: MessageId::from("m-live"),
            delta: "partial".into(),
        })
        .unwrap();
    session
        .send_message(Some(&conversation_id), "optimistic", SendMessageOptions::default())
        .await
        .unwrap();

    transport.release_fetch();
    load.await.unwrap().unwrap();

    session.with_store(|store| {
        let messages = store.conversation_messages(&conversation_id);
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        // Server messages installed, live streaming message slotted by its
        // timestamp, optimistic local message retained.
        assert!(ids.contains(&"m1"));
        assert!(ids.contains(&"m2"));
        assert!(ids.contains(&"m-live"));
        assert!(ids.iter().any(|id| id.starts_with(CLIENT_ID_PREFIX)));
        let pos = |needle: &str| ids.iter().position(|id| *id == needle).unwrap();
        assert!(pos("m1") < pos("m-live"));
        assert!(pos("m-live") < pos("m2"));
        assert!(store.is_streaming(&MessageId::from("m-live")));
    });
}

#[tokio::test]
async fn upload_events_flow_through_the_pipeline() {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = Arc::new(ChatSession::new(Arc::new(GatedTransport::new(Vec::new()))));
    let conversation_id = ConversationId::from("c1");
    session
        .set_active_conversation(conversation_id.clone())
        .await
        .unwrap();

    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.run(events_rx).await })
    };

    let manager = UploadManager::new(
        Arc::new(FakeUploadTransport),
        events_tx.clone(),
        UploadConfig::default(),
    );
    let backend_id = manager
        .upload(UploadFile {
            name: "notes.txt".into(),
            mime: "text/plain".into(),
            data: b"hello".to_vec(),
        })
        .await
        .unwrap();
    assert_eq!(backend_id.as_str(), "srv-notes.txt");

    drop(manager);
    drop(events_tx);
    runner.await.unwrap();

    session.with_store(|store| {
        let attachment = store.attachment(&backend_id).unwrap();
        assert_eq!(attachment.state, AttachmentState::Available);
        // The temp-id entry was replaced by the finalized one.
        assert_eq!(store.attachments().count(), 1);
        let state = store.agent_state(&conversation_id).unwrap();
        assert!(state.attachments.contains_key(&backend_id));
        assert_eq!(state.attachments.len(), 1);
    });
}

#[tokio::test(start_paused = true)]
async fn agent_state_survives_a_session_restart() {
    let kv: Arc<MemoryKvStore> = Arc::new(MemoryKvStore::new());
    let transport = Arc::new(GatedTransport::new(Vec::new()));
    let conversation_id = ConversationId::from("c1");

    {
        let session = ChatSession::with_cache(
            transport.clone(),
            kv.clone() as Arc<dyn KvStore>,
            CacheConfig::default(),
        );
        session
            .set_active_conversation(conversation_id.clone())
            .await
            .unwrap();
        let mut state = serde_json::Map::new();
        state.insert(
            "suggestedQuestions".into(),
            serde_json::json!(["what next?"]),
        );
        session
            .handle_event(ClientEvent::StateSnapshot {
                conversation_id: None,
                state,
            })
            .unwrap();
        // Let the debounced write land.
        tokio::time::sleep(Duration::from_millis(600)).await;
    }

    let restarted = ChatSession::with_cache(
        transport.clone(),
        kv.clone() as Arc<dyn KvStore>,
        CacheConfig::default(),
    );
    restarted.with_store(|store| {
        let state = store.agent_state(&conversation_id).unwrap();
        assert_eq!(
            state.extra["suggestedQuestions"],
            serde_json::json!(["what next?"])
        );
    });

    // A version bump invalidates the record instead of migrating it.
    let future_version = ChatSession::with_cache(
        transport,
        kv as Arc<dyn KvStore>,
        CacheConfig {
            version: 99,
            ..CacheConfig::default()
        },
    );
    future_version.with_store(|store| {
        assert!(store.agent_state(&conversation_id).is_none());
    });
}

#[tokio::test]
async fn failed_load_allows_retry() {
    struct FailingTransport {
        attempts: AtomicUsize,
        inner: GatedTransport,
    }

    #[async_trait]
    impl ChatTransport for FailingTransport {
        async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
            self.inner.list_conversations().await
        }
        async fn create_conversation(
            &self,
            title: Option<String>,
        ) -> Result<Conversation, ApiError> {
            self.inner.create_conversation(title).await
        }
        async fn update_conversation(
            &self,
            id: &ConversationId,
            title: Option<String>,
            metadata: Option<serde_json::Map<String, serde_json::Value>>,
        ) -> Result<Conversation, ApiError> {
            self.inner.update_conversation(id, title, metadata).await
        }
        async fn archive_conversation(&self, id: &ConversationId) -> Result<(), ApiError> {
            self.inner.archive_conversation(id).await
        }
        async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, ApiError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ApiError::Status {
                    status: 503,
                    message: "try later".into(),
                    body: None,
                });
            }
            self.inner.list_messages(id).await
        }
        async fn send_message(
            &self,
            id: Option<&ConversationId>,
            text: &str,
            options: SendMessageOptions,
        ) -> Result<(), ApiError> {
            self.inner.send_message(id, text, options).await
        }
        async fn cancel_message(
            &self,
            id: &ConversationId,
            message_id: &MessageId,
        ) -> Result<(), ApiError> {
            self.inner.cancel_message(id, message_id).await
        }
        async fn set_active_thread(&self, id: &ConversationId) -> Result<(), ApiError> {
            self.inner.set_active_thread(id).await
        }
    }

    let transport = Arc::new(FailingTransport {
        attempts: AtomicUsize::new(0),
        inner: GatedTransport::new(vec![server_message("m1", "c1", 10, "hello")]),
    });
    transport.inner.release_fetch();
    let session = ChatSession::new(transport.clone());
    let conversation_id = ConversationId::from("c1");

    assert!(session.load_messages(&conversation_id, false).await.is_err());
    // The failed load released the in-flight guard without marking the
    // conversation loaded.
    session.load_messages(&conversation_id, false).await.unwrap();
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    session.with_store(|store| {
        assert_eq!(store.conversation_messages(&conversation_id).len(), 1);
    });
}
