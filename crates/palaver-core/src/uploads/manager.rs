//! Three-phase upload orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use palaver_api::{
    Attachment, AttachmentId, AttachmentState, ClientEvent, ProgressFn, TransferOptions,
    TransferProgress, UploadTransport, CLIENT_ID_PREFIX,
};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Owner entity reported to the initiate endpoint.
    #[serde(default = "default_owner_type")]
    pub owner_type: String,
    /// Transfer-phase timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// How long completed bookkeeping entries linger before removal.
    #[serde(default = "default_cleanup_delay_ms")]
    pub cleanup_delay_ms: u64,
}

fn default_owner_type() -> String {
    "conversation".to_string()
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_cleanup_delay_ms() -> u64 {
    2_000
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            owner_type: default_owner_type(),
            timeout_ms: default_timeout_ms(),
            cleanup_delay_ms: default_cleanup_delay_ms(),
        }
    }
}

impl UploadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }
}

/// One file handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Pending,
    Uploading,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct UploadStatus {
    pub file_name: String,
    pub phase: UploadPhase,
    pub error: Option<String>,
}

struct UploadEntry {
    status: UploadStatus,
    cancel: CancellationToken,
}

/// Runs initiate/transfer/finalize per file and reports lifecycle through the
/// shared event sink. Files are independent: one failure neither aborts nor
/// taints its siblings, and the error is still returned for that file.
pub struct UploadManager<U> {
    transport: Arc<U>,
    events: mpsc::UnboundedSender<ClientEvent>,
    registry: Arc<Mutex<HashMap<AttachmentId, UploadEntry>>>,
    /// temp id -> backend id, filled in at finalize.
    id_map: Arc<Mutex<HashMap<AttachmentId, AttachmentId>>>,
    config: UploadConfig,
}

impl<U: UploadTransport> UploadManager<U> {
    pub fn new(
        transport: Arc<U>,
        events: mpsc::UnboundedSender<ClientEvent>,
        config: UploadConfig,
    ) -> Self {
        Self {
            transport,
            events,
            registry: Arc::new(Mutex::new(HashMap::new())),
            id_map: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Upload one file. Emits `attachment.uploading` immediately under a
    /// client-generated temp id, progress during transfer, and either
    /// `attachment.available` (carrying the backend id plus the temp id for
    /// reconciliation) or `attachment.failed`.
    pub async fn upload(&self, file: UploadFile) -> Result<AttachmentId> {
        let temp_id = AttachmentId::from(format!("{CLIENT_ID_PREFIX}{}", Uuid::new_v4()));
        let cancel = CancellationToken::new();
        self.insert_entry(&temp_id, &file.name, cancel.clone());

        self.emit(ClientEvent::AttachmentUploading {
            attachment: Attachment {
                id: temp_id.clone(),
                client_temp_id: Some(temp_id.clone()),
                name: file.name.clone(),
                mime: file.mime.clone(),
                size: file.data.len() as u64,
                upload_url: None,
                state: AttachmentState::Uploading,
                metadata: serde_json::Map::new(),
            },
        });

        match self.run_phases(&temp_id, file, cancel).await {
            Ok(backend_id) => {
                self.set_phase(&temp_id, UploadPhase::Completed, None);
                self.id_map
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(temp_id.clone(), backend_id.clone());
                self.schedule_cleanup(temp_id);
                Ok(backend_id)
            }
            Err(error) => {
                let reason = error.to_string();
                tracing::warn!(target: "uploads", "upload of {temp_id} failed: {reason}");
                if matches!(
                    &error,
                    crate::error::Error::Transfer(palaver_api::TransferError::Canceled)
                ) {
                    // A canceled upload leaves no bookkeeping behind.
                    self.registry
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&temp_id);
                } else {
                    self.set_phase(&temp_id, UploadPhase::Failed, Some(reason.clone()));
                }
                self.emit(ClientEvent::AttachmentFailed {
                    attachment_id: temp_id,
                    error: reason,
                });
                Err(error)
            }
        }
    }

    /// Upload a batch concurrently, returning one result per file in order.
    pub async fn upload_all(&self, files: Vec<UploadFile>) -> Vec<Result<AttachmentId>> {
        futures::future::join_all(files.into_iter().map(|file| self.upload(file))).await
    }

    /// Abort the transfer phase of an in-flight upload. A no-op once the
    /// transfer has finished; initiate and finalize are not interruptible.
    pub fn cancel(&self, temp_id: &AttachmentId) {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = registry.get(temp_id) {
            entry.cancel.cancel();
        }
    }

    pub fn status(&self, temp_id: &AttachmentId) -> Option<UploadStatus> {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.get(temp_id).map(|entry| entry.status.clone())
    }

    /// The backend id a finalized temp id resolved to.
    pub fn backend_id(&self, temp_id: &AttachmentId) -> Option<AttachmentId> {
        let id_map = self.id_map.lock().unwrap_or_else(PoisonError::into_inner);
        id_map.get(temp_id).cloned()
    }

    async fn run_phases(
        &self,
        temp_id: &AttachmentId,
        file: UploadFile,
        cancel: CancellationToken,
    ) -> Result<AttachmentId> {
        let UploadFile { name, mime, data } = file;

        let ticket = self
            .transport
            .initiate_upload(&self.config.owner_type, &name, &mime)
            .await?;
        tracing::debug!(
            target: "uploads",
            "initiated {temp_id} as {} ({} bytes)", ticket.content_id, data.len()
        );
        self.set_phase(temp_id, UploadPhase::Uploading, None);

        let progress_events = self.events.clone();
        let progress_id = temp_id.clone();
        let on_progress: ProgressFn = Arc::new(move |progress: TransferProgress| {
            let _ = progress_events.send(ClientEvent::AttachmentProgress {
                attachment_id: progress_id.clone(),
                progress: progress.percent(),
            });
        });
        self.transport
            .transfer(
                &ticket.upload_url,
                data,
                TransferOptions {
                    on_progress: Some(on_progress),
                    timeout: self.config.timeout(),
                    cancel,
                },
            )
            .await?;

        let finalized = self.transport.finalize_upload(&ticket.content_id).await?;
        let mime = if finalized.mime_type.is_empty() {
            mime
        } else {
            finalized.mime_type
        };
        self.emit(ClientEvent::AttachmentAvailable {
            attachment: Attachment {
                id: finalized.content_id.clone(),
                client_temp_id: Some(temp_id.clone()),
                name,
                mime,
                size: finalized.file_size,
                upload_url: None,
                state: AttachmentState::Available,
                metadata: serde_json::Map::new(),
            },
        });
        Ok(finalized.content_id)
    }

    fn insert_entry(&self, temp_id: &AttachmentId, file_name: &str, cancel: CancellationToken) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.insert(
            temp_id.clone(),
            UploadEntry {
                status: UploadStatus {
                    file_name: file_name.to_string(),
                    phase: UploadPhase::Pending,
                    error: None,
                },
                cancel,
            },
        );
    }

    fn set_phase(&self, temp_id: &AttachmentId, phase: UploadPhase, error: Option<String>) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = registry.get_mut(temp_id) {
            entry.status.phase = phase;
            entry.status.error = error;
        }
    }

    fn schedule_cleanup(&self, temp_id: AttachmentId) {
        let registry = self.registry.clone();
        let id_map = self.id_map.clone();
        let delay = self.config.cleanup_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&temp_id);
            id_map
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&temp_id);
        });
    }

    fn emit(&self, event: ClientEvent) {
        // The session owns the receiver; if it is gone the events are moot.
        let _ = self.events.send(event);
    }
}

impl<U> std::fmt::Debug for UploadManager<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
