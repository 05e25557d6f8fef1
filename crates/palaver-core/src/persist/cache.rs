//! Versioned, debounced snapshot cache for per-conversation agent state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use palaver_api::{AgentState, ConversationId};

use super::debounce::Debouncer;
use super::kv::KvStore;
use super::PersistenceError;

/// Bumped whenever the persisted layout changes; a mismatched record is
/// discarded rather than migrated.
pub const CACHE_VERSION: u32 = 1;

const CACHE_KEY: &str = "agent_state";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: usize,
}

fn default_version() -> u32 {
    CACHE_VERSION
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_quota_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            debounce_ms: default_debounce_ms(),
            quota_bytes: default_quota_bytes(),
        }
    }
}

/// What actually lands in the backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub data: HashMap<ConversationId, AgentState>,
}

/// Bytes used against the configured quota.
#[derive(Debug, Clone, Copy)]
pub struct UsageStats {
    pub used_bytes: usize,
    pub quota_bytes: usize,
}

/// Debounced write-through cache. Saves are fire-and-forget; write failures
/// (including quota overruns) are logged and swallowed so callers never see
/// persistence errors.
pub struct StateCache<S> {
    store: Arc<S>,
    config: CacheConfig,
    debouncer: Debouncer<HashMap<ConversationId, AgentState>>,
}

impl<S: KvStore + 'static> StateCache<S> {
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        let flush_store = store.clone();
        let version = config.version;
        let quota = config.quota_bytes;
        let debouncer = Debouncer::new(Duration::from_millis(config.debounce_ms), move |data| {
            if let Err(error) = write_record(flush_store.as_ref(), version, quota, data) {
                tracing::warn!(target: "persist", "agent state write failed: {error}");
            }
        });
        Self {
            store,
            config,
            debouncer,
        }
    }

    /// Schedule a snapshot write. Bursts within the debounce window collapse
    /// to one write of the latest snapshot.
    pub fn save(&self, data: HashMap<ConversationId, AgentState>) {
        self.debouncer.submit(data);
    }

    /// Read back the persisted snapshot. Absent, unreadable, or
    /// version-mismatched records all come back as `None`.
    pub fn load(&self) -> Option<HashMap<ConversationId, AgentState>> {
        let raw = match self.store.get(CACHE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(target: "persist", "agent state read failed: {error}");
                return None;
            }
        };
        let record: CacheRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(target: "persist", "discarding unreadable cache record: {error}");
                return None;
            }
        };
        if record.version != self.config.version {
            tracing::debug!(
                target: "persist",
                "discarding cache record with version {} (want {})",
                record.version,
                self.config.version
            );
            return None;
        }
        Some(record.data)
    }

    pub fn clear(&self) {
        if let Err(error) = self.store.remove(CACHE_KEY) {
            tracing::warn!(target: "persist", "agent state clear failed: {error}");
        }
    }

    /// Raw record as stored, for diagnostics.
    pub fn inspect(&self) -> Option<String> {
        self.store.get(CACHE_KEY).ok().flatten()
    }

    pub fn usage_stats(&self) -> UsageStats {
        UsageStats {
            used_bytes: self.inspect().map_or(0, |raw| raw.len()),
            quota_bytes: self.config.quota_bytes,
        }
    }
}

impl<S> std::fmt::Debug for StateCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn write_record<S: KvStore>(
    store: &S,
    version: u32,
    quota: usize,
    data: HashMap<ConversationId, AgentState>,
) -> Result<(), PersistenceError> {
    let record = CacheRecord {
        version,
        timestamp: Utc::now(),
        data,
    };
    let raw = serde_json::to_string(&record)?;
    if raw.len() > quota {
        return Err(PersistenceError::QuotaExceeded {
            size: raw.len(),
            quota,
        });
    }
    store.set(CACHE_KEY, &raw)
}
