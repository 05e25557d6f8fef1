//! Local persistence of agent state.
//!
//! A versioned snapshot of per-conversation agent state is written through a
//! [`KvStore`] on a debounce, so rapid event bursts coalesce into one write.
//! Persistence is best-effort: failures are logged and the session degrades
//! to in-memory operation.

mod cache;
mod debounce;
mod kv;

pub use cache::{CacheConfig, CacheRecord, StateCache, UsageStats, CACHE_VERSION};
pub use debounce::Debouncer;
pub use kv::{FileKvStore, KvStore, MemoryKvStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record of {size} bytes exceeds quota of {quota} bytes")]
    QuotaExceeded { size: usize, quota: usize },

    #[error("could not determine data directory")]
    NoDataDir,
}
