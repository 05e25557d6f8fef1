//! Event-sourced client state for conversational chat.
//!
//! The crate keeps a single canonical [`state::ChatStore`] fed by a pipeline
//! of event processors, wraps it in a [`session::ChatSession`] exposing the
//! imperative operations, and rounds it out with the upload orchestrator,
//! the debounced persistence cache, and memoized read projections.

pub mod error;
pub mod events;
pub mod persist;
pub mod session;
pub mod state;
pub mod uploads;

pub use error::{Error, Result};
pub use events::{EventPipeline, EventProcessor, ProcessingContext, ProcessingResult};
pub use persist::{CacheConfig, FileKvStore, KvStore, MemoryKvStore, StateCache};
pub use session::ChatSession;
pub use state::ChatStore;
pub use uploads::{HttpUploadTransport, UploadConfig, UploadFile, UploadManager};
