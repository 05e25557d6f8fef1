//! Attachment upload orchestration.
//!
//! The manager runs the three-phase protocol (initiate, transfer, finalize)
//! per file and reports lifecycle and progress as attachment events into the
//! same sink the store drains, so upload state flows through the ordinary
//! event pipeline.

mod http;
mod manager;

pub use http::HttpUploadTransport;
pub use manager::{UploadConfig, UploadFile, UploadManager, UploadPhase, UploadStatus};
