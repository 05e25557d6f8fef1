//! Event ingestion: one pipeline of named processors over the typed union.

pub mod pipeline;
pub mod processor;
pub mod processors;

pub use pipeline::EventPipeline;
pub use processor::{EventProcessor, ProcessingContext, ProcessingResult};
