use crate::error::{Error, Result};
use tracing::warn;

use super::processor::{EventProcessor, ProcessingContext, ProcessingResult};
use super::processors::{
    AttachmentEventProcessor, ConversationEventProcessor, MessageEventProcessor,
    SnapshotEventProcessor, ToolEventProcessor,
};
use palaver_api::ClientEvent;

pub struct EventPipeline {
    processors: Vec<Box<dyn EventProcessor>>,
}

impl EventPipeline {
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    /// Pipeline wired with the full event vocabulary, one processor per
    /// concern.
    pub fn standard() -> Self {
        Self::new()
            .add_processor(Box::new(ConversationEventProcessor::new()))
            .add_processor(Box::new(MessageEventProcessor::new()))
            .add_processor(Box::new(ToolEventProcessor::new()))
            .add_processor(Box::new(AttachmentEventProcessor::new()))
            .add_processor(Box::new(SnapshotEventProcessor::new()))
    }

    pub fn add_processor(mut self, processor: Box<dyn EventProcessor>) -> Self {
        self.processors.push(processor);
        self.processors.sort_by_key(|p| p.priority());
        self
    }

    pub fn process_event(&mut self, event: ClientEvent, ctx: &mut ProcessingContext) -> Result<()> {
        for processor in &mut self.processors {
            if !processor.can_handle(&event) {
                continue;
            }

            match processor.process(event.clone(), ctx) {
                ProcessingResult::Handled | ProcessingResult::NotHandled => {
                    continue;
                }
                ProcessingResult::Failed(error) => {
                    warn!(target: "store.pipeline", "Processor {} failed: {}", processor.name(), error);
                    return Err(Error::EventProcessing(format!(
                        "Event processing failed in {}: {}",
                        processor.name(),
                        error
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn processor_names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }
}

impl Default for EventPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for EventPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPipeline")
            .field("processor_count", &self.processor_count())
            .field("processors", &self.processor_names())
            .finish()
    }
}
