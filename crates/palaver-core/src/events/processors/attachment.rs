//! AttachmentEventProcessor - handles upload lifecycle events.
//!
//! These events come from the upload orchestrator, not backend push; the
//! store treats them like any other event. Uploading/available perform the
//! dual-write (global view + active conversation's agent state), progress
//! touches only the transient global copy, and a failure never fabricates a
//! per-conversation entry.

use crate::events::processor::{EventProcessor, ProcessingContext, ProcessingResult};
use palaver_api::ClientEvent;

pub struct AttachmentEventProcessor;

impl AttachmentEventProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl EventProcessor for AttachmentEventProcessor {
    fn priority(&self) -> usize {
        80
    }

    fn can_handle(&self, event: &ClientEvent) -> bool {
        matches!(
            event,
            ClientEvent::AttachmentUploading { .. }
                | ClientEvent::AttachmentProgress { .. }
                | ClientEvent::AttachmentAvailable { .. }
                | ClientEvent::AttachmentFailed { .. }
        )
    }

    fn process(&mut self, event: ClientEvent, ctx: &mut ProcessingContext) -> ProcessingResult {
        match event {
            ClientEvent::AttachmentUploading { attachment }
            | ClientEvent::AttachmentAvailable { attachment } => {
                ctx.store.upsert_attachment(attachment);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::AttachmentProgress {
                attachment_id,
                progress,
            } => {
                ctx.store.set_attachment_progress(&attachment_id, progress);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            ClientEvent::AttachmentFailed {
                attachment_id,
                error,
            } => {
                ctx.store.fail_attachment(&attachment_id, &error);
                *ctx.state_updated = true;
                ProcessingResult::Handled
            }
            _ => ProcessingResult::NotHandled,
        }
    }

    fn name(&self) -> &'static str {
        "AttachmentEventProcessor"
    }
}

impl Default for AttachmentEventProcessor {
    fn default() -> Self {
        Self::new()
    }
}
