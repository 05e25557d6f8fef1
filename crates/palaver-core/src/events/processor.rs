use crate::state::ChatStore;
use palaver_api::ClientEvent;

#[derive(Debug, Clone)]
pub enum ProcessingResult {
    Handled,
    NotHandled,
    Failed(String),
}

/// Mutable view handed to each processor. Handlers run to completion with
/// exclusive access; there is no interleaving within a single event.
pub struct ProcessingContext<'a> {
    pub store: &'a mut ChatStore,
    pub state_updated: &'a mut bool,
}

/// A named handler for a subset of the event vocabulary. The pipeline
/// registers one processor per concern at store construction.
pub trait EventProcessor: Send + Sync {
    fn priority(&self) -> usize {
        100
    }

    fn can_handle(&self, event: &ClientEvent) -> bool;

    fn process(&mut self, event: ClientEvent, ctx: &mut ProcessingContext) -> ProcessingResult;

    fn name(&self) -> &'static str;
}
