pub mod attachment;
pub mod conversation;
pub mod message;
pub mod snapshot;
pub mod tool;

pub use attachment::AttachmentEventProcessor;
pub use conversation::ConversationEventProcessor;
pub use message::MessageEventProcessor;
pub use snapshot::SnapshotEventProcessor;
pub use tool::ToolEventProcessor;
