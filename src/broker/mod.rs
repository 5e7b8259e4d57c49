//! The `broker` module holds the domain core: the message model, the queue
//! engine that owns per-topic message state, and the topic registry that
//! enforces publisher/subscriber registration rules on top of storage.

pub mod clock;
pub mod engine;
pub mod message;
pub mod registry;

pub use clock::{Clock, SystemClock};
pub use engine::{QueueEngine, QueueHandle, QueueStats};
pub use message::Message;
pub use registry::{MessageDraft, TopicRegistry, TopicService};
