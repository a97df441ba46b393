pub mod consumer;
pub mod event;
pub mod publisher;

pub use consumer::{ConsumerConfig, DelayedPoller, EventHandler, StreamConsumer};
pub use event::{DELAYED_QUEUE_KEY, Event, EventKind, EventStatus, payload};
pub use publisher::{EventOutbox, OutboxError};
