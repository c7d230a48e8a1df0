//! Message queue abstraction: publish appended events, receive-delete loop
//! for the projection worker.
//!
//! At-least-once delivery; consumers must be idempotent and acknowledge by
//! deleting the message only after successful projection.

use async_trait::async_trait;
use thiserror::Error;

mod in_memory;
mod sqs;

pub use in_memory::InMemoryEventQueue;
pub use sqs::SqsEventQueue;

/// Largest batch a single receive may return.
pub const MAX_RECEIVE_BATCH: usize = 10;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue error: {0}")]
    Other(String),
}

/// A received message plus the handle needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt: String,
    pub body: String,
}

#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Publish one message (the JSON-serialized recorded event).
    async fn publish(&self, body: String) -> Result<(), QueueError>;

    /// Receive up to `max` messages (capped at [`MAX_RECEIVE_BATCH`]).
    ///
    /// May block for a long-poll interval; an empty vector means the queue
    /// had nothing to deliver.
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge a message by receipt handle. Unacknowledged messages are
    /// redelivered.
    async fn delete(&self, receipt: &str) -> Result<(), QueueError>;
}
