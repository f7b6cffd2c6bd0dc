//! Queue transport.
//!
//! The bridge talks to queues through `MessageQueue`. Two implementations:
//! - `NatsQueue`: JetStream stream with a durable pull consumer
//! - `MemoryQueue`: in-process queue for tests and offline replay

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod nats;

pub use memory::{MemoryDelivery, MemoryQueue};
pub use nats::NatsQueue;

/// Errors raised by queue transports.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue connection error: {0}")]
    Connection(String),

    #[error("Receive error: {0}")]
    Receive(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Acknowledge error: {0}")]
    Ack(String),
}

/// Names of the four queues the interpreter touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    /// Fetch outcomes consumed by the bridge.
    pub responses: String,
    /// Work items for the fetch service.
    pub requests: String,
    /// Extracted records for the persistence sink.
    pub data: String,
    /// Error records.
    pub errors: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            responses: "crawlflow.responses".to_string(),
            requests: "crawlflow.requests".to_string(),
            data: "crawlflow.data".to_string(),
            errors: "crawlflow.errors".to_string(),
        }
    }
}

impl QueueNames {
    pub fn all(&self) -> Vec<String> {
        vec![
            self.responses.clone(),
            self.requests.clone(),
            self.data.clone(),
            self.errors.clone(),
        ]
    }
}

/// One message to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub subject: String,
    /// Deduplication id; republishing the same id is a no-op.
    pub msg_id: String,
    pub payload: Vec<u8>,
}

/// A message pulled from the response queue.
pub trait Received: Send + Sync + 'static {
    fn payload(&self) -> &[u8];

    /// Stable across redeliveries of the same message.
    fn delivery_id(&self) -> String;
}

/// Transport used by the bridge and the worker loop.
#[async_trait]
pub trait MessageQueue: Send + Sync + 'static {
    type Delivery: Received;

    /// Wait up to `wait` for the next delivery.
    async fn receive(&self, wait: Duration) -> Result<Option<Self::Delivery>, QueueError>;

    /// Publish every message or report failure.
    async fn publish_batch(&self, batch: &[Outbound]) -> Result<(), QueueError>;

    async fn ack(&self, delivery: &Self::Delivery) -> Result<(), QueueError>;

    /// Return the delivery for redelivery.
    async fn nack(&self, delivery: &Self::Delivery) -> Result<(), QueueError>;
}
