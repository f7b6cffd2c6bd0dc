//! NATS JetStream transport.
//!
//! One stream carries all four subjects. Fetch outcomes are pulled through a
//! durable consumer filtered on the response subject. Every published message
//! carries a content-derived `Nats-Msg-Id`, so when a delivery is nacked
//! after a partial publish its redelivery re-routes the already published
//! outputs to the same ids and JetStream drops them inside the stream's
//! duplicate window.

use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull::Config as ConsumerConfig, consumer::PullConsumer, Context};
use async_trait::async_trait;
use futures::StreamExt;

use super::{MessageQueue, Outbound, QueueError, QueueNames, Received};

/// JetStream duplicate window; redeliveries inside it publish nothing twice.
pub const DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// Redelivery delay after a nack, so an unavailable destination is not hammered.
pub const NAK_DELAY: Duration = Duration::from_secs(1);

/// JetStream-backed queue.
pub struct NatsQueue {
    /// JetStream context.
    js: Context,

    /// Durable pull consumer on the response subject.
    consumer: PullConsumer,
}

impl NatsQueue {
    /// Connect, ensure the stream and consumer exist.
    pub async fn connect(
        nats_url: &str,
        stream: &str,
        consumer: &str,
        names: &QueueNames,
    ) -> Result<Self, QueueError> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let js = jetstream::new(client);

        Self::ensure_stream(&js, stream, names).await?;
        let consumer = Self::ensure_consumer(&js, stream, consumer, &names.responses).await?;

        tracing::info!(nats_url = %nats_url, stream = %stream, "Connected to NATS");

        Ok(Self { js, consumer })
    }

    /// Ensure the JetStream stream exists.
    async fn ensure_stream(js: &Context, stream: &str, names: &QueueNames) -> Result<(), QueueError> {
        match js.get_stream(stream).await {
            Ok(_) => {
                tracing::debug!(stream = %stream, "Using existing NATS stream");
                Ok(())
            }
            Err(_) => {
                let config = jetstream::stream::Config {
                    name: stream.to_string(),
                    subjects: names.all(),
                    duplicate_window: DUPLICATE_WINDOW,
                    storage: jetstream::stream::StorageType::File,
                    ..Default::default()
                };

                js.create_stream(config)
                    .await
                    .map_err(|e| QueueError::Connection(e.to_string()))?;

                tracing::info!(stream = %stream, subjects = ?names.all(), "Created NATS stream");
                Ok(())
            }
        }
    }

    /// Create or get the durable consumer.
    async fn ensure_consumer(
        js: &Context,
        stream: &str,
        consumer: &str,
        subject: &str,
    ) -> Result<PullConsumer, QueueError> {
        let stream = js
            .get_stream(stream)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        match stream.get_consumer(consumer).await {
            Ok(existing) => Ok(existing),
            Err(_) => {
                let config = ConsumerConfig {
                    durable_name: Some(consumer.to_string()),
                    filter_subject: subject.to_string(),
                    ..Default::default()
                };
                let created = stream
                    .create_consumer(config)
                    .await
                    .map_err(|e| QueueError::Connection(e.to_string()))?;
                tracing::info!(consumer = %consumer, subject = %subject, "Created NATS consumer");
                Ok(created)
            }
        }
    }
}

/// Negative acknowledgement used for failed routing.
fn nak_kind() -> jetstream::AckKind {
    jetstream::AckKind::Nak(Some(NAK_DELAY))
}

impl Received for jetstream::Message {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn delivery_id(&self) -> String {
        match self.info() {
            Ok(info) => info.stream_sequence.to_string(),
            Err(_) => uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl MessageQueue for NatsQueue {
    type Delivery = jetstream::Message;

    async fn receive(&self, wait: Duration) -> Result<Option<Self::Delivery>, QueueError> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(wait)
            .messages()
            .await
            .map_err(|e| QueueError::Receive(e.to_string()))?;

        match messages.next().await {
            Some(msg) => msg.map(Some).map_err(|e| QueueError::Receive(e.to_string())),
            None => Ok(None),
        }
    }

    async fn publish_batch(&self, batch: &[Outbound]) -> Result<(), QueueError> {
        let mut acks = Vec::with_capacity(batch.len());

        for outbound in batch {
            let mut headers = async_nats::HeaderMap::new();
            headers.insert(async_nats::header::NATS_MESSAGE_ID, outbound.msg_id.as_str());

            let ack = self
                .js
                .publish_with_headers(outbound.subject.clone(), headers, outbound.payload.clone().into())
                .await
                .map_err(|e| QueueError::Publish(format!("{}: {}", outbound.subject, e)))?;
            acks.push((outbound, ack));
        }

        for (outbound, ack) in acks {
            let ack = ack
                .await
                .map_err(|e| QueueError::Publish(format!("{}: {}", outbound.subject, e)))?;
            if ack.duplicate {
                tracing::debug!(msg_id = %outbound.msg_id, subject = %outbound.subject, "Duplicate publish dropped");
            }
        }

        Ok(())
    }

    async fn ack(&self, delivery: &Self::Delivery) -> Result<(), QueueError> {
        delivery
            .ack()
            .await
            .map_err(|e| QueueError::Ack(format!("Failed to ack message: {}", e)))
    }

    async fn nack(&self, delivery: &Self::Delivery) -> Result<(), QueueError> {
        delivery
            .ack_with(nak_kind())
            .await
            .map_err(|e| QueueError::Ack(format!("Failed to nack message: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nack_delays_redelivery() {
        assert!(matches!(
            nak_kind(),
            jetstream::AckKind::Nak(Some(delay)) if delay >= Duration::from_secs(1)
        ));
    }

    #[test]
    fn test_duplicate_window_outlives_nack_delay() {
        assert!(DUPLICATE_WINDOW > NAK_DELAY);
    }
}
