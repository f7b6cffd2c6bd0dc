//! In-process queue with the same delivery semantics as the JetStream
//! transport: atomic batch publish, nack requeues, duplicate msg ids dropped.
//! Messages published to the response subject are fed back to the consumer.
//! Every message id ever published is remembered, so this queue is meant for
//! tests and short in-process runs.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{MessageQueue, Outbound, QueueError, QueueNames, Received};

/// A delivery from the in-memory queue.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDelivery {
    seq: u64,
    payload: Vec<u8>,
    /// Times this message was handed out before.
    pub redeliveries: u32,
}

impl Received for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery_id(&self) -> String {
        self.seq.to_string()
    }
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    pending: VecDeque<MemoryDelivery>,
    in_flight: HashSet<u64>,
    published: BTreeMap<String, Vec<Vec<u8>>>,
    seen_ids: HashSet<String>,
    failing: HashSet<String>,
    acked: usize,
    nacked: usize,
}

/// In-memory queue.
pub struct MemoryQueue {
    names: QueueNames,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(names: QueueNames) -> Self {
        Self {
            names,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a fetch outcome payload for the consumer.
    pub fn push_response(&self, payload: Vec<u8>) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.pending.push_back(MemoryDelivery {
            seq,
            payload,
            redeliveries: 0,
        });
        drop(inner);
        self.notify.notify_one();
    }

    /// Pop the next delivery without waiting.
    pub fn try_receive(&self) -> Option<MemoryDelivery> {
        let mut inner = self.lock();
        let delivery = inner.pending.pop_front()?;
        inner.in_flight.insert(delivery.seq);
        Some(delivery)
    }

    /// Payloads published to `subject`, in publish order.
    pub fn published(&self, subject: &str) -> Vec<Vec<u8>> {
        self.lock().published.get(subject).cloned().unwrap_or_default()
    }

    /// Make every publish touching `subject` fail until healed.
    pub fn fail_subject(&self, subject: &str) {
        self.lock().failing.insert(subject.to_string());
    }

    pub fn heal_subject(&self, subject: &str) {
        self.lock().failing.remove(subject);
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn acked(&self) -> usize {
        self.lock().acked
    }

    pub fn nacked(&self) -> usize {
        self.lock().nacked
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    type Delivery = MemoryDelivery;

    async fn receive(&self, wait: Duration) -> Result<Option<Self::Delivery>, QueueError> {
        if let Some(delivery) = self.try_receive() {
            return Ok(Some(delivery));
        }
        let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        Ok(self.try_receive())
    }

    async fn publish_batch(&self, batch: &[Outbound]) -> Result<(), QueueError> {
        let mut inner = self.lock();

        if let Some(failing) = batch.iter().find(|o| inner.failing.contains(&o.subject)) {
            return Err(QueueError::Publish(format!("{}: destination unavailable", failing.subject)));
        }

        let mut fed_back = 0;
        for outbound in batch {
            if !inner.seen_ids.insert(outbound.msg_id.clone()) {
                continue;
            }
            inner
                .published
                .entry(outbound.subject.clone())
                .or_default()
                .push(outbound.payload.clone());

            if outbound.subject == self.names.responses {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.pending.push_back(MemoryDelivery {
                    seq,
                    payload: outbound.payload.clone(),
                    redeliveries: 0,
                });
                fed_back += 1;
            }
        }
        drop(inner);

        for _ in 0..fed_back {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn ack(&self, delivery: &Self::Delivery) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if !inner.in_flight.remove(&delivery.seq) {
            return Err(QueueError::Ack(format!("message {} is not in flight", delivery.seq)));
        }
        inner.acked += 1;
        Ok(())
    }

    async fn nack(&self, delivery: &Self::Delivery) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if !inner.in_flight.remove(&delivery.seq) {
            return Err(QueueError::Ack(format!("message {} is not in flight", delivery.seq)));
        }
        inner.nacked += 1;
        let mut again = delivery.clone();
        again.redeliveries += 1;
        inner.pending.push_back(again);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn outbound(subject: &str, msg_id: &str) -> Outbound {
        Outbound {
            subject: subject.to_string(),
            msg_id: msg_id.to_string(),
            payload: msg_id.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_receive_and_ack() {
        let queue = MemoryQueue::new(QueueNames::default());
        queue.push_response(b"one".to_vec());

        let delivery = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(delivery.payload(), b"one");
        assert_eq!(queue.in_flight(), 1);

        assert_ok!(queue.ack(&delivery).await);
        assert_eq!(queue.acked(), 1);
        assert_err!(queue.ack(&delivery).await);
        assert!(queue.receive(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_same_id() {
        let queue = MemoryQueue::new(QueueNames::default());
        queue.push_response(b"one".to_vec());

        let first = queue.try_receive().unwrap();
        queue.nack(&first).await.unwrap();

        let again = queue.try_receive().unwrap();
        assert_eq!(again.delivery_id(), first.delivery_id());
        assert_eq!(again.redeliveries, 1);
        assert_eq!(queue.nacked(), 1);
    }

    #[tokio::test]
    async fn test_failing_subject_publishes_nothing() {
        let names = QueueNames::default();
        let queue = MemoryQueue::new(names.clone());
        queue.fail_subject(&names.errors);

        let batch = vec![outbound(&names.data, "1-0"), outbound(&names.errors, "1-1")];
        assert_err!(queue.publish_batch(&batch).await);
        assert!(queue.published(&names.data).is_empty());

        queue.heal_subject(&names.errors);
        assert_ok!(queue.publish_batch(&batch).await);
        assert_eq!(queue.published(&names.data).len(), 1);
        assert_eq!(queue.published(&names.errors).len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_dropped() {
        let names = QueueNames::default();
        let queue = MemoryQueue::new(names.clone());

        let batch = vec![outbound(&names.requests, "5-0")];
        queue.publish_batch(&batch).await.unwrap();
        queue.publish_batch(&batch).await.unwrap();
        assert_eq!(queue.published(&names.requests).len(), 1);
    }

    #[tokio::test]
    async fn test_response_subject_feeds_consumer() {
        let names = QueueNames::default();
        let queue = MemoryQueue::new(names.clone());

        queue.publish_batch(&[outbound(&names.responses, "9-0")]).await.unwrap();
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.try_receive().unwrap().payload(), b"9-0");
    }
}
