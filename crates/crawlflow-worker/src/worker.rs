//! Worker lifecycle management.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bridge::{Handled, QueueBridge};
use crate::queue::MessageQueue;

/// Pause after a failed receive before polling again.
const RECEIVE_BACKOFF: Duration = Duration::from_millis(500);

/// Pulls fetch outcomes and hands each one to the bridge on its own task.
pub struct Worker<Q: MessageQueue> {
    /// Worker identifier, for logs.
    worker_id: String,

    /// Queue the bridge reads from.
    queue: Arc<Q>,

    /// Bridge shared by all in-flight tasks.
    bridge: Arc<QueueBridge<Q>>,

    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,

    receive_wait: Duration,

    shutdown_grace: Duration,
}

impl<Q: MessageQueue> Worker<Q> {
    pub fn new(
        worker_id: impl Into<String>,
        queue: Arc<Q>,
        bridge: Arc<QueueBridge<Q>>,
        max_concurrent: usize,
        receive_wait: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            bridge,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            receive_wait,
            shutdown_grace,
        }
    }

    /// Run until `cancel` fires, then drain in-flight deliveries.
    ///
    /// Deliveries still running when the grace period ends are dropped
    /// unacknowledged and come back through redelivery.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(worker_id = %self.worker_id, "Worker started");

        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => permit?,
            };

            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.queue.receive(self.receive_wait) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    let bridge = self.bridge.clone();
                    tasks.spawn(async move {
                        // Keep permit until done
                        let _permit = permit;

                        match bridge.handle(delivery).await {
                            Ok(Handled::Routed(_)) => {}
                            Ok(Handled::Requeued) => {
                                tracing::debug!("Delivery requeued");
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to settle delivery");
                            }
                        }
                    });
                }
                Ok(None) => {
                    drop(permit);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Receive failed");
                    drop(permit);
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Delivery task panicked");
                }
            }
        }

        tracing::info!(
            worker_id = %self.worker_id,
            in_flight = tasks.len(),
            "Shutting down, draining in-flight deliveries"
        );

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Delivery task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                worker_id = %self.worker_id,
                abandoned = tasks.len(),
                "Grace period elapsed, abandoning in-flight deliveries"
            );
            tasks.abort_all();
        }

        tracing::info!(worker_id = %self.worker_id, "Worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryQueue, QueueNames};
    use crawlflow_core::model::{FetchOutcome, FetchResponse, WorkItem};
    use crawlflow_core::tracker::encode_outcome;
    use crawlflow_core::workflow::parse_workflow_json;
    use crawlflow_core::StepExecutor;

    const WORKFLOW: &str = r#"{
        "taskInfo": {"id": 3},
        "workflowSteps": [
            {"type": "data_extraction", "config": {"extractionRules": [
                {"fieldName": "title", "expression": "h1"}
            ]}}
        ]
    }"#;

    fn worker(queue: Arc<MemoryQueue>, names: QueueNames) -> Worker<MemoryQueue> {
        let executor = Arc::new(StepExecutor::new(Arc::new(parse_workflow_json(WORKFLOW).unwrap())));
        let bridge = Arc::new(QueueBridge::new(queue.clone(), executor, names));
        Worker::new(
            "test-worker",
            queue,
            bridge,
            2,
            Duration::from_millis(20),
            Duration::from_secs(5),
        )
    }

    fn page(n: usize) -> Vec<u8> {
        let item = WorkItem::seed(format!("https://example.com/{}", n));
        let response = FetchResponse {
            status: 200,
            body: format!("<h1>Page {}</h1>", n),
            ..Default::default()
        };
        encode_outcome(&FetchOutcome::success(item, response)).unwrap()
    }

    #[tokio::test]
    async fn test_worker_processes_until_cancelled() {
        let names = QueueNames::default();
        let queue = Arc::new(MemoryQueue::new(names.clone()));
        for n in 0..5 {
            queue.push_response(page(n));
        }

        let worker = Arc::new(worker(queue.clone(), names.clone()));
        let cancel = CancellationToken::new();
        let handle = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while queue.acked() < 5 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.acked(), 5);
        assert_eq!(queue.published(&names.data).len(), 5);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_worker_stops_when_idle() {
        let names = QueueNames::default();
        let queue = Arc::new(MemoryQueue::new(names.clone()));
        let worker = worker(queue, names);

        let cancel = CancellationToken::new();
        cancel.cancel();
        worker.run(cancel).await.unwrap();
    }
}
