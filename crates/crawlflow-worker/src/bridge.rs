//! Queue bridge.
//!
//! Consume-process-produce for one delivery: decode the fetch outcome,
//! run the current step, and publish every result as one batch. The delivery
//! is acknowledged only after the whole batch is published; any publish
//! failure nacks it so the outcome is redelivered and routed again.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crawlflow_core::error::{ErrorKind, StepError};
use crawlflow_core::model::{ErrorRecord, ExtractedRecord, FetchOutcome, WorkItem};
use crawlflow_core::retry::{RetryDecision, RetryPolicy};
use crawlflow_core::tracker::{check_progression, decode_outcome, encode_outcome, encode_work_item};
use crawlflow_core::StepExecutor;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::queue::{MessageQueue, Outbound, QueueError, QueueNames, Received};

/// One routing decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Next fetch, or a fetch retry.
    Request(WorkItem),
    /// Re-process a response whose step timed out.
    Response(FetchOutcome),
    Data(ExtractedRecord),
    Error(ErrorRecord),
}

/// Everything produced for one fetch outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingPlan {
    pub routes: Vec<Route>,
}

/// Route counts, for logs and the replay tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    pub requests: usize,
    pub responses: usize,
    pub records: usize,
    pub errors: usize,
}

impl RoutingPlan {
    fn error(record: ErrorRecord) -> Self {
        Self {
            routes: vec![Route::Error(record)],
        }
    }

    pub fn summary(&self) -> RouteSummary {
        let mut summary = RouteSummary::default();
        for route in &self.routes {
            match route {
                Route::Request(_) => summary.requests += 1,
                Route::Response(_) => summary.responses += 1,
                Route::Data(_) => summary.records += 1,
                Route::Error(_) => summary.errors += 1,
            }
        }
        summary
    }

    /// Serialize into a publish batch.
    ///
    /// Message ids are `<delivery_id>-<kind>-<content hash>-<n>`, where `n`
    /// counts identical routes within the plan. The hash covers the payload
    /// before `emittedAt` is stamped, so a redelivery publishes each output
    /// under the same id no matter how its plan is ordered, and a different
    /// plan for the same delivery never reuses an id.
    pub fn into_batch(
        self,
        names: &QueueNames,
        delivery_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Outbound>, serde_json::Error> {
        let mut occurrences: HashMap<String, usize> = HashMap::new();
        let mut batch = Vec::with_capacity(self.routes.len());

        for route in self.routes {
            let (kind, subject, content, payload) = match route {
                Route::Request(item) => {
                    let payload = encode_work_item(&item)?;
                    ("request", &names.requests, payload.clone(), payload)
                }
                Route::Response(outcome) => {
                    let payload = encode_outcome(&outcome)?;
                    ("response", &names.responses, payload.clone(), payload)
                }
                Route::Data(mut record) => {
                    record.emitted_at = None;
                    let content = serde_json::to_vec(&record)?;
                    record.emitted_at = Some(now);
                    ("data", &names.data, content, serde_json::to_vec(&record)?)
                }
                Route::Error(mut record) => {
                    record.emitted_at = None;
                    let content = serde_json::to_vec(&record)?;
                    record.emitted_at = Some(now);
                    ("error", &names.errors, content, serde_json::to_vec(&record)?)
                }
            };

            let key = format!("{}-{}-{}", delivery_id, kind, content_digest(&content));
            let seen = occurrences.entry(key.clone()).or_insert(0);
            let msg_id = format!("{}-{}", key, seen);
            *seen += 1;

            batch.push(Outbound {
                subject: subject.clone(),
                msg_id,
                payload,
            });
        }

        Ok(batch)
    }
}

/// First 8 bytes of the SHA-256 of `content`, hex encoded.
fn content_digest(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    hex::encode(&digest[..8])
}

/// Plan the routing of one response-queue payload.
///
/// Never fails: every input resolves to requests, records or error records.
pub async fn plan(executor: &Arc<StepExecutor>, payload: &[u8]) -> RoutingPlan {
    let definition = executor.definition();
    let task_id = definition.task_id().to_string();

    let outcome = match decode_outcome(payload, definition.len()) {
        Ok(outcome) => outcome,
        Err(rejection) => {
            tracing::warn!(
                url = %rejection.source_url,
                workflow_index = ?rejection.workflow_index,
                error = %rejection.error,
                "Rejected fetch outcome"
            );
            return RoutingPlan::error(rejection.into_error_record(&task_id));
        }
    };

    let item = outcome.work_item;
    let step = match executor.step_for(&item) {
        Ok(step) => step,
        Err(e) => return RoutingPlan::error(ErrorRecord::for_item(&task_id, &item, e.kind(), e.to_string())),
    };
    let policy = RetryPolicy::for_step(step);
    let timeout = step.timeout;

    let response = match outcome.result {
        Ok(response) => response,
        Err(failure) => {
            let error = StepError::Transient(failure.reason);
            return retry_or_fail(&task_id, &item, &policy, error, Route::Request);
        }
    };

    let run = {
        let executor = executor.clone();
        let item = item.clone();
        let response = response.clone();
        tokio::task::spawn_blocking(move || executor.execute(&item, &response))
    };

    match tokio::time::timeout(timeout, run).await {
        Err(_) => {
            // The blocking task keeps running to completion; its result is discarded.
            let error = StepError::Timeout(timeout.as_secs());
            retry_or_fail(&task_id, &item, &policy, error, |retried| {
                Route::Response(FetchOutcome::success(retried, response))
            })
        }
        Ok(Err(join_error)) => {
            tracing::error!(url = %item.url, error = %join_error, "Step execution aborted");
            RoutingPlan::error(ErrorRecord::for_item(
                &task_id,
                &item,
                ErrorKind::PermanentStepFailure,
                format!("step execution aborted: {}", join_error),
            ))
        }
        Ok(Ok(Err(error))) => {
            tracing::warn!(url = %item.url, workflow_index = item.workflow_index, error = %error, "Step failed");
            RoutingPlan::error(ErrorRecord::for_item(&task_id, &item, error.kind(), error.to_string()))
        }
        Ok(Ok(Ok(step_outcome))) => {
            if let Err(error) = check_progression(&item, &step_outcome.requests) {
                return RoutingPlan::error(ErrorRecord::for_item(&task_id, &item, error.kind(), error.to_string()));
            }

            let mut routes = Vec::new();
            routes.extend(step_outcome.requests.into_iter().map(Route::Request));
            routes.extend(step_outcome.records.into_iter().map(Route::Data));
            routes.extend(step_outcome.errors.into_iter().map(Route::Error));
            RoutingPlan { routes }
        }
    }
}

fn retry_or_fail<F>(task_id: &str, item: &WorkItem, policy: &RetryPolicy, error: StepError, route: F) -> RoutingPlan
where
    F: FnOnce(WorkItem) -> Route,
{
    match policy.decide(item) {
        RetryDecision::Retry(retried) => {
            tracing::info!(
                url = %item.url,
                workflow_index = item.workflow_index,
                attempt = retried.attempt,
                error = %error,
                "Retrying transient failure"
            );
            RoutingPlan {
                routes: vec![route(retried)],
            }
        }
        RetryDecision::Exhausted => {
            tracing::warn!(
                url = %item.url,
                workflow_index = item.workflow_index,
                attempt = item.attempt,
                error = %error,
                "Retries exhausted"
            );
            RoutingPlan::error(ErrorRecord::for_item(
                task_id,
                item,
                ErrorKind::PermanentStepFailure,
                format!("{} (after {} attempts)", error, item.attempt + 1),
            ))
        }
    }
}

/// Result of handling one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Everything published, delivery acknowledged.
    Routed(RouteSummary),
    /// Publishing failed, delivery returned for redelivery.
    Requeued,
}

/// Bridge between the response queue and the output queues.
pub struct QueueBridge<Q: MessageQueue> {
    queue: Arc<Q>,
    executor: Arc<StepExecutor>,
    names: QueueNames,
}

impl<Q: MessageQueue> QueueBridge<Q> {
    pub fn new(queue: Arc<Q>, executor: Arc<StepExecutor>, names: QueueNames) -> Self {
        Self { queue, executor, names }
    }

    pub fn names(&self) -> &QueueNames {
        &self.names
    }

    /// Process one delivery end to end.
    pub async fn handle(&self, delivery: Q::Delivery) -> Result<Handled, QueueError> {
        let delivery_id = delivery.delivery_id();
        let plan = plan(&self.executor, delivery.payload()).await;
        let summary = plan.summary();

        let batch = match plan.into_batch(&self.names, &delivery_id, Utc::now()) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(delivery_id = %delivery_id, error = %e, "Failed to encode routing plan");
                self.queue.nack(&delivery).await?;
                return Ok(Handled::Requeued);
            }
        };

        match self.queue.publish_batch(&batch).await {
            Ok(()) => {
                self.queue.ack(&delivery).await?;
                tracing::debug!(
                    delivery_id = %delivery_id,
                    requests = summary.requests,
                    responses = summary.responses,
                    records = summary.records,
                    errors = summary.errors,
                    "Fetch outcome routed"
                );
                Ok(Handled::Routed(summary))
            }
            Err(e) => {
                tracing::warn!(delivery_id = %delivery_id, error = %e, "Routing failed, requeueing");
                self.queue.nack(&delivery).await?;
                Ok(Handled::Requeued)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crawlflow_core::model::FetchResponse;
    use crawlflow_core::tracker::decode_work_item;
    use crawlflow_core::workflow::parse_workflow_json;

    const SCENARIO: &str = r#"{
        "taskInfo": {"id": 7, "name": "scenario"},
        "workflowSteps": [
            {"id": "fetch", "type": "request", "retryCount": 2,
             "config": {"url": "https://example.com"}},
            {"id": "links", "type": "link_extraction",
             "config": {"linkExtractionRules": [
                {"fieldName": "link", "expression": "a::attr(href)", "multiple": true}
             ]}},
            {"id": "detail", "type": "data_extraction",
             "config": {"extractionRules": [
                {"fieldName": "title", "expression": "h1", "multiple": true},
                {"fieldName": "sku", "expression": ".sku", "required": true}
             ]}}
        ]
    }"#;

    fn setup() -> (Arc<MemoryQueue>, QueueBridge<MemoryQueue>, QueueNames) {
        let names = QueueNames::default();
        let queue = Arc::new(MemoryQueue::new(names.clone()));
        let executor = Arc::new(StepExecutor::new(Arc::new(parse_workflow_json(SCENARIO).unwrap())));
        let bridge = QueueBridge::new(queue.clone(), executor, names.clone());
        (queue, bridge, names)
    }

    fn ok(item: WorkItem, body: &str) -> Vec<u8> {
        let response = FetchResponse {
            status: 200,
            body: body.to_string(),
            ..Default::default()
        };
        encode_outcome(&FetchOutcome::success(item, response)).unwrap()
    }

    fn failed(item: WorkItem) -> Vec<u8> {
        encode_outcome(&FetchOutcome::failure(item, "connection reset", None)).unwrap()
    }

    async fn handle_next(queue: &MemoryQueue, bridge: &QueueBridge<MemoryQueue>) -> Handled {
        let delivery = queue.try_receive().unwrap();
        bridge.handle(delivery).await.unwrap()
    }

    fn errors(queue: &MemoryQueue, names: &QueueNames) -> Vec<ErrorRecord> {
        queue
            .published(&names.errors)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_scenario_over_queue() {
        let (queue, bridge, names) = setup();
        let seed = WorkItem::seed("https://example.com");

        queue.push_response(ok(seed, ""));
        assert!(matches!(handle_next(&queue, &bridge).await, Handled::Routed(s) if s.requests == 1));
        let at_links = decode_work_item(&queue.published(&names.requests)[0]).unwrap();
        assert_eq!(at_links.workflow_index, 1);

        let listing = r#"<a href="/a">A</a><a href="/b">B</a>"#;
        queue.push_response(ok(at_links, listing));
        handle_next(&queue, &bridge).await;
        let details: Vec<WorkItem> = queue.published(&names.requests)[1..]
            .iter()
            .map(|p| decode_work_item(p).unwrap())
            .collect();
        assert_eq!(details.len(), 2);
        assert!(details.iter().all(|d| d.workflow_index == 2));

        for detail in details {
            queue.push_response(ok(detail, r#"<h1>Item</h1><span class="sku">X1</span>"#));
            handle_next(&queue, &bridge).await;
        }

        let records: Vec<ExtractedRecord> = queue
            .published(&names.data)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.emitted_at.is_some() && r.task_id == "7"));
        assert_eq!(queue.acked(), 4);
        assert!(queue.published(&names.errors).is_empty());
    }

    #[tokio::test]
    async fn test_three_fetch_failures_yield_one_error() {
        let (queue, bridge, names) = setup();
        let mut item = WorkItem::seed("https://example.com");

        for attempt in 0..3 {
            queue.push_response(failed(item.clone()));
            handle_next(&queue, &bridge).await;

            if attempt < 2 {
                assert!(errors(&queue, &names).is_empty(), "error emitted after failure {}", attempt + 1);
                item = decode_work_item(queue.published(&names.requests).last().unwrap()).unwrap();
                assert_eq!(item.attempt, attempt + 1);
            }
        }

        let errors = errors(&queue, &names);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::PermanentStepFailure);
        assert_eq!(errors[0].attempt, 2);
        assert_eq!(queue.published(&names.requests).len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_payload_goes_to_errors() {
        let (queue, bridge, names) = setup();
        queue.push_response(br#"{"workItem": {"url": "https://example.com/x", "workflowIndex": -3}}"#.to_vec());

        handle_next(&queue, &bridge).await;

        let errors = errors(&queue, &names);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::CorruptWorkItem);
        assert_eq!(errors[0].source_url, "https://example.com/x");
        assert!(queue.published(&names.requests).is_empty());
        assert_eq!(queue.acked(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_index_goes_to_errors() {
        let (queue, bridge, names) = setup();
        queue.push_response(ok(WorkItem::seed("https://example.com").at_index(3), "<h1>x</h1>"));

        handle_next(&queue, &bridge).await;

        let errors = errors(&queue, &names);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::WorkflowIndexOutOfRange);
        assert!(queue.published(&names.data).is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_field() {
        let (queue, bridge, names) = setup();
        queue.push_response(ok(WorkItem::seed("https://example.com/a").at_index(2), "<h1>No sku</h1>"));

        handle_next(&queue, &bridge).await;

        let errors = errors(&queue, &names);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::MissingRequiredField);
        assert!(queue.published(&names.data).is_empty());
    }

    #[tokio::test]
    async fn test_failed_destination_publishes_nothing() {
        let (queue, bridge, names) = setup();
        queue.fail_subject(&names.requests);

        let listing = r#"<a href="/a">A</a><a href="/b">B</a>"#;
        queue.push_response(ok(WorkItem::seed("https://example.com").at_index(1), listing));

        assert_eq!(handle_next(&queue, &bridge).await, Handled::Requeued);
        assert!(queue.published(&names.requests).is_empty());
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.acked(), 0);

        queue.heal_subject(&names.requests);
        assert!(matches!(handle_next(&queue, &bridge).await, Handled::Routed(s) if s.requests == 2));
        assert_eq!(queue.published(&names.requests).len(), 2);
        assert_eq!(queue.acked(), 1);
    }

    #[tokio::test]
    async fn test_same_outcome_twice_is_valid_each_time() {
        let (_, bridge, _) = setup();
        let payload = ok(WorkItem::seed("https://example.com").at_index(1), r#"<a href="/a">A</a>"#);

        let first = plan(&bridge.executor, &payload).await;
        let second = plan(&bridge.executor, &payload).await;
        assert_eq!(first, second);
        assert_eq!(first.summary().requests, 1);
    }

    const SLOW_WORKFLOW: &str = r#"{
        "taskInfo": {"id": 8},
        "workflowSteps": [
            {"id": "detail", "type": "data_extraction", "timeout": 0.000001, "retryCount": 1,
             "config": {"extractionRules": [
                {"fieldName": "rows", "expression": "li", "multiple": true}
             ]}}
        ]
    }"#;

    fn slow_page() -> String {
        let rows: String = (0..50_000).map(|n| format!("<li class=\"row\">{}</li>", n)).collect();
        format!("<ul>{}</ul>", rows)
    }

    fn slow_executor() -> Arc<StepExecutor> {
        Arc::new(StepExecutor::new(Arc::new(parse_workflow_json(SLOW_WORKFLOW).unwrap())))
    }

    #[tokio::test]
    async fn test_step_timeout_requeues_response() {
        let executor = slow_executor();
        let body = slow_page();
        let item = WorkItem::seed("https://example.com/slow");

        let routing = plan(&executor, &ok(item.clone(), &body)).await;

        assert_eq!(routing.routes.len(), 1);
        match &routing.routes[0] {
            Route::Response(outcome) => {
                assert_eq!(outcome.work_item.attempt, 1);
                assert_eq!(outcome.work_item.url, item.url);
                assert_eq!(outcome.result.as_ref().unwrap().body, body);
            }
            other => panic!("unexpected route: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_step_timeout_exhausts_budget() {
        let executor = slow_executor();
        let item = WorkItem::seed("https://example.com/slow").retried();

        let routing = plan(&executor, &ok(item, &slow_page())).await;

        assert_eq!(routing.summary().errors, 1);
        match &routing.routes[0] {
            Route::Error(record) => {
                assert_eq!(record.kind, ErrorKind::PermanentStepFailure);
                assert_eq!(record.attempt, 1);
                assert!(record.reason.contains("timed out"));
            }
            other => panic!("unexpected route: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_ids_follow_content() {
        let names = QueueNames::default();
        let a = WorkItem::seed("https://example.com/a").at_index(1);
        let b = WorkItem::seed("https://example.com/b").at_index(1);
        let ids = |routes: Vec<Route>| -> Vec<String> {
            RoutingPlan { routes }
                .into_batch(&names, "41", Utc::now())
                .unwrap()
                .into_iter()
                .map(|o| o.msg_id)
                .collect()
        };

        let first = ids(vec![Route::Request(a.clone()), Route::Request(b.clone())]);
        assert_ne!(first[0], first[1]);
        assert!(first.iter().all(|id| id.starts_with("41-request-")));

        // Same output, different position: same id.
        let reordered = ids(vec![Route::Request(b.clone())]);
        assert_eq!(reordered[0], first[1]);

        // A different plan for the same delivery never collides.
        let outcome = FetchOutcome::success(a.retried(), FetchResponse::default());
        let timed_out = ids(vec![Route::Response(outcome)]);
        assert!(!first.contains(&timed_out[0]));

        // Identical routes stay distinct.
        let twice = ids(vec![Route::Request(a.clone()), Route::Request(a)]);
        assert_ne!(twice[0], twice[1]);
        assert_eq!(twice[0], first[0]);
    }

    #[tokio::test]
    async fn test_record_ids_ignore_emit_time() {
        let names = QueueNames::default();
        let record = ErrorRecord::for_item(
            "7",
            &WorkItem::seed("https://example.com"),
            ErrorKind::CorruptWorkItem,
            "bad",
        );
        let plan = RoutingPlan {
            routes: vec![Route::Error(record)],
        };

        let earlier = plan.clone().into_batch(&names, "9", Utc::now()).unwrap();
        let later = plan
            .into_batch(&names, "9", Utc::now() + chrono::Duration::seconds(30))
            .unwrap();
        assert_eq!(earlier[0].msg_id, later[0].msg_id);
        assert_ne!(earlier[0].payload, later[0].payload);
    }
}
