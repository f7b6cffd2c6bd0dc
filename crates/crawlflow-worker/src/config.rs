//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::queue::QueueNames;

/// Worker configuration loaded from environment variables.
///
/// Environment variables are prefixed with `CRAWLFLOW_`:
/// - `CRAWLFLOW_WORKER_ID`: Worker identifier (default: random UUID)
/// - `CRAWLFLOW_DEFINITION_PATH`: Workflow document (default: "workflow.json")
/// - `CRAWLFLOW_NATS_URL`, `CRAWLFLOW_NATS_STREAM`, `CRAWLFLOW_NATS_CONSUMER`
/// - `CRAWLFLOW_RESPONSE_SUBJECT`, `CRAWLFLOW_REQUEST_SUBJECT`,
///   `CRAWLFLOW_DATA_SUBJECT`, `CRAWLFLOW_ERROR_SUBJECT`
/// - `CRAWLFLOW_MAX_CONCURRENT`: Concurrent deliveries (default: taskInfo.concurrency, then 4)
/// - `CRAWLFLOW_RECEIVE_WAIT_MS`: Queue pop timeout (default: 5000)
/// - `CRAWLFLOW_SHUTDOWN_GRACE_SECS`: Drain time on shutdown (default: 30)
/// - `CRAWLFLOW_LOG_JSON`: JSON log output (default: false)
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Unique worker identifier.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Workflow definition file.
    #[serde(default = "default_definition_path")]
    pub definition_path: PathBuf,

    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream holding all four subjects.
    #[serde(default = "default_nats_stream")]
    pub nats_stream: String,

    /// Durable consumer on the response subject.
    #[serde(default = "default_nats_consumer")]
    pub nats_consumer: String,

    #[serde(default = "default_response_subject")]
    pub response_subject: String,

    #[serde(default = "default_request_subject")]
    pub request_subject: String,

    #[serde(default = "default_data_subject")]
    pub data_subject: String,

    #[serde(default = "default_error_subject")]
    pub error_subject: String,

    /// Maximum concurrent deliveries.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    #[serde(default = "default_receive_wait_ms")]
    pub receive_wait_ms: u64,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub log_json: bool,
}

fn default_worker_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_definition_path() -> PathBuf {
    PathBuf::from("workflow.json")
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_stream() -> String {
    "crawlflow".to_string()
}

fn default_nats_consumer() -> String {
    "crawlflow-worker".to_string()
}

fn default_response_subject() -> String {
    QueueNames::default().responses
}

fn default_request_subject() -> String {
    QueueNames::default().requests
}

fn default_data_subject() -> String {
    QueueNames::default().data
}

fn default_error_subject() -> String {
    QueueNames::default().errors
}

fn default_receive_wait_ms() -> u64 {
    5000
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Concurrency used when neither the environment nor the workflow sets one.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("CRAWLFLOW_").from_env::<WorkerConfig>()
    }

    /// Queue names handed to the bridge.
    pub fn queue_names(&self) -> QueueNames {
        QueueNames {
            responses: self.response_subject.clone(),
            requests: self.request_subject.clone(),
            data: self.data_subject.clone(),
            errors: self.error_subject.clone(),
        }
    }

    /// Concurrency limit, falling back to the workflow's hint.
    pub fn concurrency(&self, task_hint: Option<usize>) -> usize {
        self.max_concurrent
            .or(task_hint)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            definition_path: default_definition_path(),
            nats_url: default_nats_url(),
            nats_stream: default_nats_stream(),
            nats_consumer: default_nats_consumer(),
            response_subject: default_response_subject(),
            request_subject: default_request_subject(),
            data_subject: default_data_subject(),
            error_subject: default_error_subject(),
            max_concurrent: None,
            receive_wait_ms: default_receive_wait_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WorkerConfig::default();
        assert!(!config.worker_id.is_empty());
        assert_eq!(config.receive_wait(), Duration::from_secs(5));
        assert_eq!(config.queue_names(), QueueNames::default());
    }

    #[test]
    fn test_config_from_vars() {
        let vars = vec![
            ("CRAWLFLOW_WORKER_ID".to_string(), "w-1".to_string()),
            ("CRAWLFLOW_DATA_SUBJECT".to_string(), "crawl.items".to_string()),
            ("CRAWLFLOW_MAX_CONCURRENT".to_string(), "16".to_string()),
            ("CRAWLFLOW_LOG_JSON".to_string(), "true".to_string()),
        ];
        let config: WorkerConfig = envy::prefixed("CRAWLFLOW_").from_iter(vars).unwrap();

        assert_eq!(config.worker_id, "w-1");
        assert_eq!(config.queue_names().data, "crawl.items");
        assert_eq!(config.concurrency(Some(2)), 16);
        assert!(config.log_json);
        assert_eq!(config.shutdown_grace_secs, 30);
    }

    #[test]
    fn test_concurrency_fallbacks() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency(Some(8)), 8);
        assert_eq!(config.concurrency(Some(0)), DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.concurrency(None), DEFAULT_MAX_CONCURRENT);
    }
}
