//! Units that travel through the queues.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Extracted value: a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Many(Vec<String>),
}

impl FieldValue {
    /// An empty list, the value of a field with no matches.
    pub fn empty() -> Self {
        FieldValue::Many(Vec::new())
    }

    /// Whether the value holds nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Single(s) => s.is_empty(),
            FieldValue::Many(v) => v.is_empty(),
        }
    }

    /// All values in order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            FieldValue::Single(s) => vec![s.as_str()],
            FieldValue::Many(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }

    /// First value, if any.
    pub fn first(&self) -> Option<&str> {
        match self {
            FieldValue::Single(s) => Some(s.as_str()),
            FieldValue::Many(v) => v.first().map(|s| s.as_str()),
        }
    }

    /// JSON view used by conditions and templates.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Single(s) => serde_json::json!(s),
            FieldValue::Many(v) => serde_json::json!(v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Single(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Single(s)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::Many(v)
    }
}

/// Field name to value mapping with deterministic ordering.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Default HTTP method for work items.
pub fn default_method() -> String {
    "GET".to_string()
}

/// One in-flight unit of crawl state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// Target URL.
    pub url: String,

    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,

    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Optional request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Position into the workflow's step list.
    pub workflow_index: usize,

    /// Fields accumulated by earlier steps.
    #[serde(default)]
    pub carry_state: FieldMap,

    /// Transient failures already spent on this item.
    #[serde(default)]
    pub attempt: u32,
}

impl WorkItem {
    /// Create a fresh seed at index 0 with empty carry state.
    pub fn seed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            workflow_index: 0,
            carry_state: FieldMap::new(),
            attempt: 0,
        }
    }

    /// Set the method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set the headers.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Set the workflow index.
    pub fn at_index(mut self, workflow_index: usize) -> Self {
        self.workflow_index = workflow_index;
        self
    }

    /// Set the carry state.
    pub fn with_carry_state(mut self, carry_state: FieldMap) -> Self {
        self.carry_state = carry_state;
        self
    }

    /// Same item, one more attempt spent.
    pub fn retried(&self) -> Self {
        let mut item = self.clone();
        item.attempt += 1;
        item
    }
}

/// A successful HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// A failed fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchFailure {
    pub reason: String,
    #[serde(default)]
    pub status: Option<u16>,
}

/// A work item paired with what the fetch layer observed.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub work_item: WorkItem,
    pub result: Result<FetchResponse, FetchFailure>,
}

impl FetchOutcome {
    /// Successful outcome.
    pub fn success(work_item: WorkItem, response: FetchResponse) -> Self {
        Self {
            work_item,
            result: Ok(response),
        }
    }

    /// Failed outcome.
    pub fn failure(work_item: WorkItem, reason: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            work_item,
            result: Err(FetchFailure {
                reason: reason.into(),
                status,
            }),
        }
    }
}

/// Finalized data destined for the persistence sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedRecord {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    pub source_url: String,
    pub step_id: String,
    pub workflow_index: usize,
    pub fields: FieldMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitted_at: Option<DateTime<Utc>>,
}

/// Unrecoverable outcome for one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub task_id: String,
    pub source_url: String,
    #[serde(default)]
    pub workflow_index: Option<usize>,
    pub kind: ErrorKind,
    pub reason: String,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_item: Option<WorkItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitted_at: Option<DateTime<Utc>>,
}

impl ErrorRecord {
    /// Error record for a decoded work item.
    pub fn for_item(task_id: &str, item: &WorkItem, kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            source_url: item.url.clone(),
            workflow_index: Some(item.workflow_index),
            kind,
            reason: reason.into(),
            attempt: item.attempt,
            work_item: Some(item.clone()),
            emitted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_untagged() {
        let single: FieldValue = serde_json::from_str("\"Title\"").unwrap();
        assert_eq!(single, FieldValue::Single("Title".into()));

        let many: FieldValue = serde_json::from_str("[\"a\", \"b\"]").unwrap();
        assert_eq!(many.values(), vec!["a", "b"]);
        assert!(FieldValue::empty().is_empty());
        assert_eq!(FieldValue::empty().first(), None);
    }

    #[test]
    fn test_work_item_wire_names() {
        let item = WorkItem::seed("https://example.com").at_index(2);
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["workflowIndex"], 2);
        assert_eq!(json["method"], "GET");
        assert!(json.get("carryState").is_some());
        assert!(json.get("body").is_none());
    }

    #[test]
    fn test_work_item_defaults_on_decode() {
        let item: WorkItem =
            serde_json::from_str(r#"{"url": "https://example.com", "workflowIndex": 1}"#).unwrap();
        assert_eq!(item.method, "GET");
        assert_eq!(item.attempt, 0);
        assert!(item.carry_state.is_empty());
    }

    #[test]
    fn test_retried_increments_attempt_only() {
        let item = WorkItem::seed("https://example.com");
        let retried = item.retried();
        assert_eq!(retried.attempt, 1);
        assert_eq!(retried.url, item.url);
        assert_eq!(retried.workflow_index, item.workflow_index);
    }

    #[test]
    fn test_error_record_for_item() {
        let item = WorkItem::seed("https://example.com").at_index(1);
        let record = ErrorRecord::for_item("7", &item, ErrorKind::MissingRequiredField, "title");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["taskId"], "7");
        assert_eq!(json["sourceUrl"], "https://example.com");
        assert_eq!(json["workflowIndex"], 1);
        assert_eq!(json["kind"], "missing_required_field");
    }
}
