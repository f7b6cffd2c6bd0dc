//! Workflow state tracker.
//!
//! Owns the transport form of work items and fetch outcomes, validates the
//! workflow position on decode and enforces that lineages only move forward.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StepError;
use crate::model::{ErrorRecord, FetchFailure, FetchOutcome, FetchResponse, WorkItem};

/// Wire form of a fetch outcome. `errorReason` present means the fetch failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchOutcomeWire {
    work_item: WorkItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<String>,
}

/// A payload that never reaches the step executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub error: StepError,
    /// URL salvaged from the payload, empty when unreadable.
    pub source_url: String,
    pub workflow_index: Option<usize>,
    pub work_item: Option<WorkItem>,
}

impl Rejection {
    fn corrupt(reason: impl Into<String>, source_url: String, workflow_index: Option<usize>) -> Self {
        Self {
            error: StepError::CorruptWorkItem(reason.into()),
            source_url,
            workflow_index,
            work_item: None,
        }
    }

    /// Error record routed to the error queue.
    pub fn into_error_record(self, task_id: &str) -> ErrorRecord {
        let attempt = self.work_item.as_ref().map(|w| w.attempt).unwrap_or(0);
        ErrorRecord {
            task_id: task_id.to_string(),
            source_url: self.source_url,
            workflow_index: self.workflow_index,
            kind: self.error.kind(),
            reason: self.error.to_string(),
            attempt,
            work_item: self.work_item,
            emitted_at: None,
        }
    }
}

/// Serialize a work item for the request queue.
pub fn encode_work_item(item: &WorkItem) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(item)
}

/// Deserialize a work item from the request queue.
pub fn decode_work_item(payload: &[u8]) -> Result<WorkItem, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Serialize a fetch outcome for the response queue.
pub fn encode_outcome(outcome: &FetchOutcome) -> Result<Vec<u8>, serde_json::Error> {
    let wire = match &outcome.result {
        Ok(resp) => FetchOutcomeWire {
            work_item: outcome.work_item.clone(),
            status: Some(resp.status),
            headers: Some(resp.headers.clone()),
            body: Some(resp.body.clone()),
            elapsed_ms: Some(resp.elapsed_ms),
            error_reason: None,
        },
        Err(fail) => FetchOutcomeWire {
            work_item: outcome.work_item.clone(),
            status: fail.status,
            headers: None,
            body: None,
            elapsed_ms: None,
            error_reason: Some(fail.reason.clone()),
        },
    };
    serde_json::to_vec(&wire)
}

/// Decode a response-queue payload for a workflow of `steps` steps.
///
/// Rejects undecodable payloads and negative or non-integer indices as
/// `CorruptWorkItem`, indices past the step list as `WorkflowIndexOutOfRange`.
pub fn decode_outcome(payload: &[u8], steps: usize) -> Result<FetchOutcome, Rejection> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| Rejection::corrupt(format!("invalid JSON: {}", e), String::new(), None))?;

    let raw_item = value.get("workItem");
    let source_url = raw_item
        .and_then(|w| w.get("url"))
        .and_then(|u| u.as_str())
        .unwrap_or_default()
        .to_string();

    let raw_index = raw_item.and_then(|w| w.get("workflowIndex"));
    let index = match raw_index.and_then(|i| i.as_u64()) {
        Some(i) => i as usize,
        None => {
            let shown = raw_index.map(|i| i.to_string()).unwrap_or_else(|| "missing".to_string());
            return Err(Rejection::corrupt(
                format!("workflowIndex must be a non-negative integer, got {}", shown),
                source_url,
                None,
            ));
        }
    };

    if index > steps {
        return Err(Rejection::corrupt(
            format!("workflowIndex {} exceeds workflow length {}", index, steps),
            source_url,
            Some(index),
        ));
    }

    let wire: FetchOutcomeWire = serde_json::from_value(value)
        .map_err(|e| Rejection::corrupt(e.to_string(), source_url.clone(), Some(index)))?;

    if index == steps {
        return Err(Rejection {
            error: StepError::WorkflowIndexOutOfRange { index, len: steps },
            source_url,
            workflow_index: Some(index),
            work_item: Some(wire.work_item),
        });
    }

    let result = match (wire.error_reason, wire.status) {
        (Some(reason), status) => Err(FetchFailure { reason, status }),
        (None, Some(status)) => Ok(FetchResponse {
            status,
            headers: wire.headers.unwrap_or_default(),
            body: wire.body.unwrap_or_default(),
            elapsed_ms: wire.elapsed_ms.unwrap_or_default(),
        }),
        (None, None) => {
            return Err(Rejection {
                error: StepError::CorruptWorkItem("outcome has neither status nor errorReason".to_string()),
                source_url,
                workflow_index: Some(index),
                work_item: Some(wire.work_item),
            })
        }
    };

    Ok(FetchOutcome {
        work_item: wire.work_item,
        result,
    })
}

/// Child work item one step past `parent`, with a fresh attempt counter.
pub fn advance(parent: &WorkItem, url: impl Into<String>) -> WorkItem {
    WorkItem {
        url: url.into(),
        method: parent.method.clone(),
        headers: parent.headers.clone(),
        body: None,
        workflow_index: parent.workflow_index + 1,
        carry_state: parent.carry_state.clone(),
        attempt: 0,
    }
}

/// Check that every child sits exactly one step past its parent.
pub fn check_progression(parent: &WorkItem, children: &[WorkItem]) -> Result<(), StepError> {
    match children.iter().find(|c| c.workflow_index != parent.workflow_index + 1) {
        Some(child) => Err(StepError::Permanent(format!(
            "work item for {} moved from index {} to {}",
            child.url, parent.workflow_index, child.workflow_index
        ))),
        None => Ok(()),
    }
}
