//! Step executor.
//!
//! Applies the step at a work item's `workflow_index` to a fetched response.
//! Synchronous and side-effect free; timeouts and retries are applied by the
//! caller.

use std::sync::Arc;

use url::Url;

use crate::continuation::{join_http, ContinuationEvaluator, FollowUp};
use crate::error::{ErrorKind, StepError};
use crate::extract::extract;
use crate::model::{ErrorRecord, ExtractedRecord, FetchResponse, FieldMap, FieldValue, WorkItem};
use crate::tracker::advance;
use crate::workflow::{
    DataExtractionStep, LinkExtractionStep, RequestStep, StepAction, StepSpec, WorkflowDefinition,
};

/// Everything one step produced for one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// Work items at `workflow_index + 1`, for the request queue.
    pub requests: Vec<WorkItem>,
    /// Records for the data queue.
    pub records: Vec<ExtractedRecord>,
    /// Errors that did not stop the step (continuation failures).
    pub errors: Vec<ErrorRecord>,
}

impl StepOutcome {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.records.is_empty() && self.errors.is_empty()
    }
}

/// Executes workflow steps against fetched responses.
pub struct StepExecutor {
    definition: Arc<WorkflowDefinition>,
    evaluator: ContinuationEvaluator,
}

impl StepExecutor {
    pub fn new(definition: Arc<WorkflowDefinition>) -> Self {
        Self {
            definition,
            evaluator: ContinuationEvaluator::new(),
        }
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Step the item is positioned at.
    pub fn step_for(&self, item: &WorkItem) -> Result<&StepSpec, StepError> {
        self.definition
            .step(item.workflow_index)
            .ok_or(StepError::WorkflowIndexOutOfRange {
                index: item.workflow_index,
                len: self.definition.len(),
            })
    }

    /// Run the item's current step against `response`.
    pub fn execute(&self, item: &WorkItem, response: &FetchResponse) -> Result<StepOutcome, StepError> {
        let step = self.step_for(item)?;

        tracing::debug!(
            step = %step.id,
            kind = step.action.kind(),
            workflow_index = item.workflow_index,
            url = %item.url,
            "Executing step"
        );

        match &step.action {
            StepAction::Request(req) => Ok(self.run_request(item, req)),
            StepAction::LinkExtraction(link) => self.run_link_extraction(item, response, link),
            StepAction::DataExtraction(data) => self.run_data_extraction(item, response, step, data),
        }
    }

    fn run_request(&self, item: &WorkItem, req: &RequestStep) -> StepOutcome {
        let mut next = advance(item, item.url.clone());
        next.body = item.body.clone();
        next.headers.extend(req.headers.clone());

        StepOutcome {
            requests: vec![next],
            ..Default::default()
        }
    }

    fn run_link_extraction(
        &self,
        item: &WorkItem,
        response: &FetchResponse,
        link: &LinkExtractionStep,
    ) -> Result<StepOutcome, StepError> {
        let fields = extract(&response.body, &link.rules)?;
        let base = parse_base(&item.url)?;

        let links = fields.get(&link.link_field).map(FieldValue::values).unwrap_or_default();
        if links.is_empty() {
            tracing::debug!(url = %item.url, field = %link.link_field, "No links extracted");
            return Ok(StepOutcome::default());
        }

        let mut requests = Vec::with_capacity(links.len());
        for (position, raw_link) in links.iter().enumerate() {
            let Some(target) = join_http(&base, raw_link) else {
                tracing::debug!(href = %raw_link, "Skipping non-http link");
                continue;
            };

            let mut carry = item.carry_state.clone();
            for (name, value) in &fields {
                if name == &link.link_field {
                    carry.insert(name.clone(), FieldValue::Single((*raw_link).to_string()));
                } else if let Some(paired) = paired_value(value, position) {
                    carry.insert(name.clone(), FieldValue::Single(paired.to_string()));
                }
            }

            let mut next = advance(item, target);
            next.method = crate::model::default_method();
            next.headers = self.definition.default_headers.clone();
            next.carry_state = carry;
            requests.push(next);
        }

        tracing::debug!(url = %item.url, links = requests.len(), "Links extracted");

        Ok(StepOutcome {
            requests,
            ..Default::default()
        })
    }

    fn run_data_extraction(
        &self,
        item: &WorkItem,
        response: &FetchResponse,
        step: &StepSpec,
        data: &DataExtractionStep,
    ) -> Result<StepOutcome, StepError> {
        let extracted = extract(&response.body, &data.rules)?;

        let mut fields = item.carry_state.clone();
        fields.extend(extracted);

        let mut outcome = StepOutcome::default();

        if let Some(continuation) = &data.continuation {
            match self.evaluator.evaluate(continuation, &fields, &item.url) {
                Ok(follow_ups) => {
                    outcome.requests = follow_ups
                        .into_iter()
                        .map(|f| self.follow_up_item(item, &fields, f))
                        .collect();
                }
                Err(e) => {
                    tracing::warn!(url = %item.url, step = %step.id, error = %e, "Continuation failed");
                    outcome.errors.push(ErrorRecord::for_item(
                        self.definition.task_id(),
                        item,
                        ErrorKind::ContinuationEvaluationError,
                        e.to_string(),
                    ));
                }
            }
        }

        outcome.records.push(ExtractedRecord {
            task_id: self.definition.task.id.clone(),
            task_name: self.definition.task.name.clone(),
            source_url: item.url.clone(),
            step_id: step.id.clone(),
            workflow_index: item.workflow_index,
            fields,
            emitted_at: None,
        });

        Ok(outcome)
    }

    fn follow_up_item(&self, item: &WorkItem, fields: &FieldMap, follow: FollowUp) -> WorkItem {
        let mut carry = fields.clone();
        carry.extend(follow.carry);

        let mut next = advance(item, follow.url);
        next.method = follow.method.unwrap_or_else(crate::model::default_method);
        next.headers = follow
            .headers
            .unwrap_or_else(|| self.definition.default_headers.clone());
        next.body = follow.body;
        next.carry_state = carry;
        next
    }
}

fn parse_base(url: &str) -> Result<Url, StepError> {
    Url::parse(url).map_err(|e| StepError::Permanent(format!("invalid work item URL '{}': {}", url, e)))
}

/// Value of a companion field for the link at `position`; shorter lists repeat their last value.
fn paired_value(value: &FieldValue, position: usize) -> Option<&str> {
    match value {
        FieldValue::Single(s) => Some(s.as_str()),
        FieldValue::Many(v) => v.get(position).or_else(|| v.last()).map(|s| s.as_str()),
    }
}
