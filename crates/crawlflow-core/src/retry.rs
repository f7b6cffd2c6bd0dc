//! Retry policy for transient step failures.

use crate::model::WorkItem;
use crate::workflow::StepSpec;

/// What to do with a transient failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Re-emit the work item with the attempt counter advanced.
    Retry(WorkItem),
    /// Budget spent; the lineage ends with an error record.
    Exhausted,
}

/// Per-step retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_count: u32,
}

impl RetryPolicy {
    pub fn new(retry_count: u32) -> Self {
        Self { retry_count }
    }

    pub fn for_step(step: &StepSpec) -> Self {
        Self::new(step.retry_count)
    }

    /// Decide after a transient failure of `item`.
    ///
    /// `item.attempt` counts retries already spent, so with a budget of N the
    /// item is processed N + 1 times before giving up.
    pub fn decide(&self, item: &WorkItem) -> RetryDecision {
        if item.attempt < self.retry_count {
            RetryDecision::Retry(item.retried())
        } else {
            RetryDecision::Exhausted
        }
    }
}
