//! Error taxonomy for workflow loading, extraction and step execution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a workflow definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The document could not be read.
    #[error("I/O error: {0}")]
    Io(String),

    /// The document is not valid JSON/YAML for the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The document parsed but violates a workflow rule.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A step declares a type outside request/link_extraction/data_extraction.
    #[error("Step {index}: unknown step type '{kind}'")]
    UnknownStepType { index: usize, kind: String },

    /// A rule names an extraction method this engine does not evaluate.
    #[error("Field '{field}': unsupported extraction method '{method}'")]
    UnsupportedMethod { field: String, method: String },
}

impl From<std::io::Error> for DefinitionError {
    fn from(e: std::io::Error) -> Self {
        DefinitionError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for DefinitionError {
    fn from(e: serde_json::Error) -> Self {
        DefinitionError::Parse(e.to_string())
    }
}

impl From<serde_yaml::Error> for DefinitionError {
    fn from(e: serde_yaml::Error) -> Self {
        DefinitionError::Parse(e.to_string())
    }
}

/// Errors raised by the extraction engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// A rule marked `required` produced no matches.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A rule expression does not compile for its method.
    #[error("Field '{field}': invalid expression: {reason}")]
    InvalidExpression { field: String, reason: String },

    /// The body could not be parsed for the rule's method (e.g. non-JSON body for a json rule).
    #[error("Field '{field}': unreadable body: {reason}")]
    InvalidBody { field: String, reason: String },
}

/// Errors raised while evaluating a continuation expression.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContinuationError {
    /// Template rendering failed.
    #[error("Template error: {0}")]
    Template(String),

    /// A condition could not be evaluated.
    #[error("Condition error: {0}")]
    Condition(String),

    /// An argument was missing or had the wrong shape.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A produced URL could not be resolved.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl From<minijinja::Error> for ContinuationError {
    fn from(e: minijinja::Error) -> Self {
        ContinuationError::Template(e.to_string())
    }
}

/// Failure classification carried on error records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Fetch error or step timeout, still within the retry budget.
    TransientStepFailure,
    /// Anything that will not succeed on retry, including exhausted transient failures.
    PermanentStepFailure,
    /// A required extraction field had no matches.
    MissingRequiredField,
    /// The queued payload could not be decoded into a valid work item.
    CorruptWorkItem,
    /// The work item points past the last workflow step.
    WorkflowIndexOutOfRange,
    /// A continuation expression failed; the record itself was still emitted.
    ContinuationEvaluationError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::TransientStepFailure => "transient_step_failure",
            ErrorKind::PermanentStepFailure => "permanent_step_failure",
            ErrorKind::MissingRequiredField => "missing_required_field",
            ErrorKind::CorruptWorkItem => "corrupt_work_item",
            ErrorKind::WorkflowIndexOutOfRange => "workflow_index_out_of_range",
            ErrorKind::ContinuationEvaluationError => "continuation_evaluation_error",
        };
        write!(f, "{}", s)
    }
}

/// Errors that end processing of one work item.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    /// Retryable failure (fetch error, timeout).
    #[error("Transient step failure: {0}")]
    Transient(String),

    /// Step processing exceeded the step's timeout.
    #[error("Step timed out after {0} seconds")]
    Timeout(u64),

    /// Non-retryable failure.
    #[error("Permanent step failure: {0}")]
    Permanent(String),

    /// A required field was missing from the extraction.
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    /// Transport payload was not a valid work item.
    #[error("Corrupt work item: {0}")]
    CorruptWorkItem(String),

    /// Work item index is past the last step.
    #[error("Workflow index {index} out of range for {len} steps")]
    WorkflowIndexOutOfRange { index: usize, len: usize },
}

impl StepError {
    /// Whether the failure may be retried under the step's retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, StepError::Transient(_) | StepError::Timeout(_))
    }

    /// Error kind written to the error record.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Transient(_) | StepError::Timeout(_) => ErrorKind::TransientStepFailure,
            StepError::Permanent(_) => ErrorKind::PermanentStepFailure,
            StepError::MissingRequiredField(_) => ErrorKind::MissingRequiredField,
            StepError::CorruptWorkItem(_) => ErrorKind::CorruptWorkItem,
            StepError::WorkflowIndexOutOfRange { .. } => ErrorKind::WorkflowIndexOutOfRange,
        }
    }
}

impl From<ExtractionError> for StepError {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::MissingField(field) => StepError::MissingRequiredField(field),
            other => StepError::Permanent(other.to_string()),
        }
    }
}
