//! Crawlflow Core
//!
//! Workflow step interpreter for a queue-driven crawler.
//!
//! This crate provides:
//! - Workflow definition types and the JSON/YAML loader
//! - Extraction engine (css, regex, json path rules)
//! - Continuation evaluator for pagination and follow-up requests
//! - Workflow state tracker (transport codec and index validation)
//! - Step executor and retry policy

pub mod continuation;
pub mod error;
pub mod executor;
pub mod extract;
pub mod model;
pub mod retry;
pub mod tracker;
pub mod workflow;

pub use continuation::{Continuation, ContinuationEvaluator, FollowUp};
pub use error::{ContinuationError, DefinitionError, ErrorKind, ExtractionError, StepError};
pub use executor::{StepExecutor, StepOutcome};
pub use extract::extract;
pub use model::{ErrorRecord, ExtractedRecord, FetchOutcome, FetchResponse, FieldMap, FieldValue, WorkItem};
pub use retry::{RetryDecision, RetryPolicy};
pub use workflow::{load_workflow, StepAction, StepSpec, WorkflowDefinition};
