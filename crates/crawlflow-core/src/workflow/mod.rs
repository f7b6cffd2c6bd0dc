//! Workflow definitions: types and the document loader.

pub mod parser;
pub mod types;

pub use parser::{load_workflow, parse_workflow_json, parse_workflow_yaml, validate_workflow};
pub use types::{
    DataExtractionStep, ExtractMethod, ExtractionRule, LinkExtractionStep, RequestStep, StepAction,
    StepSpec, TaskInfo, WorkflowDefinition, DEFAULT_LINK_FIELD, DEFAULT_RETRY_COUNT,
    DEFAULT_STEP_TIMEOUT_SECS,
};
