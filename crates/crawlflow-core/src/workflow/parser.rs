//! Workflow document parser.
//!
//! Parses JSON or YAML workflow documents into a `WorkflowDefinition`.
//! Validates:
//! - at least one step, unique step ids
//! - known step types and extraction methods
//! - rule expressions and continuation templates compile
//! - each link extraction step declares a rule for its link field
//! - the final step is a data extraction step without a continuation

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::continuation::{Continuation, ContinuationEvaluator};
use crate::error::DefinitionError;
use crate::extract::validate_rule;
use crate::workflow::types::{
    DataExtractionStep, ExtractMethod, ExtractionRule, LinkExtractionStep, RequestStep, StepAction,
    StepSpec, TaskInfo, WorkflowDefinition, DEFAULT_LINK_FIELD, DEFAULT_RETRY_COUNT,
    DEFAULT_STEP_TIMEOUT_SECS,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDefinition {
    task_info: RawTaskInfo,
    #[serde(default)]
    workflow_steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTaskInfo {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    concurrency: Option<usize>,
    #[serde(default)]
    request_interval: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    timeout: Option<f64>,
    #[serde(default)]
    retry_count: Option<u32>,
    #[serde(default)]
    config: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequestConfig {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers_mode: Option<String>,
    #[serde(default)]
    headers_json: Option<String>,
    #[serde(default)]
    headers: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLinkConfig {
    #[serde(default, alias = "rules")]
    link_extraction_rules: Vec<RawRule>,
    #[serde(default)]
    link_field: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDataConfig {
    #[serde(default, alias = "rules")]
    extraction_rules: Vec<RawRule>,
    #[serde(default)]
    continuation: Option<Continuation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRule {
    field_name: String,
    #[serde(default, alias = "method")]
    extract_type: Option<String>,
    #[serde(default)]
    expression: String,
    #[serde(default)]
    multiple: bool,
    #[serde(default, alias = "maxLinks")]
    max_results: Option<usize>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    attribute: Option<String>,
}

/// Load a workflow definition from a file; `.yaml`/`.yml` are read as YAML.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<WorkflowDefinition, DefinitionError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| DefinitionError::Io(format!("{}: {}", path.display(), e)))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    let definition = if is_yaml {
        parse_workflow_yaml(&content)?
    } else {
        parse_workflow_json(&content)?
    };

    tracing::info!(
        path = %path.display(),
        task_id = %definition.task.id,
        steps = definition.len(),
        "Workflow definition loaded"
    );

    Ok(definition)
}

/// Parse a JSON workflow document.
pub fn parse_workflow_json(content: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let raw: RawDefinition = serde_json::from_str(content)?;
    build_definition(raw)
}

/// Parse a YAML workflow document.
pub fn parse_workflow_yaml(content: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let raw: RawDefinition = serde_yaml::from_str(content)?;
    build_definition(raw)
}

fn build_definition(raw: RawDefinition) -> Result<WorkflowDefinition, DefinitionError> {
    let task = TaskInfo {
        id: id_text(&raw.task_info.id),
        name: raw.task_info.name,
        base_url: raw.task_info.base_url,
        concurrency: raw.task_info.concurrency,
        request_interval: raw.task_info.request_interval,
    };

    let steps = raw
        .workflow_steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| build_step(index, step))
        .collect::<Result<Vec<_>, _>>()?;

    let default_headers = steps
        .iter()
        .find_map(|s| match &s.action {
            StepAction::Request(req) => Some(req.headers.clone()),
            _ => None,
        })
        .unwrap_or_default();

    let definition = WorkflowDefinition {
        task,
        steps,
        default_headers,
    };

    validate_workflow(&definition)?;

    Ok(definition)
}

fn id_text(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Config objects may be absent or null.
fn parse_config<T>(config: serde_json::Value, step_id: &str) -> Result<T, DefinitionError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config)
        .map_err(|e| DefinitionError::Parse(format!("Step '{}': invalid config: {}", step_id, e)))
}

fn build_step(index: usize, raw: RawStep) -> Result<StepSpec, DefinitionError> {
    let id = raw.id.unwrap_or_else(|| format!("step-{}", index));

    let timeout_secs = raw.timeout.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS as f64);
    if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
        return Err(DefinitionError::Validation(format!(
            "Step '{}': timeout must be a positive number of seconds, got {}",
            id, timeout_secs
        )));
    }

    let timeout = Duration::try_from_secs_f64(timeout_secs).map_err(|e| {
        DefinitionError::Validation(format!("Step '{}': timeout {} out of range: {}", id, timeout_secs, e))
    })?;

    let action = match raw.kind.as_str() {
        "request" => {
            let config: RawRequestConfig = parse_config(raw.config, &id)?;
            StepAction::Request(build_request(config, &id)?)
        }
        "link_extraction" => {
            let config: RawLinkConfig = parse_config(raw.config, &id)?;
            StepAction::LinkExtraction(LinkExtractionStep {
                link_field: config
                    .link_field
                    .unwrap_or_else(|| DEFAULT_LINK_FIELD.to_string()),
                // Link steps fan out over every match.
                rules: build_rules(config.link_extraction_rules)?
                    .into_iter()
                    .map(ExtractionRule::multiple)
                    .collect(),
            })
        }
        "data_extraction" => {
            let config: RawDataConfig = parse_config(raw.config, &id)?;
            StepAction::DataExtraction(DataExtractionStep {
                rules: build_rules(config.extraction_rules)?,
                continuation: config.continuation,
            })
        }
        other => {
            return Err(DefinitionError::UnknownStepType {
                index,
                kind: other.to_string(),
            })
        }
    };

    Ok(StepSpec {
        id,
        action,
        timeout,
        retry_count: raw.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
    })
}

fn build_request(config: RawRequestConfig, step_id: &str) -> Result<RequestStep, DefinitionError> {
    let mut headers = BTreeMap::new();

    if config.headers_mode.as_deref() == Some("json") {
        if let Some(json) = config.headers_json.as_deref().filter(|s| !s.trim().is_empty()) {
            let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(json).map_err(|e| {
                DefinitionError::Parse(format!("Step '{}': invalid headersJson: {}", step_id, e))
            })?;
            headers.extend(parsed.into_iter().map(|(k, v)| (k, id_text(&v))));
        }
    }

    if let Some(extra) = config.headers {
        headers.extend(extra.into_iter().map(|(k, v)| (k, id_text(&v))));
    }

    Ok(RequestStep {
        url: config.url.filter(|u| !u.trim().is_empty()),
        method: config
            .method
            .map(|m| m.to_uppercase())
            .unwrap_or_else(crate::model::default_method),
        headers,
    })
}

fn build_rules(raw: Vec<RawRule>) -> Result<Vec<ExtractionRule>, DefinitionError> {
    raw.into_iter().map(build_rule).collect()
}

fn build_rule(raw: RawRule) -> Result<ExtractionRule, DefinitionError> {
    let method = match raw.extract_type.as_deref().unwrap_or("css") {
        "css" => ExtractMethod::Css,
        "regex" => ExtractMethod::Regex,
        "json" => ExtractMethod::Json,
        other => {
            return Err(DefinitionError::UnsupportedMethod {
                field: raw.field_name,
                method: other.to_string(),
            })
        }
    };

    Ok(ExtractionRule {
        field_name: raw.field_name,
        method,
        expression: raw.expression,
        multiple: raw.multiple,
        max_results: raw.max_results,
        required: raw.required,
        attribute: raw.attribute,
    })
}

/// Validate a built workflow definition.
pub fn validate_workflow(definition: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if definition.steps.is_empty() {
        return Err(DefinitionError::Validation(
            "workflowSteps must contain at least one step".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for step in &definition.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(DefinitionError::Validation(format!("Duplicate step id: {}", step.id)));
        }
    }

    let evaluator = ContinuationEvaluator::new();

    for step in &definition.steps {
        for rule in step.action.rules() {
            validate_rule(rule)
                .map_err(|e| DefinitionError::Validation(format!("Step '{}': {}", step.id, e)))?;
        }

        match &step.action {
            StepAction::Request(_) => {}
            StepAction::LinkExtraction(link) => {
                if !link.rules.iter().any(|r| r.field_name == link.link_field) {
                    return Err(DefinitionError::Validation(format!(
                        "Step '{}': no extraction rule for link field '{}'",
                        step.id, link.link_field
                    )));
                }
            }
            StepAction::DataExtraction(data) => {
                if let Some(continuation) = &data.continuation {
                    evaluator.check(continuation).map_err(|e| {
                        DefinitionError::Validation(format!("Step '{}': continuation: {}", step.id, e))
                    })?;
                }
            }
        }
    }

    match definition.steps.last().map(|s| (&s.id, &s.action)) {
        Some((_, StepAction::DataExtraction(data))) if data.continuation.is_none() => Ok(()),
        Some((id, StepAction::DataExtraction(_))) => Err(DefinitionError::Validation(format!(
            "Step '{}': the final step cannot declare a continuation",
            id
        ))),
        Some((id, action)) => Err(DefinitionError::Validation(format!(
            "Step '{}': the final step must be data_extraction, got {}",
            id,
            action.kind()
        ))),
        None => Ok(()),
    }
}
