//! Workflow definition types.
//!
//! A definition is loaded once at startup and shared read-only by every
//! worker task. Step dispatch is a closed enum:
//! - `request` re-affirms the fetched target and advances
//! - `link_extraction` fans out one work item per extracted link
//! - `data_extraction` emits a record and optionally continues crawling

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::continuation::Continuation;
use crate::model::WorkItem;

/// Default per-step timeout in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;

/// Default per-step retry budget.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default name of the field holding the followed link.
pub const DEFAULT_LINK_FIELD: &str = "link";

/// Task metadata from `taskInfo`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Task identifier, carried as text regardless of its JSON type.
    pub id: String,

    /// Human readable task name.
    #[serde(default)]
    pub name: Option<String>,

    /// Seed URL when the first request step does not name one.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Concurrency hint for workers.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Delay between requests in seconds; consumed by the fetch layer.
    #[serde(default)]
    pub request_interval: Option<f64>,
}

/// Extraction method for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMethod {
    /// CSS selector against HTML, with `::text` / `::attr(name)` suffixes.
    Css,
    /// Regular expression against the raw body.
    Regex,
    /// Dot path against a JSON body.
    Json,
}

impl std::fmt::Display for ExtractMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExtractMethod::Css => "css",
            ExtractMethod::Regex => "regex",
            ExtractMethod::Json => "json",
        };
        write!(f, "{}", s)
    }
}

/// One declarative extraction rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRule {
    /// Output field name.
    pub field_name: String,

    /// How `expression` is evaluated.
    pub method: ExtractMethod,

    /// Selector, pattern or path.
    pub expression: String,

    /// Return every match instead of the first one.
    #[serde(default)]
    pub multiple: bool,

    /// Keep only the first N matches in document order.
    #[serde(default)]
    pub max_results: Option<usize>,

    /// Zero matches is an error instead of an empty list.
    #[serde(default)]
    pub required: bool,

    /// Attribute to read for css rules.
    #[serde(default)]
    pub attribute: Option<String>,
}

impl ExtractionRule {
    /// Create a rule with the given method.
    pub fn new(field_name: impl Into<String>, method: ExtractMethod, expression: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            method,
            expression: expression.into(),
            multiple: false,
            max_results: None,
            required: false,
            attribute: None,
        }
    }

    /// Create a css rule.
    pub fn css(field_name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(field_name, ExtractMethod::Css, expression)
    }

    /// Create a regex rule.
    pub fn regex(field_name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(field_name, ExtractMethod::Regex, expression)
    }

    /// Create a json path rule.
    pub fn json(field_name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(field_name, ExtractMethod::Json, expression)
    }

    /// Return all matches.
    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// Mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Truncate matches to the first `n`.
    pub fn max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    /// Read an attribute instead of text.
    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attribute = Some(name.into());
        self
    }
}

/// `request` step configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestStep {
    /// Explicit target for seeding; falls back to `taskInfo.baseUrl`.
    pub url: Option<String>,

    /// HTTP method for seeding.
    pub method: String,

    /// Headers applied to requests issued from this step.
    pub headers: BTreeMap<String, String>,
}

impl Default for RequestStep {
    fn default() -> Self {
        Self {
            url: None,
            method: crate::model::default_method(),
            headers: BTreeMap::new(),
        }
    }
}

/// `link_extraction` step configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkExtractionStep {
    /// Field whose values are the links to follow.
    pub link_field: String,

    /// Rules for the link field and accompanying fields.
    pub rules: Vec<ExtractionRule>,
}

/// `data_extraction` step configuration.
#[derive(Debug, Clone)]
pub struct DataExtractionStep {
    /// Rules for record fields.
    pub rules: Vec<ExtractionRule>,

    /// Optional follow-up request generator.
    pub continuation: Option<Continuation>,
}

/// Closed set of step behaviours.
#[derive(Debug, Clone)]
pub enum StepAction {
    Request(RequestStep),
    LinkExtraction(LinkExtractionStep),
    DataExtraction(DataExtractionStep),
}

impl StepAction {
    /// Wire name of the step type.
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Request(_) => "request",
            StepAction::LinkExtraction(_) => "link_extraction",
            StepAction::DataExtraction(_) => "data_extraction",
        }
    }

    /// Extraction rules declared by the step (empty for requests).
    pub fn rules(&self) -> &[ExtractionRule] {
        match self {
            StepAction::Request(_) => &[],
            StepAction::LinkExtraction(step) => &step.rules,
            StepAction::DataExtraction(step) => &step.rules,
        }
    }
}

/// One workflow step.
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// Step identifier, unique within the workflow.
    pub id: String,

    /// Step behaviour.
    pub action: StepAction,

    /// Upper bound for processing one response in this step.
    pub timeout: Duration,

    /// Number of transient failures retried before giving up.
    pub retry_count: u32,
}

/// Immutable workflow definition.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    /// Task metadata.
    pub task: TaskInfo,

    /// Ordered steps; a work item's `workflow_index` points into this list.
    pub steps: Vec<StepSpec>,

    /// Headers of the first request step, attached to fanned-out requests.
    pub default_headers: BTreeMap<String, String>,
}

impl WorkflowDefinition {
    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at `index`, if any.
    pub fn step(&self, index: usize) -> Option<&StepSpec> {
        self.steps.get(index)
    }

    /// Task id carried on records.
    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    /// Seed work item at index 0.
    ///
    /// Target comes from the first request step's `url`, else `taskInfo.baseUrl`;
    /// method and headers from the first request step. `None` when neither names a URL.
    pub fn seed_item(&self) -> Option<WorkItem> {
        let request = self.steps.iter().find_map(|s| match &s.action {
            StepAction::Request(req) => Some(req),
            _ => None,
        });

        let url = request
            .and_then(|r| r.url.clone())
            .or_else(|| self.task.base_url.clone())?;

        let mut item = WorkItem::seed(url).with_headers(self.default_headers.clone());
        if let Some(req) = request {
            item = item.with_method(req.method.clone());
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_builder() {
        let rule = ExtractionRule::css("link", "a")
            .attribute("href")
            .multiple()
            .max_results(5)
            .required();

        assert_eq!(rule.method, ExtractMethod::Css);
        assert_eq!(rule.attribute.as_deref(), Some("href"));
        assert!(rule.multiple);
        assert!(rule.required);
        assert_eq!(rule.max_results, Some(5));
    }

    #[test]
    fn test_step_action_kind() {
        let action = StepAction::Request(RequestStep::default());
        assert_eq!(action.kind(), "request");
        assert!(action.rules().is_empty());

        let action = StepAction::LinkExtraction(LinkExtractionStep {
            link_field: DEFAULT_LINK_FIELD.to_string(),
            rules: vec![ExtractionRule::css("link", "a::attr(href)")],
        });
        assert_eq!(action.kind(), "link_extraction");
        assert_eq!(action.rules().len(), 1);
    }

    fn definition(steps: Vec<StepSpec>, base_url: Option<&str>) -> WorkflowDefinition {
        WorkflowDefinition {
            task: TaskInfo {
                id: "1".into(),
                base_url: base_url.map(str::to_string),
                ..Default::default()
            },
            steps,
            default_headers: BTreeMap::from([("User-Agent".to_string(), "crawlflow".to_string())]),
        }
    }

    fn step(id: &str, action: StepAction) -> StepSpec {
        StepSpec {
            id: id.into(),
            action,
            timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            retry_count: DEFAULT_RETRY_COUNT,
        }
    }

    #[test]
    fn test_seed_prefers_request_url() {
        let req = RequestStep {
            url: Some("https://example.com/start".into()),
            method: "POST".into(),
            headers: BTreeMap::new(),
        };
        let def = definition(vec![step("fetch", StepAction::Request(req))], Some("https://example.com"));

        let seed = def.seed_item().unwrap();
        assert_eq!(seed.url, "https://example.com/start");
        assert_eq!(seed.method, "POST");
        assert_eq!(seed.workflow_index, 0);
        assert_eq!(seed.headers["User-Agent"], "crawlflow");
    }

    #[test]
    fn test_seed_falls_back_to_base_url() {
        let def = definition(
            vec![step("fetch", StepAction::Request(RequestStep::default()))],
            Some("https://example.com"),
        );
        assert_eq!(def.seed_item().unwrap().url, "https://example.com");

        let def = definition(vec![step("fetch", StepAction::Request(RequestStep::default()))], None);
        assert!(def.seed_item().is_none());
    }

    #[test]
    fn test_extract_method_display() {
        assert_eq!(ExtractMethod::Css.to_string(), "css");
        assert_eq!(ExtractMethod::Json.to_string(), "json");
    }
}
