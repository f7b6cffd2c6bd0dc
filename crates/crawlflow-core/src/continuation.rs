//! Continuation evaluation.
//!
//! A data extraction step may declare a continuation that derives follow-up
//! requests (pagination, detail pages) from the fields it just extracted.
//! Continuations are data, not code: a list of guard conditions plus one
//! generator from a fixed set. Templates are rendered by a minijinja
//! environment with no loader, so they can read the context they are given
//! and nothing else.

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior, Value};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ContinuationError;
use crate::model::{FieldMap, FieldValue};

/// Upper bound on follow-ups produced by one generator.
pub const MAX_CONTINUATION_PAGES: usize = 1000;

/// Condition operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    /// Text contains `right`.
    Contains,
    /// Text matches the regex in `right`.
    Matches,
    Truthy,
    Falsy,
    /// Value is one of the list in `right`.
    In,
    NotIn,
}

/// Guard condition over the field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field name, or `current_url`.
    pub left: String,

    #[serde(default)]
    pub op: Operator,

    /// Literal to compare against.
    #[serde(default)]
    pub right: Option<serde_json::Value>,
}

impl Condition {
    pub fn new(left: impl Into<String>, op: Operator, right: Option<serde_json::Value>) -> Self {
        Self {
            left: left.into(),
            op,
            right,
        }
    }
}

fn default_step() -> i64 {
    1
}

/// How follow-up URLs are produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Generator {
    /// Every value of `field` is a URL.
    Field { field: String },

    /// Render `template` once, or once per value of `each`.
    Template {
        template: String,
        #[serde(default)]
        each: Option<String>,
    },

    /// Render `template` for each page number in `start..=end`.
    PageRange {
        template: String,
        start: i64,
        #[serde(default)]
        end: Option<i64>,
        #[serde(default, rename = "endField", alias = "end_field")]
        end_field: Option<String>,
        #[serde(default = "default_step")]
        step: i64,
    },

    /// Increment a numeric query parameter of the current URL.
    QueryIncrement {
        param: String,
        #[serde(default = "default_step")]
        step: i64,
        #[serde(default)]
        max: Option<i64>,
    },
}

/// Continuation attached to a data extraction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continuation {
    /// All must hold for the generator to run.
    #[serde(default)]
    pub when: Vec<Condition>,

    #[serde(flatten)]
    pub generator: Generator,

    /// Method override for follow-ups.
    #[serde(default)]
    pub method: Option<String>,

    /// Header override for follow-ups.
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,

    /// Body for follow-ups.
    #[serde(default)]
    pub body: Option<String>,

    /// Extra fields merged into each follow-up's carry state.
    #[serde(default)]
    pub carry: FieldMap,
}

impl Continuation {
    pub fn new(generator: Generator) -> Self {
        Self {
            when: Vec::new(),
            generator,
            method: None,
            headers: None,
            body: None,
            carry: FieldMap::new(),
        }
    }

    /// Add a guard condition.
    pub fn when(mut self, condition: Condition) -> Self {
        self.when.push(condition);
        self
    }
}

/// One follow-up request synthesized by a continuation.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub url: String,
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<String>,
    pub carry: FieldMap,
}

/// Evaluates continuations against an extracted field mapping.
pub struct ContinuationEvaluator {
    env: Environment<'static>,
}

impl ContinuationEvaluator {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_function("urljoin", fn_urljoin);
        Self { env }
    }

    /// Check that templates and regex conditions compile.
    pub fn check(&self, continuation: &Continuation) -> Result<(), ContinuationError> {
        for condition in &continuation.when {
            if condition.op == Operator::Matches {
                let pattern = condition.right.as_ref().and_then(|r| r.as_str()).unwrap_or("");
                regex::Regex::new(pattern)
                    .map_err(|e| ContinuationError::Condition(format!("invalid regex: {}", e)))?;
            }
        }

        match &continuation.generator {
            Generator::Template { template, .. } | Generator::PageRange { template, .. } => {
                let mut scratch = Environment::new();
                scratch.add_template("continuation", template)?;
            }
            Generator::Field { .. } | Generator::QueryIncrement { .. } => {}
        }

        if let Generator::PageRange { end: None, end_field: None, .. } = &continuation.generator {
            return Err(ContinuationError::InvalidArgument(
                "page_range needs end or endField".to_string(),
            ));
        }

        Ok(())
    }

    /// Evaluate `continuation` for the record extracted from `current_url`.
    pub fn evaluate(
        &self,
        continuation: &Continuation,
        fields: &FieldMap,
        current_url: &str,
    ) -> Result<Vec<FollowUp>, ContinuationError> {
        for condition in &continuation.when {
            if !evaluate_condition(condition, fields, current_url)? {
                tracing::debug!(left = %condition.left, op = ?condition.op, "Continuation guard not met");
                return Ok(Vec::new());
            }
        }

        let base = Url::parse(current_url).map_err(|e| ContinuationError::InvalidUrl {
            url: current_url.to_string(),
            reason: e.to_string(),
        })?;

        let raw: Vec<String> = match &continuation.generator {
            Generator::Field { field } => fields
                .get(field)
                .map(|v| v.values().into_iter().map(str::to_string).collect())
                .unwrap_or_default(),
            Generator::Template { template, each } => {
                self.render_template(template, each.as_deref(), fields, current_url)?
            }
            Generator::PageRange {
                template,
                start,
                end,
                end_field,
                step,
            } => {
                let end = resolve_end(*end, end_field.as_deref(), fields)?;
                self.render_pages(template, *start, end, *step, fields, current_url)?
            }
            Generator::QueryIncrement { param, step, max } => {
                increment_query(&base, param, *step, *max)?.into_iter().collect()
            }
        };

        let mut follow_ups = Vec::new();
        for href in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            if follow_ups.len() >= MAX_CONTINUATION_PAGES {
                tracing::warn!(url = %current_url, limit = MAX_CONTINUATION_PAGES, "Continuation output truncated");
                break;
            }

            let joined = base.join(href).map_err(|e| ContinuationError::InvalidUrl {
                url: href.to_string(),
                reason: e.to_string(),
            })?;
            if !is_http(&joined) {
                tracing::debug!(href = %href, "Skipping non-http continuation target");
                continue;
            }

            follow_ups.push(FollowUp {
                url: joined.to_string(),
                method: continuation.method.clone(),
                headers: continuation.headers.clone(),
                body: continuation.body.clone(),
                carry: continuation.carry.clone(),
            });
        }

        Ok(follow_ups)
    }

    fn render(&self, template: &str, ctx: serde_json::Value) -> Result<String, ContinuationError> {
        Ok(self.env.render_str(template, Value::from_serialize(&ctx))?)
    }

    fn render_template(
        &self,
        template: &str,
        each: Option<&str>,
        fields: &FieldMap,
        current_url: &str,
    ) -> Result<Vec<String>, ContinuationError> {
        let Some(each) = each else {
            return Ok(vec![self.render(template, template_context(fields, current_url, &[]))?]);
        };

        let items = fields.get(each).map(|v| v.values()).unwrap_or_default();
        items
            .into_iter()
            .take(MAX_CONTINUATION_PAGES)
            .enumerate()
            .map(|(index, item)| {
                let extra = [("item", serde_json::json!(item)), ("index", serde_json::json!(index))];
                self.render(template, template_context(fields, current_url, &extra))
            })
            .collect()
    }

    fn render_pages(
        &self,
        template: &str,
        start: i64,
        end: i64,
        step: i64,
        fields: &FieldMap,
        current_url: &str,
    ) -> Result<Vec<String>, ContinuationError> {
        if step <= 0 {
            return Err(ContinuationError::InvalidArgument(format!(
                "page_range step must be positive, got {}",
                step
            )));
        }

        let mut out = Vec::new();
        let mut page = start;
        while page <= end && out.len() < MAX_CONTINUATION_PAGES {
            let extra = [("page", serde_json::json!(page))];
            out.push(self.render(template, template_context(fields, current_url, &extra))?);
            // No page number past i64::MAX can be within the range.
            match page.checked_add(step) {
                Some(next) => page = next,
                None => break,
            }
        }
        Ok(out)
    }
}

impl Default for ContinuationEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `href` against `base`, keeping only http(s) targets.
pub(crate) fn join_http(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().filter(is_http).map(|u| u.to_string())
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

fn fn_urljoin(base: String, href: String) -> Result<String, minijinja::Error> {
    Url::parse(&base)
        .and_then(|b| b.join(&href))
        .map(|u| u.to_string())
        .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))
}

/// Template context: fields at top level and under `fields`, plus `current_url`.
fn template_context(
    fields: &FieldMap,
    current_url: &str,
    extra: &[(&str, serde_json::Value)],
) -> serde_json::Value {
    let field_obj: serde_json::Map<String, serde_json::Value> =
        fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();

    let mut ctx = field_obj.clone();
    ctx.insert("fields".to_string(), serde_json::Value::Object(field_obj));
    ctx.insert("current_url".to_string(), serde_json::json!(current_url));
    for (key, value) in extra {
        ctx.insert((*key).to_string(), value.clone());
    }
    serde_json::Value::Object(ctx)
}

fn resolve_end(end: Option<i64>, end_field: Option<&str>, fields: &FieldMap) -> Result<i64, ContinuationError> {
    if let Some(end) = end {
        return Ok(end);
    }

    let name = end_field
        .ok_or_else(|| ContinuationError::InvalidArgument("page_range needs end or endField".to_string()))?;
    let raw = fields
        .get(name)
        .and_then(FieldValue::first)
        .ok_or_else(|| ContinuationError::InvalidArgument(format!("field '{}' is empty", name)))?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ContinuationError::InvalidArgument(format!("field '{}' is not an integer: {}", name, raw)))
}

fn increment_query(base: &Url, param: &str, step: i64, max: Option<i64>) -> Result<Option<String>, ContinuationError> {
    let current = match base.query_pairs().find(|(k, _)| k == param) {
        Some((_, v)) => v.parse::<i64>().map_err(|_| {
            ContinuationError::InvalidArgument(format!("query parameter '{}' is not an integer: {}", param, v))
        })?,
        None => 1,
    };

    let next = current.checked_add(step).ok_or_else(|| {
        ContinuationError::InvalidArgument(format!(
            "query parameter '{}' overflows: {} + {}",
            param, current, step
        ))
    })?;
    if max.is_some_and(|m| next > m) {
        return Ok(None);
    }

    let mut pairs: Vec<(String, String)> = base
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    match pairs.iter_mut().find(|(k, _)| k == param) {
        Some(pair) => pair.1 = next.to_string(),
        None => pairs.push((param.to_string(), next.to_string())),
    }

    let mut url = base.clone();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    Ok(Some(url.to_string()))
}

fn resolve_left(left: &str, fields: &FieldMap, current_url: &str) -> serde_json::Value {
    if left == "current_url" {
        return serde_json::json!(current_url);
    }
    fields.get(left).map(FieldValue::to_json).unwrap_or(serde_json::Value::Null)
}

fn evaluate_condition(condition: &Condition, fields: &FieldMap, current_url: &str) -> Result<bool, ContinuationError> {
    let left = resolve_left(&condition.left, fields, current_url);
    let right = condition.right.clone().unwrap_or(serde_json::Value::Null);
    let scalar = first_scalar(&left);

    match condition.op {
        Operator::Eq => Ok(loose_eq(&scalar, &right)),
        Operator::Ne => Ok(!loose_eq(&scalar, &right)),
        Operator::Gt => compare_numeric(&scalar, &right, |a, b| a > b),
        Operator::Lt => compare_numeric(&scalar, &right, |a, b| a < b),
        Operator::Gte => compare_numeric(&scalar, &right, |a, b| a >= b),
        Operator::Lte => compare_numeric(&scalar, &right, |a, b| a <= b),
        Operator::Contains => Ok(to_text(&scalar).contains(&to_text(&right))),
        Operator::Matches => {
            let re = regex::Regex::new(&to_text(&right))
                .map_err(|e| ContinuationError::Condition(format!("invalid regex: {}", e)))?;
            Ok(re.is_match(&to_text(&scalar)))
        }
        Operator::Truthy => Ok(is_truthy(&left)),
        Operator::Falsy => Ok(!is_truthy(&left)),
        Operator::In => Ok(list_contains(&right, &scalar)),
        Operator::NotIn => Ok(!list_contains(&right, &scalar)),
    }
}

fn first_scalar(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Array(arr) => arr.first().cloned().unwrap_or(serde_json::Value::Null),
        other => other.clone(),
    }
}

fn list_contains(list: &serde_json::Value, value: &serde_json::Value) -> bool {
    match list {
        serde_json::Value::Array(arr) => arr.iter().any(|v| loose_eq(value, v)),
        _ => false,
    }
}

/// Equality that treats `"2"` and `2` as equal; extracted values are always text.
fn loose_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    a == b || to_text(a) == to_text(b)
}

fn to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare_numeric<F>(left: &serde_json::Value, right: &serde_json::Value, cmp: F) -> Result<bool, ContinuationError>
where
    F: Fn(f64, f64) -> bool,
{
    Ok(cmp(value_to_f64(left)?, value_to_f64(right)?))
}

/// Check if a JSON value is truthy.
fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

/// Convert a JSON value to f64.
fn value_to_f64(value: &serde_json::Value) -> Result<f64, ContinuationError> {
    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ContinuationError::Condition("invalid number".to_string())),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ContinuationError::Condition(format!("cannot parse '{}' as number", s))),
        serde_json::Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        serde_json::Value::Null => Ok(0.0),
        _ => Err(ContinuationError::Condition("cannot convert to number".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_is_truthy() {
        assert!(!is_truthy(&serde_json::Value::Null));
        assert!(!is_truthy(&serde_json::json!("")));
        assert!(is_truthy(&serde_json::json!("next")));
        assert!(!is_truthy(&serde_json::json!([])));
        assert!(is_truthy(&serde_json::json!(["a"])));
    }

    #[test]
    fn test_continuation_deserialize() {
        let json = r#"{
            "when": [{"left": "next", "op": "truthy"}],
            "op": "page_range",
            "template": "/list?page={{ page }}",
            "start": 2,
            "endField": "last_page",
            "carry": {"source": "listing"}
        }"#;
        let cont: Continuation = serde_json::from_str(json).unwrap();
        assert_eq!(cont.when.len(), 1);
        assert_eq!(cont.when[0].op, Operator::Truthy);
        assert_eq!(
            cont.generator,
            Generator::PageRange {
                template: "/list?page={{ page }}".into(),
                start: 2,
                end: None,
                end_field: Some("last_page".into()),
                step: 1,
            }
        );
        assert_eq!(cont.carry["source"], FieldValue::Single("listing".into()));
    }

    #[test]
    fn test_field_generator_joins_relative_links() {
        let evaluator = ContinuationEvaluator::new();
        let cont = Continuation::new(Generator::Field { field: "next".into() });
        let f = fields(&[("next", FieldValue::Single("/page/2".into()))]);

        let out = evaluator.evaluate(&cont, &f, "https://example.com/page/1").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url, "https://example.com/page/2");
    }

    #[test]
    fn test_guard_blocks_generator() {
        let evaluator = ContinuationEvaluator::new();
        let cont = Continuation::new(Generator::Field { field: "next".into() })
            .when(Condition::new("next", Operator::Truthy, None));

        let out = evaluator.evaluate(&cont, &FieldMap::new(), "https://example.com").unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_numeric_guard_on_text_field() {
        let evaluator = ContinuationEvaluator::new();
        let cont = Continuation::new(Generator::Field { field: "next".into() })
            .when(Condition::new("count", Operator::Gte, Some(serde_json::json!(10))));
        let f = fields(&[
            ("count", FieldValue::Single("12".into())),
            ("next", FieldValue::Single("?p=2".into())),
        ]);

        let out = evaluator.evaluate(&cont, &f, "https://example.com/list").unwrap();
        assert_eq!(out[0].url, "https://example.com/list?p=2");
    }

    #[test]
    fn test_template_each() {
        let evaluator = ContinuationEvaluator::new();
        let cont = Continuation::new(Generator::Template {
            template: "{{ urljoin(current_url, '/item/' ~ item) }}?i={{ index }}".into(),
            each: Some("ids".into()),
        });
        let f = fields(&[("ids", FieldValue::Many(vec!["a".into(), "b".into()]))]);

        let out = evaluator.evaluate(&cont, &f, "https://example.com/list").unwrap();
        let urls: Vec<_> = out.iter().map(|f| f.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/item/a?i=0", "https://example.com/item/b?i=1"]);
    }

    #[test]
    fn test_page_range_with_end_field() {
        let evaluator = ContinuationEvaluator::new();
        let cont = Continuation::new(Generator::PageRange {
            template: "/list?page={{ page }}".into(),
            start: 2,
            end: None,
            end_field: Some("last".into()),
            step: 1,
        });
        let f = fields(&[("last", FieldValue::Single("4".into()))]);

        let out = evaluator.evaluate(&cont, &f, "https://example.com/list").unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].url, "https://example.com/list?page=4");
    }

    #[test]
    fn test_page_range_non_numeric_end() {
        let evaluator = ContinuationEvaluator::new();
        let cont = Continuation::new(Generator::PageRange {
            template: "/list?page={{ page }}".into(),
            start: 1,
            end: None,
            end_field: Some("last".into()),
            step: 1,
        });
        let f = fields(&[("last", FieldValue::Single("many".into()))]);

        let err = evaluator.evaluate(&cont, &f, "https://example.com").unwrap_err();
        assert!(matches!(err, ContinuationError::InvalidArgument(_)));
    }

    #[test]
    fn test_page_range_is_capped() {
        let evaluator = ContinuationEvaluator::new();
        let cont = Continuation::new(Generator::PageRange {
            template: "/p/{{ page }}".into(),
            start: 1,
            end: Some(5000),
            end_field: None,
            step: 1,
        });

        let out = evaluator.evaluate(&cont, &FieldMap::new(), "https://example.com").unwrap();
        assert_eq!(out.len(), MAX_CONTINUATION_PAGES);
    }

    #[test]
    fn test_query_increment() {
        let evaluator = ContinuationEvaluator::new();
        let cont = Continuation::new(Generator::QueryIncrement {
            param: "page".into(),
            step: 1,
            max: Some(3),
        });

        let out = evaluator
            .evaluate(&cont, &FieldMap::new(), "https://example.com/list?q=rust&page=2")
            .unwrap();
        assert_eq!(out[0].url, "https://example.com/list?q=rust&page=3");

        let out = evaluator
            .evaluate(&cont, &FieldMap::new(), "https://example.com/list?q=rust&page=3")
            .unwrap();
        assert!(out.is_empty());

        let out = evaluator.evaluate(&cont, &FieldMap::new(), "https://example.com/list").unwrap();
        assert_eq!(out[0].url, "https://example.com/list?page=2");
    }

    #[test]
    fn test_query_increment_overflow_is_error() {
        let evaluator = ContinuationEvaluator::new();
        let cont = Continuation::new(Generator::QueryIncrement {
            param: "page".into(),
            step: 1,
            max: None,
        });

        let err = evaluator
            .evaluate(&cont, &FieldMap::new(), "https://example.com/list?page=9223372036854775807")
            .unwrap_err();
        assert!(matches!(err, ContinuationError::InvalidArgument(_)));
    }

    #[test]
    fn test_page_range_ending_at_i64_max() {
        let evaluator = ContinuationEvaluator::new();
        let cont = Continuation::new(Generator::PageRange {
            template: "/p/{{ page }}".into(),
            start: i64::MAX - 1,
            end: Some(i64::MAX),
            end_field: None,
            step: 1,
        });

        let out = evaluator.evaluate(&cont, &FieldMap::new(), "https://example.com").unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].url, format!("https://example.com/p/{}", i64::MAX));
    }

    #[test]
    fn test_undefined_variable_is_error() {
        let evaluator = ContinuationEvaluator::new();
        let cont = Continuation::new(Generator::Template {
            template: "{{ nope }}".into(),
            each: None,
        });

        let err = evaluator.evaluate(&cont, &FieldMap::new(), "https://example.com").unwrap_err();
        assert!(matches!(err, ContinuationError::Template(_)));
    }

    #[test]
    fn test_overrides_and_carry_are_attached() {
        let evaluator = ContinuationEvaluator::new();
        let mut cont = Continuation::new(Generator::Field { field: "next".into() });
        cont.method = Some("POST".into());
        cont.body = Some("{}".into());
        cont.carry.insert("origin".into(), FieldValue::Single("listing".into()));
        let f = fields(&[("next", FieldValue::Many(vec!["/a".into(), "mailto:x@y.z".into()]))]);

        let out = evaluator.evaluate(&cont, &f, "https://example.com").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].method.as_deref(), Some("POST"));
        assert_eq!(out[0].body.as_deref(), Some("{}"));
        assert_eq!(out[0].carry["origin"], FieldValue::Single("listing".into()));
    }

    #[test]
    fn test_check_rejects_bad_template_and_regex() {
        let evaluator = ContinuationEvaluator::new();
        let bad_template = Continuation::new(Generator::Template {
            template: "{{ unclosed".into(),
            each: None,
        });
        assert!(evaluator.check(&bad_template).is_err());

        let bad_regex = Continuation::new(Generator::Field { field: "x".into() })
            .when(Condition::new("x", Operator::Matches, Some(serde_json::json!("("))));
        assert!(evaluator.check(&bad_regex).is_err());

        let no_end = Continuation::new(Generator::PageRange {
            template: "/{{ page }}".into(),
            start: 1,
            end: None,
            end_field: None,
            step: 1,
        });
        assert!(evaluator.check(&no_end).is_err());
    }
}
