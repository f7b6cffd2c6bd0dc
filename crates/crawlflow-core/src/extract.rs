//! Extraction engine.
//!
//! Evaluates declarative rules against a response body and returns a field
//! mapping. Pure: the same body and rules always produce the same mapping.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::ExtractionError;
use crate::model::{FieldMap, FieldValue};
use crate::workflow::{ExtractMethod, ExtractionRule};

/// What a css rule reads from each matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CssTarget {
    /// All descendant text, whitespace collapsed.
    Text,
    /// Only the element's own text nodes (`::text`).
    OwnText,
    /// An attribute value (`::attr(name)` or the rule's `attribute`).
    Attr(String),
}

/// Split a css expression into its selector and target.
fn split_css(expression: &str, attribute: Option<&str>) -> (String, CssTarget) {
    let expr = expression.trim();

    if let Some(selector) = expr.strip_suffix("::text") {
        return (selector.trim().to_string(), CssTarget::OwnText);
    }

    if expr.ends_with(')') {
        if let Some(pos) = expr.rfind("::attr(") {
            let name = &expr[pos + "::attr(".len()..expr.len() - 1];
            return (expr[..pos].trim().to_string(), CssTarget::Attr(name.trim().to_string()));
        }
    }

    match attribute {
        Some(name) => (expr.to_string(), CssTarget::Attr(name.to_string())),
        None => (expr.to_string(), CssTarget::Text),
    }
}

fn parse_selector(rule: &ExtractionRule) -> Result<(Selector, CssTarget), ExtractionError> {
    let (selector, target) = split_css(&rule.expression, rule.attribute.as_deref());
    let parsed = Selector::parse(&selector).map_err(|e| ExtractionError::InvalidExpression {
        field: rule.field_name.clone(),
        reason: format!("{:?}", e),
    })?;
    Ok((parsed, target))
}

fn compile_regex(rule: &ExtractionRule) -> Result<Regex, ExtractionError> {
    Regex::new(&rule.expression).map_err(|e| ExtractionError::InvalidExpression {
        field: rule.field_name.clone(),
        reason: e.to_string(),
    })
}

/// Check that a rule's expression compiles for its method.
pub fn validate_rule(rule: &ExtractionRule) -> Result<(), ExtractionError> {
    match rule.method {
        ExtractMethod::Css => parse_selector(rule).map(|_| ()),
        ExtractMethod::Regex => compile_regex(rule).map(|_| ()),
        ExtractMethod::Json => Ok(()),
    }
}

/// Evaluate `rules` against `body`.
///
/// Fields with no matches map to an empty list unless the rule is
/// `required`, in which case `MissingField` names the first such field.
pub fn extract(body: &str, rules: &[ExtractionRule]) -> Result<FieldMap, ExtractionError> {
    let mut fields = FieldMap::new();
    if rules.is_empty() {
        return Ok(fields);
    }

    // Parse each body representation at most once.
    let mut html: Option<Html> = None;
    let mut json: Option<Result<serde_json::Value, String>> = None;

    for rule in rules {
        let mut matches = match rule.method {
            ExtractMethod::Css => {
                let document = html.get_or_insert_with(|| Html::parse_document(body));
                css_matches(document, rule)?
            }
            ExtractMethod::Regex => regex_matches(body, rule)?,
            ExtractMethod::Json => {
                let parsed = json.get_or_insert_with(|| {
                    serde_json::from_str::<serde_json::Value>(body).map_err(|e| e.to_string())
                });
                match parsed {
                    Ok(value) => json_matches(value, &rule.expression),
                    Err(reason) => {
                        return Err(ExtractionError::InvalidBody {
                            field: rule.field_name.clone(),
                            reason: reason.clone(),
                        })
                    }
                }
            }
        };

        if let Some(max) = rule.max_results {
            matches.truncate(max);
        }

        let value = if matches.is_empty() {
            if rule.required {
                return Err(ExtractionError::MissingField(rule.field_name.clone()));
            }
            FieldValue::empty()
        } else if rule.multiple {
            FieldValue::Many(matches)
        } else {
            FieldValue::Single(matches.swap_remove(0))
        };

        fields.insert(rule.field_name.clone(), value);
    }

    Ok(fields)
}

fn css_matches(document: &Html, rule: &ExtractionRule) -> Result<Vec<String>, ExtractionError> {
    let (selector, target) = parse_selector(rule)?;

    Ok(document
        .select(&selector)
        .filter_map(|element| read_element(&element, &target))
        .filter(|value| !value.is_empty())
        .collect())
}

fn read_element(element: &ElementRef<'_>, target: &CssTarget) -> Option<String> {
    match target {
        CssTarget::Text => Some(collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))),
        CssTarget::OwnText => {
            let own: String = element
                .children()
                .filter_map(|child| child.value().as_text().map(|t| &**t))
                .collect();
            Some(collapse_whitespace(&own))
        }
        CssTarget::Attr(name) => element.value().attr(name).map(|v| v.trim().to_string()),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn regex_matches(body: &str, rule: &ExtractionRule) -> Result<Vec<String>, ExtractionError> {
    let re = compile_regex(rule)?;
    let use_group = re.captures_len() > 1;

    Ok(re
        .captures_iter(body)
        .filter_map(|caps| if use_group { caps.get(1) } else { caps.get(0) })
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

/// Walk a dot path with `*` wildcards and collect leaf values as text.
fn json_matches(root: &serde_json::Value, path: &str) -> Vec<String> {
    let path = path.trim().trim_start_matches('$').trim_start_matches('.');
    let mut current: Vec<&serde_json::Value> = vec![root];

    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let mut next = Vec::new();
        for value in current {
            match (segment, value) {
                ("*", serde_json::Value::Array(arr)) => next.extend(arr.iter()),
                ("*", serde_json::Value::Object(obj)) => next.extend(obj.values()),
                (key, serde_json::Value::Object(obj)) => {
                    if let Some(v) = obj.get(key) {
                        next.push(v);
                    }
                }
                (idx, serde_json::Value::Array(arr)) => {
                    if let Some(v) = idx.parse::<usize>().ok().and_then(|i| arr.get(i)) {
                        next.push(v);
                    }
                }
                _ => {}
            }
        }
        current = next;
    }

    let mut out = Vec::new();
    for value in current {
        match value {
            serde_json::Value::Array(arr) => out.extend(arr.iter().filter_map(json_text)),
            other => out.extend(json_text(other)),
        }
    }
    out
}

fn json_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
