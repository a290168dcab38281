//! Reference Resolution
//!
//! Step parameters may refer to values produced earlier in the workflow.
//! A parameter string of the exact form `{{reference}}` is replaced by the
//! value it names; every other value passes through unchanged.
//!
//! Grammar (whitespace inside the braces is trimmed):
//!
//! ```text
//! reference = segment, { ".", segment }
//! segment   = one or more characters other than "."
//! ```
//!
//! Lookup order:
//! 1. `step_id.path...` where `step_id` has a stored result: the path walks
//!    the [`StepResult`] record, so `{{fetch.data.id}}` reads the `id` field
//!    of the `fetch` step's action output.
//! 2. The whole reference as a key of the workflow context
//!    (`{{current_date}}`, `{{workflow_id}}`, `save_to` bindings).
//! 3. `key.path...` walking `context[key]`, so `{{contacts.total}}` reads
//!    into a `save_to: contacts` binding.
//!
//! Anything that cannot be found resolves to `null`. Resolution never fails.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::state::StepResult;

/// Context keys the engine fills in for every workflow.
pub const RESERVED_CONTEXT_KEYS: &[&str] = &["workflow_id", "current_date", "current_timestamp"];

/// A parsed `{{...}}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    raw: String,
    segments: Vec<String>,
}

impl Reference {
    /// Parses a parameter string. Returns `None` unless the whole string is
    /// wrapped in `{{` and `}}`.
    pub fn parse(value: &str) -> Option<Self> {
        let inner = value.strip_prefix("{{")?.strip_suffix("}}")?.trim();
        if inner.is_empty() {
            return None;
        }

        Some(Self {
            raw: inner.to_string(),
            segments: inner.split('.').map(str::to_string).collect(),
        })
    }

    /// The reference text without braces.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// First segment: a step id or a context key.
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Segments after the root.
    pub fn path(&self) -> &[String] {
        &self.segments[1..]
    }

    /// True when no segment is empty (`a..b` and `.a` are not well formed).
    pub fn is_well_formed(&self) -> bool {
        self.segments.iter().all(|s| !s.is_empty())
    }

    /// Looks the reference up against the context and prior step results.
    pub fn lookup(
        &self,
        context: &Map<String, Value>,
        results: &BTreeMap<String, StepResult>,
    ) -> Value {
        let dotted = self.segments.len() > 1 && self.is_well_formed();

        if dotted {
            if let Some(result) = results.get(self.root()) {
                let record = serde_json::to_value(result).unwrap_or(Value::Null);
                return navigate(&record, self.path());
            }
        }

        if let Some(value) = context.get(&self.raw) {
            return value.clone();
        }

        if dotted {
            if let Some(value) = context.get(self.root()) {
                return navigate(value, self.path());
            }
        }

        Value::Null
    }
}

/// Walks `value` by map keys; any missing or non-map hop yields `null`.
fn navigate(value: &Value, path: &[String]) -> Value {
    let mut current = value;
    for segment in path {
        match current.get(segment.as_str()) {
            Some(next) if current.is_object() => current = next,
            _ => return Value::Null,
        }
    }
    current.clone()
}

/// Resolves every reference inside `params`, recursing into nested maps and
/// lists.
///
/// Pure: the same inputs always produce the same output and nothing is
/// mutated.
pub fn resolve(
    params: &Map<String, Value>,
    context: &Map<String, Value>,
    results: &BTreeMap<String, StepResult>,
) -> Map<String, Value> {
    params
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, context, results)))
        .collect()
}

/// Resolves a single value.
pub fn resolve_value(
    value: &Value,
    context: &Map<String, Value>,
    results: &BTreeMap<String, StepResult>,
) -> Value {
    match value {
        Value::String(s) => match Reference::parse(s) {
            Some(reference) => reference.lookup(context, results),
            None => value.clone(),
        },
        Value::Object(map) => Value::Object(resolve(map, context, results)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, context, results))
                .collect(),
        ),
        _ => value.clone(),
    }
}
