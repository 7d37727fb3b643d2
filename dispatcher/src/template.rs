//! Template expression resolution for composite steps.
//!
//! The expression language is small: `$guid` mints an identifier, `$prev`
//! reads an earlier step's result, `$context` reads a request-scoped
//! variable, and anything else is a literal copied verbatim.
//!
//! Generated values are memoized in `shared_values` keyed by the literal
//! expression text, so every use of the bare `$guid` within one request
//! resolves to the same value. Per-step uniqueness would require keying by
//! `(step, expression)`; the request-wide sharing is deliberate and relied
//! on by definitions that stamp one transaction key across several steps.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

const GUID_EXPRESSION: &str = "$guid";
const PREV_PREFIX: &str = "$prev.";
const CONTEXT_PREFIX: &str = "$context.";

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Reference not found: {expression} ({reason})")]
    ReferenceNotFound { expression: String, reason: String },
}

/// Per-request state for one composite execution. Created fresh for each
/// inbound request, exclusively owned by it, and discarded at request end.
pub struct ExecutionContext {
    root: Value,
    shared_values: HashMap<String, Value>,
    step_results: IndexMap<String, Value>,
    variables: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(root: Value, variables: HashMap<String, Value>) -> Self {
        ExecutionContext {
            root,
            shared_values: HashMap::new(),
            step_results: IndexMap::new(),
            variables,
        }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Records a completed step's result, in execution order.
    pub fn complete_step(&mut self, name: &str, result: Value) {
        self.step_results.insert(name.to_string(), result);
    }

    pub fn result_of(&self, step: &str) -> Option<&Value> {
        self.step_results.get(step)
    }

    /// The most recently completed step's result
    pub fn latest_result(&self) -> Option<&Value> {
        self.step_results.last().map(|(_, v)| v)
    }

    pub fn into_step_results(self) -> IndexMap<String, Value> {
        self.step_results
    }

    pub fn step_results(&self) -> &IndexMap<String, Value> {
        &self.step_results
    }

    pub fn step_results_mut(&mut self) -> &mut IndexMap<String, Value> {
        &mut self.step_results
    }

    /// Resolves one template expression against this context.
    pub fn resolve(&mut self, expression: &str) -> Result<Value, TemplateError> {
        if expression == GUID_EXPRESSION {
            let value = self
                .shared_values
                .entry(expression.to_string())
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            return Ok(value.clone());
        }

        if let Some(reference) = expression.strip_prefix(PREV_PREFIX) {
            let (step, path) = match reference.split_once('.') {
                Some((step, path)) => (step, Some(path)),
                None => (reference, None),
            };

            let result = self.step_results.get(step).ok_or_else(|| {
                TemplateError::ReferenceNotFound {
                    expression: expression.to_string(),
                    reason: format!("no completed step named {step}"),
                }
            })?;

            let value = match path {
                Some(path) => {
                    navigate(result, path).ok_or_else(|| TemplateError::ReferenceNotFound {
                        expression: expression.to_string(),
                        reason: format!("path {path} not present in result of {step}"),
                    })?
                }
                None => result,
            };
            return Ok(value.clone());
        }

        if let Some(name) = expression.strip_prefix(CONTEXT_PREFIX) {
            let value =
                self.variables
                    .get(name)
                    .ok_or_else(|| TemplateError::ReferenceNotFound {
                        expression: expression.to_string(),
                        reason: format!("no context variable named {name}"),
                    })?;
            return Ok(value.clone());
        }

        // Anything else is a literal
        Ok(Value::String(expression.to_string()))
    }
}

/// Navigates a dotted path with numeric array indexes, e.g.
/// `items.0.id`. Returns `None` when any segment is missing or an index is
/// out of range.
pub fn navigate<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
