//! Composite transaction orchestrator.
//!
//! Executes a declaratively defined sequence of dependent backend calls
//! inside one client request. Steps run strictly sequentially in dependency
//! order; values produced by earlier steps (including freshly generated
//! identifiers) flow into later steps through template expressions.
//!
//! Failure is fail-fast: the first step that cannot complete halts the
//! composite and is reported precisely. Side effects of steps that already
//! ran are not rolled back; callers needing atomicity must compensate
//! themselves.

use crate::errors::{CompositeError, GatewayError};
use crate::invoker::BackendInvoker;
use crate::metrics_defs::{COMPOSITE_FAILURES, COMPOSITE_STEPS_EXECUTED};
use crate::rewrite::UrlRewriter;
use crate::template::{ExecutionContext, navigate};
use directory::{CompositeDefinition, CompositeStep, Directory};
use http::HeaderMap;
use hyper::StatusCode;
use hyper::body::Bytes;
use indexmap::IndexMap;
use serde_json::Value;
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;

/// Raw error bodies are reported at most this long when they cannot be
/// parsed as structured data.
const MAX_ERROR_DETAIL_BYTES: usize = 2048;

/// Request-scoped inputs carried alongside the body: headers forwarded to
/// step backends and the variables `$context.*` expressions read.
#[derive(Default)]
pub struct RequestMetadata {
    pub headers: HeaderMap,
    pub variables: HashMap<String, Value>,
}

/// Terminal value of one composite execution, handed back to the dispatch
/// layer. Never persisted.
#[derive(Debug)]
pub struct CompositeResult {
    pub success: bool,
    /// Results of completed steps, in execution order. On failure this is a
    /// dependency-order prefix of the schedule; steps after the failed one
    /// never appear.
    pub step_results: IndexMap<String, Value>,
    pub failure: Option<CompositeFailure>,
}

#[derive(Debug)]
pub struct CompositeFailure {
    pub failed_step: String,
    pub error_message: String,
    pub error_detail: String,
    pub http_status: Option<StatusCode>,
    pub response_body: Option<Bytes>,
    pub structured_error: Option<Value>,
}

impl CompositeFailure {
    fn from_error(error: CompositeError) -> Self {
        let failed_step = error.step().to_string();
        let error_message = error.to_string();
        match error {
            CompositeError::BackendCallFailed {
                status,
                detail,
                body,
                structured,
                ..
            } => CompositeFailure {
                failed_step,
                error_message,
                error_detail: detail,
                http_status: status,
                response_body: body,
                structured_error: structured,
            },
            CompositeError::StepNotFound { endpoint, .. } => CompositeFailure {
                failed_step,
                error_message,
                error_detail: format!("endpoint {endpoint} has no directory entry"),
                http_status: None,
                response_body: None,
                structured_error: None,
            },
            CompositeError::TemplateReferenceUnresolved { reason, .. }
            | CompositeError::MalformedInputDocument { reason, .. } => CompositeFailure {
                failed_step,
                error_message,
                error_detail: reason,
                http_status: None,
                response_body: None,
                structured_error: None,
            },
        }
    }
}

/// Sequences composite steps: resolves templates, invokes backends,
/// aggregates results, and rewrites backend URLs in the outputs.
pub struct CompositeOrchestrator {
    directory: Arc<Directory>,
    invoker: Arc<BackendInvoker>,
    rewriter: UrlRewriter,
}

impl CompositeOrchestrator {
    pub fn new(directory: Arc<Directory>, invoker: Arc<BackendInvoker>) -> Self {
        let rewriter = UrlRewriter::new(directory.clone());
        CompositeOrchestrator {
            directory,
            invoker,
            rewriter,
        }
    }

    /// Executes the definition against the parsed request body.
    ///
    /// Returns `Err` only for definitions that cannot be scheduled, which
    /// directory validation prevents from loading; every per-step failure is
    /// reported through the returned [`CompositeResult`].
    pub async fn execute(
        &self,
        definition: &CompositeDefinition,
        body: Value,
        environment: &str,
        metadata: RequestMetadata,
    ) -> Result<CompositeResult, GatewayError> {
        let schedule = definition.schedule().ok_or_else(|| {
            GatewayError::InternalError(format!(
                "composite {} cannot be scheduled",
                definition.name
            ))
        })?;

        let mut ctx = ExecutionContext::new(body, metadata.variables);
        let mut failure = None;

        for step in schedule {
            match self.execute_step(step, &mut ctx, &metadata.headers).await {
                Ok(result) => {
                    counter!(COMPOSITE_STEPS_EXECUTED).increment(1);
                    ctx.complete_step(&step.name, result);
                }
                Err(error) => {
                    counter!(COMPOSITE_FAILURES).increment(1);
                    tracing::warn!(
                        step = %step.name,
                        error = %error,
                        "Composite step failed, halting"
                    );
                    failure = Some(CompositeFailure::from_error(error));
                    break;
                }
            }
        }

        // Backend locations in completed results never leak to the client,
        // on the failure path included.
        let mut step_results = ctx.into_step_results();
        for result in step_results.values_mut() {
            *result = self.rewriter.rewrite_value(result, environment);
        }

        Ok(CompositeResult {
            success: failure.is_none(),
            step_results,
            failure,
        })
    }

    async fn execute_step(
        &self,
        step: &CompositeStep,
        ctx: &mut ExecutionContext,
        headers: &HeaderMap,
    ) -> Result<Value, CompositeError> {
        let input = self.step_input(step, ctx)?;

        let elements = if step.is_array {
            // Validation guarantees array_property is present on array steps
            let path = step.array_property.as_deref().unwrap_or_default();
            let array = navigate(&input, path).and_then(Value::as_array).ok_or_else(|| {
                CompositeError::MalformedInputDocument {
                    step: step.name.clone(),
                    reason: format!("array_property {path} is missing or not an array"),
                }
            })?;
            array.clone()
        } else {
            vec![input]
        };

        let endpoint = self.directory.lookup(&step.target_endpoint).ok_or_else(|| {
            CompositeError::StepNotFound {
                step: step.name.clone(),
                endpoint: step.target_endpoint.clone(),
            }
        })?;

        let mut results = Vec::with_capacity(elements.len());
        for mut element in elements {
            self.apply_transformations(step, ctx, &mut element)?;

            let payload = Bytes::from(element.to_string());
            let response = self
                .invoker
                .invoke(
                    &endpoint.base_url,
                    "",
                    None,
                    step.method.as_method(),
                    headers,
                    payload,
                )
                .await
                .map_err(|e| CompositeError::BackendCallFailed {
                    step: step.name.clone(),
                    status: None,
                    detail: e.to_string(),
                    body: None,
                    structured: None,
                })?;

            if !response.is_success() {
                return Err(backend_failure(&step.name, response.status, response.body));
            }

            results.push(parse_step_body(&response.body));
        }

        Ok(if step.is_array {
            Value::Array(results)
        } else {
            results.into_iter().next().unwrap_or(Value::Null)
        })
    }

    /// Determines the step's input document: `source_property` extracted
    /// from the request root, falling back to the nearest prior step's
    /// result; the whole root when no `source_property` is set.
    fn step_input(&self, step: &CompositeStep, ctx: &ExecutionContext) -> Result<Value, CompositeError> {
        let Some(path) = step.source_property.as_deref() else {
            return Ok(ctx.root().clone());
        };

        if let Some(value) = navigate(ctx.root(), path) {
            return Ok(value.clone());
        }

        let prior = match &step.depends_on {
            Some(dep) => ctx.result_of(dep),
            None => ctx.latest_result(),
        };
        if let Some(value) = prior.and_then(|result| navigate(result, path)) {
            return Ok(value.clone());
        }

        Err(CompositeError::MalformedInputDocument {
            step: step.name.clone(),
            reason: format!("source_property {path} not found in request or prior results"),
        })
    }

    fn apply_transformations(
        &self,
        step: &CompositeStep,
        ctx: &mut ExecutionContext,
        element: &mut Value,
    ) -> Result<(), CompositeError> {
        if step.transformations.is_empty() {
            return Ok(());
        }

        let Some(fields) = element.as_object_mut() else {
            return Err(CompositeError::MalformedInputDocument {
                step: step.name.clone(),
                reason: "transformations require an object element".to_string(),
            });
        };

        for (field, expression) in &step.transformations {
            let resolved = ctx.resolve(expression).map_err(|e| {
                CompositeError::TemplateReferenceUnresolved {
                    step: step.name.clone(),
                    expression: expression.clone(),
                    reason: e.to_string(),
                }
            })?;
            fields.insert(field.clone(), resolved);
        }
        Ok(())
    }
}

fn backend_failure(step: &str, status: StatusCode, body: Bytes) -> CompositeError {
    let structured: Option<Value> = serde_json::from_slice(&body).ok();
    let detail = match &structured {
        Some(value) => value.to_string(),
        None => {
            let end = body.len().min(MAX_ERROR_DETAIL_BYTES);
            String::from_utf8_lossy(&body[..end]).into_owned()
        }
    };
    CompositeError::BackendCallFailed {
        step: step.to_string(),
        status: Some(status),
        detail,
        body: Some(body),
        structured,
    }
}

fn parse_step_body(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}
