//! The dispatch surface: routes `/api/{environment}/{endpoint}[/{sub_path}]`
//! requests into the composite orchestrator, the response cache engine, or a
//! direct backend invocation.
//!
//! All request-shape enforcement lives here: endpoint existence and privacy,
//! environment allow-list, method allow-list, cache bypass detection. The
//! engines behind this layer assume those checks already happened.

use crate::cache::lock::{DistributedLock, InMemoryLockBackend};
use crate::cache::store::InMemoryCacheStore;
use crate::cache::{CachedResponse, ResponseCacheEngine, build_cache_key};
use crate::composite::{CompositeOrchestrator, CompositeResult, RequestMetadata};
use crate::config::{BackendSettings, CacheSettings};
use crate::errors::GatewayError;
use crate::invoker::{BackendInvoker, BackendResponse};
use crate::metrics_defs::REQUEST_DURATION;
use crate::rewrite::UrlRewriter;
use directory::{Directory, EndpointDefinition};
use http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use serde_json::{Value, json};
use shared::histogram;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Everything one request needs, wired once at startup
pub struct Dispatcher {
    directory: Arc<Directory>,
    invoker: Arc<BackendInvoker>,
    orchestrator: CompositeOrchestrator,
    cache_engine: ResponseCacheEngine,
    rewriter: UrlRewriter,
    cache: CacheSettings,
}

impl Dispatcher {
    pub fn new(directory: Arc<Directory>, backend: &BackendSettings, cache: CacheSettings) -> Self {
        let invoker = Arc::new(BackendInvoker::new(backend));
        let orchestrator = CompositeOrchestrator::new(directory.clone(), invoker.clone());
        let store = Arc::new(InMemoryCacheStore::new(cache.max_entries));
        let lock = DistributedLock::new(Arc::new(InMemoryLockBackend::new()), cache.lock.clone());
        let cache_engine = ResponseCacheEngine::new(store, lock, cache.clone());
        let rewriter = UrlRewriter::new(directory.clone());

        Dispatcher {
            directory,
            invoker,
            orchestrator,
            cache_engine,
            rewriter,
            cache,
        }
    }

    pub async fn dispatch<B>(
        &self,
        req: Request<B>,
    ) -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError>
    where
        B: hyper::body::Body + Send,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = req.into_parts();

        let Some(route) = RoutedPath::parse(parts.uri.path()) else {
            return Ok(error_response(StatusCode::NOT_FOUND));
        };

        // Private and unknown endpoints are indistinguishable from outside
        let Some(endpoint) = self.directory.lookup(route.endpoint) else {
            tracing::debug!(endpoint = %route.endpoint, "No such endpoint");
            return Ok(error_response(StatusCode::NOT_FOUND));
        };
        if endpoint.is_private {
            return Ok(error_response(StatusCode::NOT_FOUND));
        }
        if !endpoint.allows_environment(route.environment) {
            tracing::debug!(
                endpoint = %route.endpoint,
                environment = %route.environment,
                "Environment not allowed"
            );
            return Ok(error_response(StatusCode::FORBIDDEN));
        }
        if !endpoint.allows_method(&parts.method) {
            return Ok(error_response(StatusCode::METHOD_NOT_ALLOWED));
        }

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to collect request body");
                return Ok(error_response(StatusCode::BAD_REQUEST));
            }
        };

        if endpoint.is_composite() {
            return self
                .dispatch_composite(&endpoint, &route, parts.headers, parts.uri.query(), body)
                .await;
        }

        if parts.method == Method::GET && !bypasses_cache(&parts.headers) {
            return self
                .dispatch_cached_get(&endpoint, &route, parts.uri.query(), &parts.headers)
                .await;
        }

        self.dispatch_direct(
            &endpoint,
            &route,
            parts.uri.query(),
            parts.method,
            &parts.headers,
            body,
        )
        .await
    }

    async fn dispatch_composite(
        &self,
        endpoint: &EndpointDefinition,
        route: &RoutedPath<'_>,
        headers: HeaderMap,
        query: Option<&str>,
        body: Bytes,
    ) -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
        // Validation guarantees composite is present on composite endpoints
        let Some(definition) = endpoint.composite.as_ref() else {
            return Ok(error_response(StatusCode::NOT_FOUND));
        };

        let document: Value = if body.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(&body) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(error = %e, "Composite request body is not valid JSON");
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        &json!({"error": format!("request body is not a valid document: {e}")}),
                    )?);
                }
            }
        };

        let mut variables = query_variables(query);
        variables.insert(
            "environment".to_string(),
            Value::String(route.environment.to_string()),
        );
        let metadata = RequestMetadata { headers, variables };

        let result = self
            .orchestrator
            .execute(definition, document, route.environment, metadata)
            .await?;

        composite_response(result)
    }

    async fn dispatch_cached_get(
        &self,
        endpoint: &EndpointDefinition,
        route: &RoutedPath<'_>,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
        let cache_key = build_cache_key(
            route.environment,
            route.endpoint,
            route.sub_path,
            query,
            headers,
        );
        let lock_key = format!("lock:{cache_key}");
        let endpoint_ttl = endpoint.cache_ttl_secs.map(Duration::from_secs);
        // What the defaulted Cache-Control advertises, matching what the
        // cache engine will select in the absence of a backend max-age
        let advertised_ttl = endpoint_ttl.unwrap_or_else(|| self.cache.default_ttl());

        let result = self
            .cache_engine
            .handle_cacheable_get(&cache_key, &lock_key, endpoint_ttl, || async {
                let response = self
                    .invoker
                    .invoke(
                        &endpoint.base_url,
                        route.sub_path,
                        query,
                        Method::GET,
                        headers,
                        Bytes::new(),
                    )
                    .await?;
                let mut response = self.rewrite_response(response, route.environment);
                if response.status.is_success() && !response.headers.contains_key(CACHE_CONTROL) {
                    if let Ok(value) =
                        format!("max-age={}", advertised_ttl.as_secs()).parse()
                    {
                        response.headers.insert(CACHE_CONTROL, value);
                    }
                }
                Ok(response)
            })
            .await;

        match result {
            Ok(response) => Ok(into_boxed_response(response)),
            Err(e) => Ok(backend_error_response(&e)),
        }
    }

    async fn dispatch_direct(
        &self,
        endpoint: &EndpointDefinition,
        route: &RoutedPath<'_>,
        query: Option<&str>,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
        let result = self
            .invoker
            .invoke(&endpoint.base_url, route.sub_path, query, method, headers, body)
            .await;

        match result {
            Ok(response) => {
                let response = self.rewrite_response(response, route.environment);
                Ok(into_boxed_response(response))
            }
            Err(e) => Ok(backend_error_response(&e)),
        }
    }

    /// Applies the URL rewriter to textual response bodies; binary payloads
    /// pass through untouched.
    fn rewrite_response(&self, response: BackendResponse, environment: &str) -> CachedResponse {
        let rewritable = response.content_type().is_some_and(is_textual_media_type);
        let body = if rewritable {
            match std::str::from_utf8(&response.body) {
                Ok(text) => Bytes::from(self.rewriter.rewrite_payload(text, environment)),
                Err(_) => response.body,
            }
        } else {
            response.body
        };

        let mut headers = response.headers;
        // Length may have changed under rewriting
        headers.remove(http::header::CONTENT_LENGTH);

        CachedResponse {
            status: response.status,
            headers,
            body,
        }
    }
}

/// A parsed `/api/{environment}/{endpoint}[/{sub_path}]` path
struct RoutedPath<'a> {
    environment: &'a str,
    endpoint: &'a str,
    sub_path: &'a str,
}

impl<'a> RoutedPath<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        let rest = path.strip_prefix("/api/")?;
        let (environment, rest) = rest.split_once('/')?;
        let (endpoint, sub_path) = match rest.split_once('/') {
            Some((endpoint, sub_path)) => (endpoint, sub_path),
            None => (rest, ""),
        };
        if environment.is_empty() || endpoint.is_empty() {
            return None;
        }
        Some(RoutedPath {
            environment,
            endpoint,
            sub_path,
        })
    }
}

fn query_variables(query: Option<&str>) -> HashMap<String, Value> {
    let Some(query) = query else {
        return HashMap::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(name, value)| (name.into_owned(), Value::String(value.into_owned())))
        .collect()
}

/// Whether the client opted out of caching or the exchange is a protocol
/// variant the cache cannot represent (streams, multipart uploads).
fn bypasses_cache(headers: &HeaderMap) -> bool {
    if let Some(cc) = headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()) {
        let cc = cc.to_ascii_lowercase();
        if cc.contains("no-store") || cc.contains("no-cache") {
            return true;
        }
    }
    if headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
    {
        return true;
    }
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/"))
}

fn is_textual_media_type(content_type: &str) -> bool {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    media.starts_with("text/") || media.ends_with("json") || media.ends_with("xml")
}

fn composite_response(
    result: CompositeResult,
) -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
    if result.success {
        return json_response(
            StatusCode::OK,
            &json!({
                "success": true,
                "stepResults": result.step_results,
            }),
        );
    }

    // Halting without a failure record cannot happen; guard anyway
    let Some(failure) = result.failure else {
        return json_response(StatusCode::BAD_GATEWAY, &json!({"success": false}));
    };

    let status = failure.http_status.unwrap_or(StatusCode::BAD_GATEWAY);
    json_response(
        status,
        &json!({
            "success": false,
            "failedStep": failure.failed_step,
            "errorMessage": failure.error_message,
            "errorDetail": failure.error_detail,
        }),
    )
}

fn json_response(
    status: StatusCode,
    value: &Value,
) -> Result<Response<BoxBody<Bytes, GatewayError>>, GatewayError> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(
            Full::new(Bytes::from(value.to_string()))
                .map_err(|e| match e {})
                .boxed(),
        )
        .map_err(|e| GatewayError::InternalError(format!("Failed to build response: {e}")))
}

fn error_response(status: StatusCode) -> Response<BoxBody<Bytes, GatewayError>> {
    let (parts, body) = shared::http::make_error_response(status).into_parts();
    Response::from_parts(parts, Full::new(body).map_err(|e| match e {}).boxed())
}

fn backend_error_response(error: &GatewayError) -> Response<BoxBody<Bytes, GatewayError>> {
    let status = match error {
        GatewayError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    tracing::warn!(error = %error, "Backend invocation failed");
    error_response(status)
}

fn into_boxed_response(response: CachedResponse) -> Response<BoxBody<Bytes, GatewayError>> {
    let mut out = Response::new(Full::new(response.body).map_err(|e| match e {}).boxed());
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}

/// Cloneable hyper `Service` wrapper around a shared [`Dispatcher`]
#[derive(Clone)]
pub struct DispatcherService {
    inner: Arc<Dispatcher>,
}

impl DispatcherService {
    pub fn new(dispatcher: Dispatcher) -> Self {
        DispatcherService {
            inner: Arc::new(dispatcher),
        }
    }
}

impl Service<Request<Incoming>> for DispatcherService {
    type Response = Response<BoxBody<Bytes, GatewayError>>;
    type Error = GatewayError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let dispatcher = self.inner.clone();
        Box::pin(async move {
            let started = tokio::time::Instant::now();
            let result = dispatcher.dispatch(req).await;
            histogram!(REQUEST_DURATION).record(started.elapsed().as_secs_f64());
            result
        })
    }
}
