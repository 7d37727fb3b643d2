use hyper::StatusCode;
use thiserror::Error;

/// Result type alias for dispatcher operations
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors that can occur while dispatching a request
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Failed to read response body: {0}")]
    ResponseBodyError(String),

    #[error("Request body is not a valid document: {0}")]
    MalformedRequestBody(String),

    #[error("Backend request failed for {0}: {1}")]
    BackendRequestFailed(String, String),

    #[error("Backend timeout for {0}")]
    BackendTimeout(String),

    #[error("Cache store error: {0}")]
    CacheStore(String),

    #[error("Lock backend error: {0}")]
    LockBackend(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal composite-step failures. None of these are retried; the
/// orchestrator stops at the first one and reports it to the caller.
#[derive(Error, Debug)]
pub enum CompositeError {
    #[error("Step {step} targets unknown endpoint {endpoint}")]
    StepNotFound { step: String, endpoint: String },

    #[error("Step {step} could not resolve {expression}: {reason}")]
    TemplateReferenceUnresolved {
        step: String,
        expression: String,
        reason: String,
    },

    #[error("Step {step} input document is malformed: {reason}")]
    MalformedInputDocument { step: String, reason: String },

    #[error("Step {step} backend call failed")]
    BackendCallFailed {
        step: String,
        status: Option<StatusCode>,
        detail: String,
        /// Raw backend error body, when one was received
        body: Option<bytes::Bytes>,
        /// Error body parsed as structured data, when parseable
        structured: Option<serde_json::Value>,
    },
}

impl CompositeError {
    pub fn step(&self) -> &str {
        match self {
            CompositeError::StepNotFound { step, .. } => step,
            CompositeError::TemplateReferenceUnresolved { step, .. } => step,
            CompositeError::MalformedInputDocument { step, .. } => step,
            CompositeError::BackendCallFailed { step, .. } => step,
        }
    }
}
