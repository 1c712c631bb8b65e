//! Function platform control-plane API
//!
//! The registry only talks to the platform through [`LambdaApi`], so the
//! same reconciliation code runs against the real service or the in-memory
//! [`EphemeralLambda`](crate::EphemeralLambda).

use async_trait::async_trait;
use bytes::Bytes;
use fnbridge_core::ErrorCode;
use thiserror::Error;

use crate::invocation::InvocationKind;

/// Errors from platform API calls
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Too many requests: {0}")]
    Throttled(String),

    /// The request never got a response (dispatch failure, timeout)
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Unexpected response (status {status:?}): {raw}")]
    Unexpected { status: Option<u16>, raw: String },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Conflict(_) => Some(409),
            Self::NotFound(_) => Some(404),
            Self::Unauthorized(_) => Some(401),
            Self::Throttled(_) => Some(429),
            Self::Transport(_) => None,
            Self::Unexpected { status, .. } => *status,
        }
    }
}

/// Map a platform error response onto [`ApiError`].
///
/// The error code wins when it is known; otherwise the HTTP status decides.
pub fn classify_service_error(status: Option<u16>, code: Option<&str>, raw: String) -> ApiError {
    if let Some(code) = code.and_then(ErrorCode::from_code) {
        match code {
            ErrorCode::ResourceConflict => return ApiError::Conflict(raw),
            ErrorCode::ResourceNotFound => return ApiError::NotFound(raw),
            ErrorCode::TooManyRequests => return ApiError::Throttled(raw),
            c if c.is_auth_failure() => return ApiError::Unauthorized(raw),
            _ => {}
        }
    }

    match status {
        Some(401 | 403) => ApiError::Unauthorized(raw),
        Some(404) => ApiError::NotFound(raw),
        Some(409) => ApiError::Conflict(raw),
        Some(429) => ApiError::Throttled(raw),
        status => ApiError::Unexpected { status, raw },
    }
}

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_ACCEPTED: u16 = 202;
pub const STATUS_NO_CONTENT: u16 = 204;

/// Successful control-plane response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub request_id: Option<String>,
}

/// Parameters for creating a function
#[derive(Debug, Clone)]
pub struct CreateFunctionRequest {
    pub function_name: String,
    pub environment: String,
    pub role: String,
    pub handler: String,
    pub code: Bytes,
    pub description: String,
    pub timeout_secs: u32,
    pub memory_mb: u32,
    pub layers: Vec<String>,
}

/// Parameters for updating a function's configuration
#[derive(Debug, Clone)]
pub struct UpdateConfigRequest {
    pub function_name: String,
    pub role: String,
    pub timeout_secs: u32,
    pub memory_mb: u32,
    pub layers: Vec<String>,
}

/// Parameters for publishing a layer version
#[derive(Debug, Clone)]
pub struct PublishLayerRequest {
    pub layer_name: String,
    pub description: String,
    pub content: Bytes,
    pub compatible_environments: Vec<String>,
}

/// A function as reported by the listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSummary {
    pub function_name: String,
    pub memory_mb: u32,
}

/// Result of publishing a layer version
#[derive(Debug, Clone)]
pub struct PublishedLayer {
    pub status: u16,
    pub layer_version_arn: String,
    pub version: i64,
}

/// A layer as reported by the listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    pub layer_name: String,
    pub layer_arn: String,
    /// ARN of the newest version compatible with the filter, if any
    pub latest_version_arn: Option<String>,
}

/// Raw invocation response
#[derive(Debug, Clone)]
pub struct InvokeResponse {
    pub status: u16,
    pub request_id: Option<String>,
    pub payload: Bytes,
    /// Set when the invoked code itself raised
    pub function_error: Option<String>,
}

/// Control-plane operations used by the registry
#[async_trait]
pub trait LambdaApi: Send + Sync {
    async fn create_function(&self, request: CreateFunctionRequest)
        -> Result<ApiResponse, ApiError>;

    async fn update_function_code(
        &self,
        function_name: &str,
        code: Bytes,
    ) -> Result<ApiResponse, ApiError>;

    async fn update_function_configuration(
        &self,
        request: UpdateConfigRequest,
    ) -> Result<ApiResponse, ApiError>;

    async fn delete_function(&self, function_name: &str) -> Result<ApiResponse, ApiError>;

    /// List every function in the region, following pagination
    async fn list_functions(&self) -> Result<Vec<FunctionSummary>, ApiError>;

    async fn publish_layer_version(
        &self,
        request: PublishLayerRequest,
    ) -> Result<PublishedLayer, ApiError>;

    async fn delete_layer_version(
        &self,
        layer_name: &str,
        version: i64,
    ) -> Result<ApiResponse, ApiError>;

    /// List layers, optionally only those compatible with an environment
    async fn list_layers(
        &self,
        compatible_environment: Option<&str>,
    ) -> Result<Vec<LayerDescriptor>, ApiError>;

    async fn invoke(
        &self,
        function_name: &str,
        payload: Bytes,
        kind: InvocationKind,
    ) -> Result<InvokeResponse, ApiError>;
}
