//! Platform error codes and the backend error taxonomy

use thiserror::Error;

/// Error codes reported by the function platform's control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ResourceConflict,
    ResourceNotFound,
    TooManyRequests,
    UnrecognizedClient,
    AccessDenied,
    InvalidSignature,
    InvalidParameterValue,
    CodeStorageExceeded,
    RequestTooLarge,
    ServiceException,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceConflict => "ResourceConflictException",
            Self::ResourceNotFound => "ResourceNotFoundException",
            Self::TooManyRequests => "TooManyRequestsException",
            Self::UnrecognizedClient => "UnrecognizedClientException",
            Self::AccessDenied => "AccessDeniedException",
            Self::InvalidSignature => "InvalidSignatureException",
            Self::InvalidParameterValue => "InvalidParameterValueException",
            Self::CodeStorageExceeded => "CodeStorageExceededException",
            Self::RequestTooLarge => "RequestTooLargeException",
            Self::ServiceException => "ServiceException",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::ResourceConflict => 409,
            Self::ResourceNotFound => 404,
            Self::TooManyRequests => 429,
            Self::UnrecognizedClient | Self::InvalidSignature => 401,
            Self::AccessDenied => 403,
            Self::InvalidParameterValue | Self::CodeStorageExceeded => 400,
            Self::RequestTooLarge => 413,
            Self::ServiceException => 500,
        }
    }

    /// Parse a code as it appears in a platform error response
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "ResourceConflictException" => Some(Self::ResourceConflict),
            "ResourceNotFoundException" => Some(Self::ResourceNotFound),
            "TooManyRequestsException" => Some(Self::TooManyRequests),
            "UnrecognizedClientException" => Some(Self::UnrecognizedClient),
            "AccessDeniedException" => Some(Self::AccessDenied),
            "InvalidSignatureException" => Some(Self::InvalidSignature),
            "InvalidParameterValueException" => Some(Self::InvalidParameterValue),
            "CodeStorageExceededException" => Some(Self::CodeStorageExceeded),
            "RequestTooLargeException" => Some(Self::RequestTooLarge),
            "ServiceException" => Some(Self::ServiceException),
            _ => None,
        }
    }

    /// Whether the code means the caller's credentials were rejected
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::UnrecognizedClient | Self::AccessDenied | Self::InvalidSignature
        )
    }
}

/// Errors surfaced by the adapter to the host framework
#[derive(Debug, Error)]
pub enum BackendError {
    /// A function with this resource name already exists
    #[error("Runtime already exists: {0}")]
    Conflict(String),

    #[error("Runtime not found: {0}")]
    NotFound(String),

    #[error("Unauthorized - invalid credentials: {0}")]
    Unauthorized(String),

    #[error("Runtime {environment} ({memory_mb}MB) not deployed")]
    RuntimeNotDeployed { environment: String, memory_mb: u32 },

    #[error("Unexpected response from {operation} (status {status:?}): {raw}")]
    RemoteApi {
        operation: String,
        status: Option<u16>,
        raw: String,
    },

    #[error("Metadata probe for {environment} failed: {reason}")]
    ProbeFailed { environment: String, reason: String },

    #[error("Unable to build the {artifact} package: {source}")]
    Packaging {
        artifact: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid environment name {0:?}: only ASCII letters, digits and '.' are allowed")]
    InvalidEnvironment(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unable to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl BackendError {
    pub fn remote(
        operation: impl Into<String>,
        status: Option<u16>,
        raw: impl Into<String>,
    ) -> Self {
        Self::RemoteApi {
            operation: operation.into(),
            status,
            raw: raw.into(),
        }
    }

    pub fn packaging(
        artifact: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Packaging {
            artifact: artifact.into(),
            source: Box::new(source),
        }
    }

    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            context: context.into(),
            source,
        }
    }
}
