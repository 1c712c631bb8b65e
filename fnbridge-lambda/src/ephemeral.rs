//! In-memory function platform
//!
//! Behaves like the control plane for the calls the adapter makes, and lets
//! tests inject throttling, transport failures and failed deletions.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fnbridge_core::ErrorCode;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::api::{
    ApiError, ApiResponse, CreateFunctionRequest, FunctionSummary, InvokeResponse, LambdaApi,
    LayerDescriptor, PublishLayerRequest, PublishedLayer, UpdateConfigRequest, STATUS_CREATED,
    STATUS_NO_CONTENT, STATUS_OK,
};
use crate::invocation::InvocationKind;

const ACCOUNT_ID: &str = "000000000000";

/// A function held by the ephemeral platform
#[derive(Debug, Clone)]
pub struct EphemeralFunction {
    pub function_name: String,
    pub environment: String,
    pub role: String,
    pub handler: String,
    pub description: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    pub layers: Vec<String>,
    pub code_sha256: String,
    pub code_size: usize,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LayerVersion {
    version: i64,
    arn: String,
    compatible_environments: Vec<String>,
}

/// A recorded invocation
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub function_name: String,
    pub kind: InvocationKind,
    pub payload: Value,
}

#[derive(Default)]
struct Faults {
    throttled_calls: HashSet<String>,
    transport_failures: HashMap<String, usize>,
    status_overrides: HashMap<String, u16>,
    failing_deletes: HashSet<String>,
    reject_credentials: bool,
}

/// Ephemeral (in-memory) function platform
pub struct EphemeralLambda {
    region: String,
    functions: DashMap<String, EphemeralFunction>,
    layers: DashMap<String, Vec<LayerVersion>>,
    responses: DashMap<String, Value>,
    calls: DashMap<&'static str, usize>,
    invocations: Mutex<Vec<RecordedInvocation>>,
    faults: Mutex<Faults>,
}

impl Default for EphemeralLambda {
    fn default() -> Self {
        Self::new()
    }
}

impl EphemeralLambda {
    pub fn new() -> Self {
        Self::with_region("us-east-1")
    }

    pub fn with_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            functions: DashMap::new(),
            layers: DashMap::new(),
            responses: DashMap::new(),
            calls: DashMap::new(),
            invocations: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
        }
    }

    // === Fault injection ===

    /// Answer every invocation carrying this `call_id` with a rate-limit error
    pub fn throttle_call(&self, call_id: impl Into<String>) {
        self.faults.lock().throttled_calls.insert(call_id.into());
    }

    /// Fail the next `times` invocations carrying this `call_id` before any response
    pub fn fail_transport(&self, call_id: impl Into<String>, times: usize) {
        self.faults
            .lock()
            .transport_failures
            .insert(call_id.into(), times);
    }

    /// Accept invocations carrying this `call_id` but report the given status
    pub fn respond_with_status(&self, call_id: impl Into<String>, status: u16) {
        self.faults
            .lock()
            .status_overrides
            .insert(call_id.into(), status);
    }

    pub fn fail_delete(&self, function_name: impl Into<String>) {
        self.faults.lock().failing_deletes.insert(function_name.into());
    }

    /// Reject every call as if the credentials were invalid
    pub fn reject_credentials(&self) {
        self.faults.lock().reject_credentials = true;
    }

    /// Output returned by synchronous invocations of a function
    pub fn set_response(&self, function_name: impl Into<String>, output: Value) {
        self.responses.insert(function_name.into(), output);
    }

    // === Inspection ===

    pub fn function(&self, function_name: &str) -> Option<EphemeralFunction> {
        self.functions.get(function_name).map(|f| f.clone())
    }

    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|f| f.key().clone()).collect();
        names.sort();
        names
    }

    pub fn layer_version_count(&self, layer_name: &str) -> usize {
        self.layers.get(layer_name).map_or(0, |v| v.len())
    }

    /// Number of calls made to an operation, e.g. `"Invoke"` or `"PublishLayerVersion"`
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls.get(operation).map_or(0, |c| *c)
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().clone()
    }

    // === Internals ===

    fn record(&self, operation: &'static str) -> Result<(), ApiError> {
        *self.calls.entry(operation).or_insert(0) += 1;
        if self.faults.lock().reject_credentials {
            return Err(ApiError::Unauthorized(format!(
                "{}: The security token included in the request is invalid",
                ErrorCode::UnrecognizedClient.as_str()
            )));
        }
        Ok(())
    }

    fn not_found(kind: &str, name: &str) -> ApiError {
        ApiError::NotFound(format!(
            "{}: {kind} not found: {name}",
            ErrorCode::ResourceNotFound.as_str()
        ))
    }

    fn function_arn(&self, function_name: &str) -> String {
        format!(
            "arn:aws:lambda:{}:{ACCOUNT_ID}:function:{function_name}",
            self.region
        )
    }

    fn layer_arn(&self, layer_name: &str) -> String {
        format!("arn:aws:lambda:{}:{ACCOUNT_ID}:layer:{layer_name}", self.region)
    }

    fn ok(status: u16) -> ApiResponse {
        ApiResponse {
            status,
            request_id: Some(Uuid::new_v4().to_string()),
        }
    }

    fn sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl LambdaApi for EphemeralLambda {
    async fn create_function(
        &self,
        request: CreateFunctionRequest,
    ) -> Result<ApiResponse, ApiError> {
        self.record("CreateFunction")?;

        let vacant = match self.functions.entry(request.function_name.clone()) {
            Entry::Occupied(_) => {
                return Err(ApiError::Conflict(format!(
                    "{}: Function already exist: {}",
                    ErrorCode::ResourceConflict.as_str(),
                    request.function_name
                )));
            }
            Entry::Vacant(vacant) => vacant,
        };

        vacant.insert(EphemeralFunction {
            function_name: request.function_name.clone(),
            environment: request.environment,
            role: request.role,
            handler: request.handler,
            description: request.description,
            memory_mb: request.memory_mb,
            timeout_secs: request.timeout_secs,
            layers: request.layers,
            code_sha256: Self::sha256(&request.code),
            code_size: request.code.len(),
            last_modified: Utc::now(),
        });

        Ok(Self::ok(STATUS_CREATED))
    }

    async fn update_function_code(
        &self,
        function_name: &str,
        code: Bytes,
    ) -> Result<ApiResponse, ApiError> {
        self.record("UpdateFunctionCode")?;

        let mut function = self
            .functions
            .get_mut(function_name)
            .ok_or_else(|| Self::not_found("Function", function_name))?;
        function.code_sha256 = Self::sha256(&code);
        function.code_size = code.len();
        function.last_modified = Utc::now();

        Ok(Self::ok(STATUS_OK))
    }

    async fn update_function_configuration(
        &self,
        request: UpdateConfigRequest,
    ) -> Result<ApiResponse, ApiError> {
        self.record("UpdateFunctionConfiguration")?;

        let mut function = self
            .functions
            .get_mut(&request.function_name)
            .ok_or_else(|| Self::not_found("Function", &request.function_name))?;
        function.role = request.role;
        function.timeout_secs = request.timeout_secs;
        function.memory_mb = request.memory_mb;
        function.layers = request.layers;
        function.last_modified = Utc::now();

        Ok(Self::ok(STATUS_OK))
    }

    async fn delete_function(&self, function_name: &str) -> Result<ApiResponse, ApiError> {
        self.record("DeleteFunction")?;

        if self.faults.lock().failing_deletes.contains(function_name) {
            return Err(ApiError::Unexpected {
                status: Some(500),
                raw: format!(
                    "{}: internal failure deleting {function_name}",
                    ErrorCode::ServiceException.as_str()
                ),
            });
        }

        self.functions
            .remove(function_name)
            .ok_or_else(|| Self::not_found("Function", function_name))?;
        Ok(Self::ok(STATUS_NO_CONTENT))
    }

    async fn list_functions(&self) -> Result<Vec<FunctionSummary>, ApiError> {
        self.record("ListFunctions")?;

        let mut functions: Vec<FunctionSummary> = self
            .functions
            .iter()
            .map(|f| FunctionSummary {
                function_name: f.function_name.clone(),
                memory_mb: f.memory_mb,
            })
            .collect();
        functions.sort_by(|a, b| a.function_name.cmp(&b.function_name));
        Ok(functions)
    }

    async fn publish_layer_version(
        &self,
        request: PublishLayerRequest,
    ) -> Result<PublishedLayer, ApiError> {
        self.record("PublishLayerVersion")?;

        let layer_arn = self.layer_arn(&request.layer_name);
        let mut versions = self.layers.entry(request.layer_name).or_default();
        let version = versions.last().map_or(1, |v| v.version + 1);
        let arn = format!("{layer_arn}:{version}");
        versions.push(LayerVersion {
            version,
            arn: arn.clone(),
            compatible_environments: request.compatible_environments,
        });

        Ok(PublishedLayer {
            status: STATUS_CREATED,
            layer_version_arn: arn,
            version,
        })
    }

    async fn delete_layer_version(
        &self,
        layer_name: &str,
        version: i64,
    ) -> Result<ApiResponse, ApiError> {
        self.record("DeleteLayerVersion")?;

        // Accept either the bare name or the layer ARN, like the real API
        let name = layer_name.rsplit(':').next().unwrap_or(layer_name);
        let now_empty = match self.layers.get_mut(name) {
            Some(mut versions) => {
                versions.retain(|v| v.version != version);
                versions.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.layers.remove(name);
        }
        Ok(Self::ok(STATUS_NO_CONTENT))
    }

    async fn list_layers(
        &self,
        compatible_environment: Option<&str>,
    ) -> Result<Vec<LayerDescriptor>, ApiError> {
        self.record("ListLayers")?;

        let mut layers: Vec<LayerDescriptor> = self
            .layers
            .iter()
            .filter_map(|entry| {
                let latest = entry
                    .value()
                    .iter()
                    .filter(|v| {
                        compatible_environment.map_or(true, |env| {
                            v.compatible_environments.iter().any(|c| c == env)
                        })
                    })
                    .max_by_key(|v| v.version)?;
                Some(LayerDescriptor {
                    layer_name: entry.key().clone(),
                    layer_arn: self.layer_arn(entry.key()),
                    latest_version_arn: Some(latest.arn.clone()),
                })
            })
            .collect();
        layers.sort_by(|a, b| a.layer_name.cmp(&b.layer_name));
        Ok(layers)
    }

    async fn invoke(
        &self,
        function_name: &str,
        payload: Bytes,
        kind: InvocationKind,
    ) -> Result<InvokeResponse, ApiError> {
        self.record("Invoke")?;

        let payload: Value = serde_json::from_slice(&payload).map_err(|e| {
            ApiError::Unexpected {
                status: Some(400),
                raw: format!("InvalidRequestContentException: {e}"),
            }
        })?;
        let call_id = payload
            .get("call_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let status_override = {
            let mut faults = self.faults.lock();
            if let Some(call_id) = &call_id {
                if let Some(remaining) = faults.transport_failures.get_mut(call_id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(ApiError::Transport(format!(
                            "dispatch failure: connection reset invoking {function_name}"
                        )));
                    }
                }
                if faults.throttled_calls.contains(call_id) {
                    return Err(ApiError::Throttled(format!(
                        "{}: Rate Exceeded.",
                        ErrorCode::TooManyRequests.as_str()
                    )));
                }
            }
            call_id
                .as_ref()
                .and_then(|id| faults.status_overrides.get(id).copied())
        };

        if !self.functions.contains_key(function_name) {
            return Err(Self::not_found(
                "Function",
                &self.function_arn(function_name),
            ));
        }

        self.invocations.lock().push(RecordedInvocation {
            function_name: function_name.to_string(),
            kind,
            payload,
        });

        let output = match kind {
            InvocationKind::RequestResponse => self
                .responses
                .get(function_name)
                .map_or_else(|| json!({ "Execution": "Finished" }), |r| r.clone()),
            InvocationKind::Event => Value::Null,
        };
        let payload = if output.is_null() {
            Bytes::new()
        } else {
            Bytes::from(output.to_string())
        };

        Ok(InvokeResponse {
            status: status_override.unwrap_or_else(|| kind.success_status()),
            request_id: Some(Uuid::new_v4().to_string()),
            payload,
            function_error: None,
        })
    }
}
