//! Runtime registry client
//!
//! Thin layer over [`LambdaApi`] that owns the naming rules, clamps timeouts,
//! validates the status of every mutating call and maps platform failures
//! onto [`BackendError`].

use bytes::Bytes;
use fnbridge_core::limits::clamp_timeout;
use fnbridge_core::{BackendConfig, BackendError, ResourceNamer, RuntimeIdentity};
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::{
    ApiError, ApiResponse, CreateFunctionRequest, FunctionSummary, LambdaApi, LayerDescriptor,
    PublishLayerRequest, UpdateConfigRequest, STATUS_CREATED, STATUS_NO_CONTENT, STATUS_OK,
};

/// Entry symbol of every package this adapter deploys
pub const HANDLER: &str = "__main__.main";

/// Convert a platform failure for `resource` into the backend taxonomy
pub(crate) fn backend_error(operation: &str, resource: &str, err: ApiError) -> BackendError {
    match err {
        ApiError::Conflict(_) => BackendError::Conflict(resource.to_string()),
        ApiError::NotFound(_) => BackendError::NotFound(resource.to_string()),
        ApiError::Unauthorized(raw) => BackendError::Unauthorized(raw),
        other => BackendError::remote(operation, other.status(), other.to_string()),
    }
}

fn expect_status(
    operation: &str,
    expected: &[u16],
    response: ApiResponse,
) -> Result<ApiResponse, BackendError> {
    if expected.contains(&response.status) {
        Ok(response)
    } else {
        Err(BackendError::remote(
            operation,
            Some(response.status),
            format!("{response:?}"),
        ))
    }
}

/// Layer version number encoded as the last component of a layer version ARN
fn layer_version_from_arn(layer_version_arn: &str) -> Option<i64> {
    layer_version_arn.rsplit(':').next()?.parse().ok()
}

/// Registry of deployed runtimes for one package version
pub struct RuntimeRegistry {
    api: Arc<dyn LambdaApi>,
    config: Arc<BackendConfig>,
    namer: ResourceNamer,
}

impl RuntimeRegistry {
    pub fn new(api: Arc<dyn LambdaApi>, config: Arc<BackendConfig>) -> Self {
        let namer = config.namer();
        Self { api, config, namer }
    }

    /// Registry over the same platform that names runtimes as probes
    pub fn for_probes(&self) -> Self {
        Self {
            api: self.api.clone(),
            config: self.config.clone(),
            namer: self.namer.for_probes(),
        }
    }

    pub fn namer(&self) -> &ResourceNamer {
        &self.namer
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub(crate) fn api(&self) -> &Arc<dyn LambdaApi> {
        &self.api
    }

    pub fn resource_name(&self, identity: &RuntimeIdentity) -> String {
        self.namer.encode(identity)
    }

    /// Create a function. Fails with [`BackendError::Conflict`] if it exists.
    pub async fn create_function(
        &self,
        identity: &RuntimeIdentity,
        code: Bytes,
        timeout_secs: u32,
        layers: Vec<String>,
    ) -> Result<(), BackendError> {
        let function_name = self.resource_name(identity);
        debug!(function_name = %function_name, layers = layers.len(), "Creating function");

        let response = self
            .api
            .create_function(CreateFunctionRequest {
                function_name: function_name.clone(),
                environment: identity.environment().to_string(),
                role: self.config.execution_role.clone(),
                handler: HANDLER.to_string(),
                code,
                description: self.config.package_label(),
                timeout_secs: clamp_timeout(timeout_secs),
                memory_mb: identity.memory_mb(),
                layers,
            })
            .await
            .map_err(|e| backend_error("CreateFunction", &function_name, e))?;
        expect_status("CreateFunction", &[STATUS_CREATED], response)?;

        info!(function_name = %function_name, "Created function");
        Ok(())
    }

    pub async fn update_function_code(
        &self,
        identity: &RuntimeIdentity,
        code: Bytes,
    ) -> Result<(), BackendError> {
        let function_name = self.resource_name(identity);

        let response = self
            .api
            .update_function_code(&function_name, code)
            .await
            .map_err(|e| backend_error("UpdateFunctionCode", &function_name, e))?;
        expect_status("UpdateFunctionCode", &[STATUS_OK, STATUS_CREATED], response)?;

        debug!(function_name = %function_name, "Updated function code");
        Ok(())
    }

    pub async fn update_function_config(
        &self,
        identity: &RuntimeIdentity,
        timeout_secs: u32,
        layers: Vec<String>,
    ) -> Result<(), BackendError> {
        let function_name = self.resource_name(identity);

        let response = self
            .api
            .update_function_configuration(UpdateConfigRequest {
                function_name: function_name.clone(),
                role: self.config.execution_role.clone(),
                timeout_secs: clamp_timeout(timeout_secs),
                memory_mb: identity.memory_mb(),
                layers,
            })
            .await
            .map_err(|e| backend_error("UpdateFunctionConfiguration", &function_name, e))?;
        expect_status("UpdateFunctionConfiguration", &[STATUS_OK, STATUS_CREATED], response)?;

        debug!(function_name = %function_name, "Updated function configuration");
        Ok(())
    }

    /// Delete a function. A missing function surfaces as [`BackendError::NotFound`].
    pub async fn delete_function(&self, identity: &RuntimeIdentity) -> Result<(), BackendError> {
        self.delete_function_named(&self.resource_name(identity)).await
    }

    /// Delete a function by its exact platform name, e.g. one listed from an
    /// older package version
    pub async fn delete_function_named(&self, function_name: &str) -> Result<(), BackendError> {
        let response = self
            .api
            .delete_function(function_name)
            .await
            .map_err(|e| backend_error("DeleteFunction", function_name, e))?;
        expect_status("DeleteFunction", &[STATUS_OK, STATUS_NO_CONTENT], response)?;

        info!(function_name = %function_name, "Deleted function");
        Ok(())
    }

    pub async fn list_functions(&self) -> Result<Vec<FunctionSummary>, BackendError> {
        self.api
            .list_functions()
            .await
            .map_err(|e| backend_error("ListFunctions", &self.config.region, e))
    }

    /// Publish a layer version and return its ARN
    pub async fn create_layer(
        &self,
        layer_name: &str,
        environment: &str,
        content: Bytes,
    ) -> Result<String, BackendError> {
        debug!(layer_name = %layer_name, size = content.len(), "Publishing layer");

        let published = self
            .api
            .publish_layer_version(PublishLayerRequest {
                layer_name: layer_name.to_string(),
                description: self.config.package_label(),
                content,
                compatible_environments: vec![environment.to_string()],
            })
            .await
            .map_err(|e| backend_error("PublishLayerVersion", layer_name, e))?;

        if published.status != STATUS_CREATED {
            return Err(BackendError::remote(
                "PublishLayerVersion",
                Some(published.status),
                format!("{published:?}"),
            ));
        }

        info!(layer = %published.layer_version_arn, "Published layer");
        Ok(published.layer_version_arn)
    }

    /// Delete a layer version. The version defaults to the one in the ARN.
    pub async fn delete_layer(
        &self,
        layer_version_arn: &str,
        version: Option<i64>,
    ) -> Result<(), BackendError> {
        let version = version
            .or_else(|| layer_version_from_arn(layer_version_arn))
            .ok_or_else(|| {
                BackendError::Config(format!(
                    "cannot infer the layer version from {layer_version_arn:?}"
                ))
            })?;

        // The API wants the layer name or ARN without the version suffix
        let layer = layer_version_arn
            .strip_suffix(&format!(":{version}"))
            .unwrap_or(layer_version_arn);

        let response = self
            .api
            .delete_layer_version(layer, version)
            .await
            .map_err(|e| backend_error("DeleteLayerVersion", layer_version_arn, e))?;
        expect_status("DeleteLayerVersion", &[STATUS_OK, STATUS_NO_CONTENT], response)?;

        debug!(layer = %layer, version, "Deleted layer version");
        Ok(())
    }

    pub async fn list_layers(
        &self,
        environment: Option<&str>,
    ) -> Result<Vec<LayerDescriptor>, BackendError> {
        debug!(environment = ?environment, "Listing layers");
        self.api
            .list_layers(environment)
            .await
            .map_err(|e| backend_error("ListLayers", environment.unwrap_or("*"), e))
    }
}
