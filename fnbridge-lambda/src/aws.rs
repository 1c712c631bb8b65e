//! [`LambdaApi`] backed by the AWS SDK

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_lambda::config::http::HttpResponse;
use aws_sdk_lambda::config::{Credentials, Region};
use aws_sdk_lambda::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_lambda::operation::RequestId;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{FunctionCode, InvocationType, LayerVersionContentInput, Runtime};
use aws_sdk_lambda::Client;
use bytes::Bytes;
use fnbridge_core::BackendConfig;
use tracing::debug;

use crate::api::{
    classify_service_error, ApiError, ApiResponse, CreateFunctionRequest, FunctionSummary,
    InvokeResponse, LambdaApi, LayerDescriptor, PublishLayerRequest, PublishedLayer,
    UpdateConfigRequest, STATUS_CREATED, STATUS_NO_CONTENT, STATUS_OK,
};
use crate::invocation::InvocationKind;

/// Platform client talking to the real control plane
#[derive(Debug, Clone)]
pub struct AwsLambdaApi {
    client: Client,
}

impl AwsLambdaApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the backend configuration.
    ///
    /// Static credentials are used when configured; otherwise the default
    /// provider chain is consulted.
    pub async fn from_config(config: &BackendConfig) -> Self {
        let region = Region::new(config.region.clone());

        let sdk_config = match (&config.access_key_id, &config.secret_access_key) {
            (Some(key_id), Some(secret)) => {
                let credentials = Credentials::new(
                    key_id,
                    secret,
                    config.session_token.clone(),
                    None,
                    "fnbridge",
                );
                let mut builder = aws_sdk_lambda::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(region)
                    .credentials_provider(credentials);
                if let Some(endpoint) = &config.endpoint_url {
                    builder = builder.endpoint_url(endpoint);
                }
                builder.build()
            }
            _ => {
                let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
                if let Some(endpoint) = &config.endpoint_url {
                    loader = loader.endpoint_url(endpoint);
                }
                aws_sdk_lambda::Config::new(&loader.load().await)
            }
        };

        Self::new(Client::from_conf(sdk_config))
    }
}

fn api_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let raw = format!("{operation}: {}", DisplayErrorContext(&err));
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => ApiError::Transport(raw),
        _ => {
            let status = err.raw_response().map(|r| r.status().as_u16());
            classify_service_error(status, err.code(), raw)
        }
    }
}

/// Response for a successful SDK call.
///
/// The SDK only returns an operation output for a 2xx answer and does not
/// expose the exact code, so each operation reports the status its API
/// documents. Any other answer arrives as an `SdkError` and goes through
/// [`api_error`]. `Invoke` is the exception: its output carries the real code.
fn response(status: u16, request_id: Option<&str>) -> ApiResponse {
    ApiResponse {
        status,
        request_id: request_id.map(str::to_string),
    }
}

fn blob(bytes: Bytes) -> Blob {
    Blob::new(bytes.to_vec())
}

#[async_trait]
impl LambdaApi for AwsLambdaApi {
    async fn create_function(
        &self,
        request: CreateFunctionRequest,
    ) -> Result<ApiResponse, ApiError> {
        let output = self
            .client
            .create_function()
            .function_name(&request.function_name)
            .runtime(Runtime::from(request.environment.as_str()))
            .role(&request.role)
            .handler(&request.handler)
            .code(FunctionCode::builder().zip_file(blob(request.code)).build())
            .description(&request.description)
            .timeout(i32::try_from(request.timeout_secs).unwrap_or(i32::MAX))
            .memory_size(i32::try_from(request.memory_mb).unwrap_or(i32::MAX))
            .set_layers(Some(request.layers))
            .send()
            .await
            .map_err(|e| api_error("CreateFunction", e))?;

        Ok(response(STATUS_CREATED, output.request_id()))
    }

    async fn update_function_code(
        &self,
        function_name: &str,
        code: Bytes,
    ) -> Result<ApiResponse, ApiError> {
        let output = self
            .client
            .update_function_code()
            .function_name(function_name)
            .zip_file(blob(code))
            .publish(false)
            .send()
            .await
            .map_err(|e| api_error("UpdateFunctionCode", e))?;

        Ok(response(STATUS_OK, output.request_id()))
    }

    async fn update_function_configuration(
        &self,
        request: UpdateConfigRequest,
    ) -> Result<ApiResponse, ApiError> {
        let output = self
            .client
            .update_function_configuration()
            .function_name(&request.function_name)
            .role(&request.role)
            .timeout(i32::try_from(request.timeout_secs).unwrap_or(i32::MAX))
            .memory_size(i32::try_from(request.memory_mb).unwrap_or(i32::MAX))
            .set_layers(Some(request.layers))
            .send()
            .await
            .map_err(|e| api_error("UpdateFunctionConfiguration", e))?;

        Ok(response(STATUS_OK, output.request_id()))
    }

    async fn delete_function(&self, function_name: &str) -> Result<ApiResponse, ApiError> {
        let output = self
            .client
            .delete_function()
            .function_name(function_name)
            .send()
            .await
            .map_err(|e| api_error("DeleteFunction", e))?;

        Ok(response(STATUS_NO_CONTENT, output.request_id()))
    }

    async fn list_functions(&self) -> Result<Vec<FunctionSummary>, ApiError> {
        let mut functions = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_functions()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| api_error("ListFunctions", e))?;

            functions.extend(output.functions().iter().filter_map(|f| {
                Some(FunctionSummary {
                    function_name: f.function_name()?.to_string(),
                    memory_mb: f
                        .memory_size()
                        .and_then(|m| u32::try_from(m).ok())
                        .unwrap_or_default(),
                })
            }));

            match output.next_marker() {
                Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
        }

        debug!(count = functions.len(), "Listed functions");
        Ok(functions)
    }

    async fn publish_layer_version(
        &self,
        request: PublishLayerRequest,
    ) -> Result<PublishedLayer, ApiError> {
        let runtimes = request
            .compatible_environments
            .iter()
            .map(|env| Runtime::from(env.as_str()))
            .collect();

        let output = self
            .client
            .publish_layer_version()
            .layer_name(&request.layer_name)
            .description(&request.description)
            .content(
                LayerVersionContentInput::builder()
                    .zip_file(blob(request.content))
                    .build(),
            )
            .set_compatible_runtimes(Some(runtimes))
            .send()
            .await
            .map_err(|e| api_error("PublishLayerVersion", e))?;

        let layer_version_arn = output
            .layer_version_arn()
            .ok_or_else(|| ApiError::Unexpected {
                status: Some(STATUS_CREATED),
                raw: format!("PublishLayerVersion returned no ARN: {output:?}"),
            })?
            .to_string();

        Ok(PublishedLayer {
            status: STATUS_CREATED,
            layer_version_arn,
            version: output.version(),
        })
    }

    async fn delete_layer_version(
        &self,
        layer_name: &str,
        version: i64,
    ) -> Result<ApiResponse, ApiError> {
        let output = self
            .client
            .delete_layer_version()
            .layer_name(layer_name)
            .version_number(version)
            .send()
            .await
            .map_err(|e| api_error("DeleteLayerVersion", e))?;

        Ok(response(STATUS_NO_CONTENT, output.request_id()))
    }

    async fn list_layers(
        &self,
        compatible_environment: Option<&str>,
    ) -> Result<Vec<LayerDescriptor>, ApiError> {
        let mut layers = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_layers()
                .set_compatible_runtime(compatible_environment.map(Runtime::from))
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| api_error("ListLayers", e))?;

            layers.extend(output.layers().iter().filter_map(|l| {
                Some(LayerDescriptor {
                    layer_name: l.layer_name()?.to_string(),
                    layer_arn: l.layer_arn()?.to_string(),
                    latest_version_arn: l
                        .latest_matching_version()
                        .and_then(|v| v.layer_version_arn())
                        .map(str::to_string),
                })
            }));

            match output.next_marker() {
                Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(layers)
    }

    async fn invoke(
        &self,
        function_name: &str,
        payload: Bytes,
        kind: InvocationKind,
    ) -> Result<InvokeResponse, ApiError> {
        let invocation_type = match kind {
            InvocationKind::RequestResponse => InvocationType::RequestResponse,
            InvocationKind::Event => InvocationType::Event,
        };

        let output = self
            .client
            .invoke()
            .function_name(function_name)
            .invocation_type(invocation_type)
            .payload(blob(payload))
            .send()
            .await
            .map_err(|e| api_error("Invoke", e))?;

        Ok(InvokeResponse {
            status: u16::try_from(output.status_code()).unwrap_or_default(),
            request_id: output.request_id().map(str::to_string),
            payload: output
                .payload()
                .map(|p| Bytes::copy_from_slice(p.as_ref()))
                .unwrap_or_default(),
            function_error: output.function_error().map(str::to_string),
        })
    }
}
