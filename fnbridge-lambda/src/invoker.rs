//! Task invocation
//!
//! The async path returns as soon as the platform accepts the invocation.
//! A `None` result means "not scheduled": the caller should re-enqueue the
//! task. Rate limiting returns `None` straight away, while a transport
//! failure is retried once before giving up.

use fnbridge_core::{BackendError, RuntimeIdentity};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{ApiError, STATUS_ACCEPTED, STATUS_OK};
use crate::invocation::{InvocationKind, InvocationPayload};
use crate::registry::{backend_error, RuntimeRegistry};

/// Extra attempts made after a transport failure on the async path
const TRANSPORT_RETRIES: usize = 1;

pub struct Invoker {
    registry: Arc<RuntimeRegistry>,
}

impl Invoker {
    pub fn new(registry: Arc<RuntimeRegistry>) -> Self {
        Self { registry }
    }

    /// Submit a task for asynchronous execution.
    ///
    /// Returns the platform request id once the invocation is accepted, or
    /// `None` when it could not be scheduled.
    pub async fn invoke_async(
        &self,
        identity: &RuntimeIdentity,
        payload: &InvocationPayload,
    ) -> Result<Option<String>, BackendError> {
        let function_name = self.registry.resource_name(identity);
        let body = payload
            .to_bytes()
            .map_err(|e| BackendError::decode("invocation payload", e))?;

        for attempt in 0..=TRANSPORT_RETRIES {
            let start = Instant::now();
            let result = self
                .registry
                .api()
                .invoke(&function_name, body.clone(), InvocationKind::Event)
                .await;
            let roundtrip = start.elapsed().as_secs_f64();

            match result {
                Ok(response) if response.status == STATUS_ACCEPTED => {
                    info!(
                        executor_id = %payload.executor_id,
                        call_id = %payload.call_id,
                        request_id = ?response.request_id,
                        roundtrip = %format!("{roundtrip:.3}s"),
                        "Invocation accepted"
                    );
                    // An accepted call without a request id is still scheduled
                    return Ok(Some(response.request_id.unwrap_or_default()));
                }
                Ok(response) => {
                    return Err(BackendError::remote(
                        "Invoke",
                        Some(response.status),
                        format!("{response:?}"),
                    ));
                }
                Err(ApiError::Throttled(raw)) => {
                    debug!(
                        executor_id = %payload.executor_id,
                        call_id = %payload.call_id,
                        raw = %raw,
                        "Invocation throttled"
                    );
                    return Ok(None);
                }
                Err(ApiError::NotFound(_)) => {
                    return Err(BackendError::RuntimeNotDeployed {
                        environment: identity.environment().to_string(),
                        memory_mb: identity.memory_mb(),
                    });
                }
                Err(ApiError::Transport(raw)) if attempt < TRANSPORT_RETRIES => {
                    warn!(
                        executor_id = %payload.executor_id,
                        call_id = %payload.call_id,
                        error = %raw,
                        "Transport failure, retrying invocation"
                    );
                }
                Err(ApiError::Transport(raw)) => {
                    warn!(
                        executor_id = %payload.executor_id,
                        call_id = %payload.call_id,
                        error = %raw,
                        "Invocation could not be scheduled"
                    );
                    return Ok(None);
                }
                Err(e) => return Err(backend_error("Invoke", &function_name, e)),
            }
        }

        Ok(None)
    }

    /// Invoke a runtime and wait for its decoded output. Never retried.
    pub async fn invoke_sync(
        &self,
        identity: &RuntimeIdentity,
        payload: &Value,
    ) -> Result<Value, BackendError> {
        let function_name = self.registry.resource_name(identity);
        let body = serde_json::to_vec(payload)
            .map_err(|e| BackendError::decode("invocation payload", e))?;

        let start = Instant::now();
        let response = self
            .registry
            .api()
            .invoke(&function_name, body.into(), InvocationKind::RequestResponse)
            .await
            .map_err(|e| match e {
                ApiError::NotFound(_) => BackendError::RuntimeNotDeployed {
                    environment: identity.environment().to_string(),
                    memory_mb: identity.memory_mb(),
                },
                other => backend_error("Invoke", &function_name, other),
            })?;
        debug!(
            function_name = %function_name,
            roundtrip = %format!("{:.3}s", start.elapsed().as_secs_f64()),
            "Synchronous invocation returned"
        );

        if response.status != STATUS_OK || response.function_error.is_some() {
            return Err(BackendError::remote(
                "Invoke",
                Some(response.status),
                format!(
                    "{}: {}",
                    response.function_error.as_deref().unwrap_or("unexpected status"),
                    String::from_utf8_lossy(&response.payload)
                ),
            ));
        }

        serde_json::from_slice(&response.payload)
            .map_err(|e| BackendError::decode(format!("output of {function_name}"), e))
    }
}
