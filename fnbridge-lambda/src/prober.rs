//! Runtime metadata discovery
//!
//! Deploys a throwaway probe runtime, asks it what the environment has
//! preinstalled, and deletes it again whatever the outcome. Probe runtimes
//! are named under their own prefix, so a regular runtime of the same
//! memory size is never touched.

use fnbridge_core::limits::PROBE_MEMORY_MB;
use bytes::Bytes;
use fnbridge_core::{BackendError, RuntimeIdentity};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::invoker::Invoker;
use crate::lifecycle::{DeployRequest, Deployment, LayerPolicy, LifecycleManager};

/// What an environment provides before any layer is attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMetadata {
    /// `(name, version)` of every preinstalled distribution
    pub preinstalled: Vec<(String, String)>,
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug)]
pub struct ProbeReport {
    pub metadata: RuntimeMetadata,
    /// Set when the probe runtime could not be deleted afterwards
    pub cleanup: Option<BackendError>,
}

/// A runtime deployed together with the metadata of its environment
#[derive(Debug)]
pub struct ProvisionedRuntime {
    pub deployment: Deployment,
    pub report: ProbeReport,
}

pub struct MetadataProber {
    lifecycle: Arc<LifecycleManager>,
    probes: LifecycleManager,
    invoker: Invoker,
}

impl MetadataProber {
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        let registry = Arc::new(lifecycle.registry().for_probes());
        let probes = LifecycleManager::new(registry.clone(), lifecycle.packager().clone());
        Self {
            lifecycle,
            probes,
            invoker: Invoker::new(registry),
        }
    }

    /// Discover the environment's metadata, then create or converge the
    /// `(environment, memory)` runtime.
    pub async fn create_runtime(
        &self,
        environment: &str,
        memory_mb: u32,
        code: Option<Bytes>,
    ) -> Result<ProvisionedRuntime, BackendError> {
        let report = self.discover_runtime_metadata(environment).await?;
        let deployment = self
            .lifecycle
            .ensure_runtime(environment, memory_mb, code)
            .await?;
        Ok(ProvisionedRuntime { deployment, report })
    }

    pub async fn discover_runtime_metadata(
        &self,
        environment: &str,
    ) -> Result<ProbeReport, BackendError> {
        let identity = RuntimeIdentity::new(environment, PROBE_MEMORY_MB)?;
        let code = self.probes.packager().probe_package()?;

        info!(runtime = %identity, "Probing runtime metadata");
        let deployed = self
            .probes
            .deploy(DeployRequest {
                identity: identity.clone(),
                code: Some(code),
                timeout_secs: None,
                layers: LayerPolicy::Bare,
            })
            .await;

        let outcome = match deployed {
            Ok(_) => self
                .invoker
                .invoke_sync(&identity, &json!({ "probe": true }))
                .await
                .and_then(|output| parse_metadata(environment, output)),
            Err(e) => Err(e),
        };

        let cleanup = self.probes.delete_identity(&identity).await.err();
        if let Some(e) = &cleanup {
            warn!(runtime = %identity, error = %e, "Failed to delete probe runtime");
        }

        let metadata = outcome?;
        info!(
            runtime = %identity,
            preinstalled = metadata.preinstalled.len(),
            runtime_version = ?metadata.runtime_version,
            "Probed runtime metadata"
        );
        Ok(ProbeReport { metadata, cleanup })
    }
}

fn parse_metadata(environment: &str, output: Value) -> Result<RuntimeMetadata, BackendError> {
    let probe_failed = |reason: String| BackendError::ProbeFailed {
        environment: environment.to_string(),
        reason,
    };

    if output.get("preinstalled").is_none() {
        return Err(probe_failed(format!(
            "response has no preinstalled packages: {output}"
        )));
    }
    serde_json::from_value(output).map_err(|e| probe_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata() {
        let metadata = parse_metadata(
            "python3.9",
            json!({
                "preinstalled": [["boto3", "1.18.55"], ["six", "1.16.0"]],
                "runtime_version": "3.9"
            }),
        )
        .unwrap();
        assert_eq!(metadata.preinstalled[0], ("boto3".to_string(), "1.18.55".to_string()));
        assert_eq!(metadata.runtime_version.as_deref(), Some("3.9"));
    }

    #[test]
    fn test_missing_preinstalled_is_probe_failure() {
        let result = parse_metadata("python3.9", json!({ "Execution": "Finished" }));
        assert!(matches!(
            result,
            Err(BackendError::ProbeFailed { environment, .. }) if environment == "python3.9"
        ));
    }

    #[test]
    fn test_malformed_preinstalled_is_probe_failure() {
        let result = parse_metadata("python3.9", json!({ "preinstalled": "boto3" }));
        assert!(matches!(result, Err(BackendError::ProbeFailed { .. })));
    }
}
