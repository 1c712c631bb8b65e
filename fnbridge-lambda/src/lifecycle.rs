//! Runtime lifecycle management
//!
//! Deployment is not transactional on the platform, so the manager never
//! checks before creating. It always tries to create, and on a conflict it
//! converges the existing function to the desired code and configuration.
//! Concurrent deployers of the same runtime therefore end in the same state
//! without any client-side locking.
//!
//! ```text
//! Absent --create--> Creating --> Ready
//! Ready  --redeploy--> Updating --> Ready
//! Ready  --delete--> Deleting --> Absent
//! ```

use bytes::Bytes;
use fnbridge_core::limits::MAX_LAYERS;
use fnbridge_core::{BackendError, RuntimeIdentity, RuntimeKey};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::FunctionSummary;
use crate::artifact::Packager;
use crate::registry::RuntimeRegistry;

/// Lifecycle state of a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Absent,
    Creating,
    Ready,
    Updating,
    Deleting,
}

/// How a deployment reached `Ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    Created,
    /// The function already existed and was converged in place
    Updated,
}

/// Which layers a deployment attaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPolicy {
    /// Dependencies layer (reused or built) plus the numerics layer
    Resolve,
    /// No layers at all
    Bare,
}

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub identity: RuntimeIdentity,
    /// Package to deploy; the handler package is built when absent
    pub code: Option<Bytes>,
    pub timeout_secs: Option<u32>,
    pub layers: LayerPolicy,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub identity: RuntimeIdentity,
    pub resource_name: String,
    pub layers: Vec<String>,
    pub action: DeployAction,
    pub state: RuntimeState,
}

/// Outcome of deleting every runtime of the package, by function name
#[derive(Debug, Default)]
pub struct SweepReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, BackendError)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Account owning the public numerics (SciPy) layer in each region
fn numerics_layer_account(region: &str) -> Option<u64> {
    match region {
        "us-east-1" => Some(668_099_181_075),
        "us-east-2" => Some(259_788_987_135),
        "us-west-1" => Some(325_793_726_646),
        "us-west-2" => Some(420_165_488_524),
        "eu-central-1" => Some(292_169_987_271),
        "eu-west-1" => Some(399_891_621_064),
        "eu-west-2" => Some(142_628_438_157),
        "eu-west-3" => Some(959_311_844_005),
        "eu-north-1" => Some(642_425_348_156),
        _ => None,
    }
}

/// ARN of the pre-built numerics layer for a Python environment, if one exists
pub fn numerics_layer_arn(region: &str, environment: &str) -> Option<String> {
    let version = environment.strip_prefix("python")?;
    let account = numerics_layer_account(region)?;
    Some(format!(
        "arn:aws:lambda:{region}:{account}:layer:AWSLambda-Python{}-SciPy1x:2",
        version.replace('.', "")
    ))
}

/// Layer name inside `arn:aws:lambda:<region>:<account>:layer:<name>:<version>`
fn layer_name_from_arn(arn: &str) -> &str {
    arn.split(':').nth(6).unwrap_or(arn)
}

/// Merge previously attached layers with freshly resolved ones.
///
/// The platform applies layers in order and later layers shadow earlier
/// ones, so resolved layers go last. A previous layer sharing a name with a
/// resolved one is dropped, and previous layers are the first to go when the
/// total exceeds [`MAX_LAYERS`].
fn merge_layers(resolved: Vec<String>, previous: Vec<String>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for arn in previous {
        let name = layer_name_from_arn(&arn);
        if resolved
            .iter()
            .chain(&merged)
            .all(|m| layer_name_from_arn(m) != name)
        {
            merged.push(arn);
        }
    }

    let room = MAX_LAYERS.saturating_sub(resolved.len());
    if merged.len() > room {
        warn!(
            layers = merged.len() + resolved.len(),
            dropped = ?&merged[room..],
            "Too many layers, dropping previous layers beyond {}",
            MAX_LAYERS
        );
        merged.truncate(room);
    }
    merged.extend(resolved);
    merged
}

pub struct LifecycleManager {
    registry: Arc<RuntimeRegistry>,
    packager: Arc<dyn Packager>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<RuntimeRegistry>, packager: Arc<dyn Packager>) -> Self {
        Self { registry, packager }
    }

    pub fn registry(&self) -> &Arc<RuntimeRegistry> {
        &self.registry
    }

    pub fn packager(&self) -> &Arc<dyn Packager> {
        &self.packager
    }

    /// Make the `(environment, memory)` runtime exist with the current
    /// handler code and configuration.
    pub async fn ensure_runtime(
        &self,
        environment: &str,
        memory_mb: u32,
        code: Option<Bytes>,
    ) -> Result<Deployment, BackendError> {
        let identity = RuntimeIdentity::new(environment, memory_mb)?;
        self.deploy(DeployRequest {
            identity,
            code,
            timeout_secs: None,
            layers: LayerPolicy::Resolve,
        })
        .await
    }

    pub async fn deploy(&self, request: DeployRequest) -> Result<Deployment, BackendError> {
        let DeployRequest {
            identity,
            code,
            timeout_secs,
            layers,
        } = request;
        let resource_name = self.registry.resource_name(&identity);
        let timeout_secs = timeout_secs.unwrap_or(self.registry.config().runtime_timeout);

        let code = match code {
            Some(code) => code,
            None => self.packager.handler_package().await?,
        };
        let resolved = match layers {
            LayerPolicy::Resolve => self.resolve_layers(identity.environment()).await?,
            LayerPolicy::Bare => Vec::new(),
        };

        debug!(
            function_name = %resource_name,
            state = ?RuntimeState::Creating,
            "Deploying runtime"
        );
        let created = self
            .registry
            .create_function(&identity, code.clone(), timeout_secs, resolved.clone())
            .await;

        let (action, layers) = match created {
            Ok(()) => (DeployAction::Created, resolved),
            Err(BackendError::Conflict(_)) => {
                info!(
                    function_name = %resource_name,
                    state = ?RuntimeState::Updating,
                    "Runtime already exists, converging in place"
                );
                let layers = match layers {
                    LayerPolicy::Resolve => {
                        let previous = self.previous_layers(identity.environment()).await?;
                        merge_layers(resolved, previous)
                    }
                    LayerPolicy::Bare => resolved,
                };
                self.registry.update_function_code(&identity, code).await?;
                self.registry
                    .update_function_config(&identity, timeout_secs, layers.clone())
                    .await?;
                (DeployAction::Updated, layers)
            }
            Err(e) => return Err(e),
        };

        info!(
            function_name = %resource_name,
            action = ?action,
            state = ?RuntimeState::Ready,
            "Runtime ready"
        );
        Ok(Deployment {
            identity,
            resource_name,
            layers,
            action,
            state: RuntimeState::Ready,
        })
    }

    /// Dependencies layer followed by the numerics layer when one exists
    pub async fn resolve_layers(&self, environment: &str) -> Result<Vec<String>, BackendError> {
        let mut layers = vec![self.dependencies_layer(environment).await?];
        if let Some(arn) = numerics_layer_arn(&self.registry.config().region, environment) {
            layers.push(arn);
        }
        Ok(layers)
    }

    /// Reuse this package version's dependencies layer, or build and publish it
    async fn dependencies_layer(&self, environment: &str) -> Result<String, BackendError> {
        let layer_key = self.registry.namer().layer_key();

        let existing = self
            .registry
            .list_layers(Some(environment))
            .await?
            .into_iter()
            .filter(|l| l.layer_name == layer_key)
            .find_map(|l| l.latest_version_arn);
        if let Some(arn) = existing {
            debug!(layer = %arn, "Reusing dependencies layer");
            return Ok(arn);
        }

        info!(layer_name = %layer_key, environment, "Building dependencies layer");
        let content = self.packager.dependency_layer().await?;
        self.registry
            .create_layer(&layer_key, environment, content)
            .await
    }

    /// Layers this package published earlier for the environment, except
    /// dependencies layers of other package versions
    async fn previous_layers(&self, environment: &str) -> Result<Vec<String>, BackendError> {
        let namer = self.registry.namer();
        Ok(self
            .registry
            .list_layers(Some(environment))
            .await?
            .into_iter()
            .filter(|l| namer.owns_layer(&l.layer_name))
            .filter(|l| !namer.is_stale_dependencies(&l.layer_name))
            .filter_map(|l| l.latest_version_arn)
            .collect())
    }

    /// Delete one runtime. A runtime that is already gone counts as deleted.
    pub async fn delete_runtime(
        &self,
        environment: &str,
        memory_mb: u32,
    ) -> Result<(), BackendError> {
        let identity = RuntimeIdentity::new(environment, memory_mb)?;
        self.delete_identity(&identity).await
    }

    pub(crate) async fn delete_identity(
        &self,
        identity: &RuntimeIdentity,
    ) -> Result<(), BackendError> {
        self.delete_named(&self.registry.resource_name(identity)).await
    }

    async fn delete_named(&self, function_name: &str) -> Result<(), BackendError> {
        debug!(function_name, state = ?RuntimeState::Deleting, "Deleting runtime");
        match self.registry.delete_function_named(function_name).await {
            Ok(()) => Ok(()),
            Err(BackendError::NotFound(name)) => {
                debug!(function_name = %name, "Runtime already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Delete every runtime created by any version of this package,
    /// including metadata runtimes left behind by an interrupted discovery.
    ///
    /// Functions are deleted under the name they were listed with. Each
    /// deletion is independent: a failure is recorded in the report and the
    /// sweep continues.
    pub async fn delete_all_runtimes(&self) -> Result<SweepReport, BackendError> {
        let namer = self.registry.namer();
        let transient = namer.for_probes();
        let targets: Vec<String> = self
            .registry
            .list_functions()
            .await?
            .into_iter()
            .map(|f| f.function_name)
            .filter(|name| namer.decode(name).is_some() || transient.decode(name).is_some())
            .collect();

        info!(count = targets.len(), "Deleting all runtimes");
        let mut report = SweepReport::default();
        for function_name in targets {
            match self.delete_named(&function_name).await {
                Ok(()) => report.deleted.push(function_name),
                Err(e) => {
                    warn!(function_name = %function_name, error = %e, "Failed to delete runtime");
                    report.failed.push((function_name, e));
                }
            }
        }
        Ok(report)
    }

    /// Every function in the region as `(function name, memory)`
    pub async fn list_runtimes(&self) -> Result<Vec<FunctionSummary>, BackendError> {
        self.registry.list_functions().await
    }

    /// Storage-facing key for a runtime
    pub fn runtime_key(
        &self,
        environment: &str,
        memory_mb: u32,
    ) -> Result<RuntimeKey, BackendError> {
        let identity = RuntimeIdentity::new(environment, memory_mb)?;
        Ok(self
            .registry
            .config()
            .runtime_key(self.registry.resource_name(&identity)))
    }
}
