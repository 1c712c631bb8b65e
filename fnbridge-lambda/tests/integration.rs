//! Integration tests for the runtime adapter
//!
//! These tests drive the full deploy / invoke / discovery / cleanup cycle
//! against the in-memory platform.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fnbridge_core::{BackendConfig, BackendError};
use fnbridge_lambda::api::CreateFunctionRequest;
use fnbridge_lambda::lifecycle::{DeployAction, RuntimeState};
use fnbridge_lambda::{
    ArtifactBuilder, EphemeralLambda, InvocationPayload, Invoker, LambdaApi, LifecycleManager,
    MetadataProber, Packager, RuntimeRegistry,
};
use serde_json::json;

const ROLE: &str = "arn:aws:iam::000000000000:role/fnbridge";

/// Packager returning fixed archives and counting how often each is built
#[derive(Default)]
struct CountingPackager {
    handler_builds: AtomicUsize,
    layer_builds: AtomicUsize,
}

#[async_trait]
impl Packager for CountingPackager {
    async fn handler_package(&self) -> Result<Bytes, BackendError> {
        self.handler_builds.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(b"handler"))
    }

    async fn dependency_layer(&self) -> Result<Bytes, BackendError> {
        self.layer_builds.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(b"layer"))
    }

    fn probe_package(&self) -> Result<Bytes, BackendError> {
        ArtifactBuilder::build_probe_package()
    }
}

/// Name of the transient metadata runtime for python3.9
const METADATA_RUNTIME: &str = "fnbridge-probe_v0-3-0_python3-9_192MB";

struct Harness {
    platform: Arc<EphemeralLambda>,
    packager: Arc<CountingPackager>,
    registry: Arc<RuntimeRegistry>,
    lifecycle: Arc<LifecycleManager>,
    invoker: Arc<Invoker>,
}

fn harness_in(region: &str) -> Harness {
    let platform = Arc::new(EphemeralLambda::with_region(region));
    let packager = Arc::new(CountingPackager::default());
    let config = Arc::new(BackendConfig::new(region, ROLE));
    let registry = Arc::new(RuntimeRegistry::new(platform.clone(), config));
    let lifecycle = Arc::new(LifecycleManager::new(registry.clone(), packager.clone()));
    let invoker = Arc::new(Invoker::new(registry.clone()));
    Harness {
        platform,
        packager,
        registry,
        lifecycle,
        invoker,
    }
}

fn harness() -> Harness {
    harness_in("us-east-1")
}

/// Deploy a function directly on the platform, bypassing the namer
async fn create_raw(platform: &EphemeralLambda, function_name: &str, memory_mb: u32) {
    platform
        .create_function(CreateFunctionRequest {
            function_name: function_name.to_string(),
            environment: "python3.9".to_string(),
            role: ROLE.to_string(),
            handler: "app.handler".to_string(),
            code: Bytes::new(),
            description: String::new(),
            timeout_secs: 60,
            memory_mb,
            layers: vec![],
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_ensure_runtime_creates_then_updates() {
    let h = harness();

    let first = h.lifecycle.ensure_runtime("python3.9", 512, None).await.unwrap();
    assert_eq!(first.action, DeployAction::Created);
    assert_eq!(first.state, RuntimeState::Ready);
    assert_eq!(first.resource_name, "fnbridge_v0-3-0_python3-9_512MB");

    let second = h.lifecycle.ensure_runtime("python3.9", 512, None).await.unwrap();
    assert_eq!(second.action, DeployAction::Updated);
    assert_eq!(second.state, RuntimeState::Ready);

    assert_eq!(h.platform.function_names(), vec!["fnbridge_v0-3-0_python3-9_512MB"]);
    assert_eq!(h.platform.call_count("UpdateFunctionCode"), 1);
    assert_eq!(h.platform.call_count("UpdateFunctionConfiguration"), 1);
}

#[tokio::test]
async fn test_dependencies_layer_is_built_once() {
    let h = harness();

    h.lifecycle.ensure_runtime("python3.9", 256, None).await.unwrap();
    h.lifecycle.ensure_runtime("python3.9", 1024, None).await.unwrap();
    h.lifecycle.ensure_runtime("python3.9", 256, None).await.unwrap();

    assert_eq!(h.packager.layer_builds.load(Ordering::SeqCst), 1);
    assert_eq!(h.platform.call_count("PublishLayerVersion"), 1);
    assert_eq!(h.platform.layer_version_count("fnbridge_v0-3-0_dependencies"), 1);
}

#[tokio::test]
async fn test_existing_layer_is_reused_without_packaging() {
    let h = harness();
    let arn = h
        .registry
        .create_layer("fnbridge_v0-3-0_dependencies", "python3.9", Bytes::from_static(b"zip"))
        .await
        .unwrap();

    let deployment = h.lifecycle.ensure_runtime("python3.9", 256, None).await.unwrap();

    assert_eq!(h.packager.layer_builds.load(Ordering::SeqCst), 0);
    assert_eq!(deployment.layers[0], arn);
}

#[tokio::test]
async fn test_supplied_code_skips_handler_build() {
    let h = harness();

    h.lifecycle
        .ensure_runtime("python3.9", 256, Some(Bytes::from_static(b"prebuilt")))
        .await
        .unwrap();

    assert_eq!(h.packager.handler_builds.load(Ordering::SeqCst), 0);
    let function = h.platform.function("fnbridge_v0-3-0_python3-9_256MB").unwrap();
    assert_eq!(function.code_size, b"prebuilt".len());
}

#[tokio::test]
async fn test_numerics_layer_attached_in_known_region() {
    let h = harness_in("eu-west-1");

    let deployment = h.lifecycle.ensure_runtime("python3.9", 256, None).await.unwrap();

    assert_eq!(deployment.layers.len(), 2);
    assert_eq!(
        deployment.layers[1],
        "arn:aws:lambda:eu-west-1:399891621064:layer:AWSLambda-Python39-SciPy1x:2"
    );
}

#[tokio::test]
async fn test_conflict_merges_previous_package_layers() {
    let h = harness();
    h.lifecycle.ensure_runtime("python3.9", 256, None).await.unwrap();

    // Dependencies of an older package version would shadow the current ones
    let stale = h
        .registry
        .create_layer("fnbridge_v0-2-0_dependencies", "python3.9", Bytes::from_static(b"old"))
        .await
        .unwrap();
    let extras = h
        .registry
        .create_layer("fnbridge_v0-3-0_extras", "python3.9", Bytes::from_static(b"extras"))
        .await
        .unwrap();
    // Not ours, never merged
    h.registry
        .create_layer("someone-else", "python3.9", Bytes::from_static(b"x"))
        .await
        .unwrap();

    let deployment = h.lifecycle.ensure_runtime("python3.9", 256, None).await.unwrap();

    assert_eq!(deployment.action, DeployAction::Updated);
    assert_eq!(deployment.layers.len(), 3);
    assert_eq!(deployment.layers[0], extras);
    assert!(deployment.layers[1].contains(":layer:fnbridge_v0-3-0_dependencies:"));
    assert!(deployment.layers[2].contains(":layer:AWSLambda-Python39-SciPy1x:"));
    assert!(!deployment.layers.contains(&stale));
    assert!(!deployment.layers.iter().any(|l| l.contains("someone-else")));

    let function = h.platform.function(&deployment.resource_name).unwrap();
    assert_eq!(function.layers, deployment.layers);
}

#[tokio::test]
async fn test_redeploy_converges_configuration() {
    let h = harness();
    let deployment = h.lifecycle.ensure_runtime("python3.9", 256, None).await.unwrap();

    h.registry
        .update_function_config(&deployment.identity, 30, vec![])
        .await
        .unwrap();
    h.lifecycle.ensure_runtime("python3.9", 256, None).await.unwrap();

    let function = h.platform.function(&deployment.resource_name).unwrap();
    assert_eq!(function.timeout_secs, 900);
    assert!(!function.layers.is_empty());
}

#[tokio::test]
async fn test_invalid_environment_is_rejected_before_any_call() {
    let h = harness();

    let result = h.lifecycle.ensure_runtime("python_3.9", 256, None).await;

    assert!(matches!(result, Err(BackendError::InvalidEnvironment(_))));
    assert_eq!(h.platform.call_count("CreateFunction"), 0);
}

#[tokio::test]
async fn test_delete_runtime_absorbs_not_found() {
    let h = harness();
    h.lifecycle.ensure_runtime("python3.9", 256, None).await.unwrap();

    h.lifecycle.delete_runtime("python3.9", 256).await.unwrap();
    h.lifecycle.delete_runtime("python3.9", 256).await.unwrap();

    assert!(h.platform.function_names().is_empty());
    assert_eq!(h.platform.call_count("DeleteFunction"), 2);
}

#[tokio::test]
async fn test_cleanup_sweep_survives_one_failure() {
    let h = harness();
    for memory in [128, 256, 512, 1024] {
        h.lifecycle.ensure_runtime("python3.9", memory, None).await.unwrap();
    }
    h.platform.fail_delete("fnbridge_v0-3-0_python3-9_512MB");

    let report = h.lifecycle.delete_all_runtimes().await.unwrap();

    assert_eq!(report.deleted.len(), 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "fnbridge_v0-3-0_python3-9_512MB");
    assert!(!report.is_clean());
    assert_eq!(h.platform.call_count("DeleteFunction"), 4);
    assert_eq!(h.platform.function_names(), vec!["fnbridge_v0-3-0_python3-9_512MB"]);
}

#[tokio::test]
async fn test_cleanup_sweep_ignores_foreign_functions() {
    let h = harness();
    h.lifecycle.ensure_runtime("python3.9", 256, None).await.unwrap();
    create_raw(&h.platform, "billing-worker", 128).await;

    let report = h.lifecycle.delete_all_runtimes().await.unwrap();

    assert_eq!(report.deleted.len(), 1);
    assert_eq!(h.platform.function_names(), vec!["billing-worker"]);
    assert_eq!(h.lifecycle.list_runtimes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cleanup_sweep_deletes_older_package_versions() {
    let h = harness();
    h.lifecycle.ensure_runtime("python3.9", 256, None).await.unwrap();
    create_raw(&h.platform, "fnbridge_v0-1-7_python3-8_1024MB", 1024).await;

    let report = h.lifecycle.delete_all_runtimes().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.deleted.len(), 2);
    assert!(report
        .deleted
        .contains(&"fnbridge_v0-1-7_python3-8_1024MB".to_string()));
    assert!(h.platform.function_names().is_empty());
}

#[tokio::test]
async fn test_cleanup_sweep_deletes_leftover_metadata_runtime() {
    let h = harness();
    create_raw(&h.platform, METADATA_RUNTIME, 192).await;
    create_raw(&h.platform, "fnbridge-other_v1-0-0_python3-9_192MB", 192).await;

    let report = h.lifecycle.delete_all_runtimes().await.unwrap();

    assert_eq!(report.deleted, vec![METADATA_RUNTIME.to_string()]);
    assert_eq!(
        h.platform.function_names(),
        vec!["fnbridge-other_v1-0-0_python3-9_192MB"]
    );
}

#[tokio::test]
async fn test_runtime_key() {
    let h = harness();

    let key = h.lifecycle.runtime_key("python3.9", 100).unwrap();

    assert_eq!(
        key.to_string(),
        "aws_lambda/us-east-1/us-east-1/fnbridge_v0-3-0_python3-9_128MB"
    );
}

#[tokio::test]
async fn test_invoke_before_deploy_names_runtime() {
    let h = harness();
    let identity = fnbridge_core::RuntimeIdentity::new("python3.9", 256).unwrap();

    let result = h
        .invoker
        .invoke_async(&identity, &InvocationPayload::new("e1", "c1"))
        .await;

    match result {
        Err(err @ BackendError::RuntimeNotDeployed { .. }) => {
            assert_eq!(err.to_string(), "Runtime python3.9 (256MB) not deployed");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_end_to_end_with_backpressure() {
    let h = harness();

    let deployment = h.lifecycle.ensure_runtime("py39", 512, None).await.unwrap();
    assert_eq!(deployment.state, RuntimeState::Ready);

    let first = h
        .invoker
        .invoke_async(&deployment.identity, &InvocationPayload::new("e1", "c1"))
        .await
        .unwrap();
    assert!(first.is_some_and(|id| !id.is_empty()));

    h.platform.throttle_call("c2");
    let a = InvocationPayload::new("e1", "c3");
    let b = InvocationPayload::new("e1", "c2");
    let (accepted, throttled) = tokio::join!(
        h.invoker.invoke_async(&deployment.identity, &a),
        h.invoker.invoke_async(&deployment.identity, &b),
    );

    assert!(accepted.unwrap().is_some());
    assert!(throttled.unwrap().is_none());
    assert_eq!(h.platform.call_count("Invoke"), 3);

    let payloads: Vec<_> = h.platform.invocations().into_iter().map(|i| i.payload).collect();
    assert!(payloads.contains(&json!({ "executor_id": "e1", "call_id": "c1" })));
    assert!(!payloads.contains(&json!({ "executor_id": "e1", "call_id": "c2" })));
}

#[tokio::test]
async fn test_metadata_discovery_reports_and_cleans_up() {
    let h = harness();
    let prober = MetadataProber::new(h.lifecycle.clone());
    h.platform.set_response(
        METADATA_RUNTIME,
        json!({
            "preinstalled": [["boto3", "1.18.55"], ["botocore", "1.21.55"]],
            "runtime_version": "3.9"
        }),
    );

    let report = prober.discover_runtime_metadata("python3.9").await.unwrap();

    assert_eq!(report.metadata.preinstalled.len(), 2);
    assert_eq!(report.metadata.runtime_version.as_deref(), Some("3.9"));
    assert!(report.cleanup.is_none());
    assert!(h.platform.function_names().is_empty());
    // Discovery never needs the dependencies layer
    assert_eq!(h.platform.call_count("PublishLayerVersion"), 0);
}

#[tokio::test]
async fn test_metadata_without_preinstalled_fails_and_cleans_up() {
    let h = harness();
    let prober = MetadataProber::new(h.lifecycle.clone());

    let result = prober.discover_runtime_metadata("python3.9").await;

    assert!(matches!(result, Err(BackendError::ProbeFailed { .. })));
    assert!(h.platform.function_names().is_empty());
}

#[tokio::test]
async fn test_metadata_cleanup_failure_does_not_mask_result() {
    let h = harness();
    let prober = MetadataProber::new(h.lifecycle.clone());
    h.platform.fail_delete(METADATA_RUNTIME);

    let result = prober.discover_runtime_metadata("python3.9").await;
    assert!(matches!(result, Err(BackendError::ProbeFailed { .. })));

    h.platform
        .set_response(METADATA_RUNTIME, json!({ "preinstalled": [] }));
    let report = prober.discover_runtime_metadata("python3.9").await.unwrap();
    assert!(report.metadata.preinstalled.is_empty());
    assert!(matches!(report.cleanup, Some(BackendError::RemoteApi { .. })));
}

#[tokio::test]
async fn test_metadata_discovery_spares_runtime_of_same_memory() {
    let h = harness();
    let prober = MetadataProber::new(h.lifecycle.clone());
    let user = h.lifecycle.ensure_runtime("python3.9", 150, None).await.unwrap();
    assert_eq!(user.resource_name, "fnbridge_v0-3-0_python3-9_192MB");
    h.platform
        .set_response(METADATA_RUNTIME, json!({ "preinstalled": [] }));

    let report = prober.discover_runtime_metadata("python3.9").await.unwrap();

    assert!(report.cleanup.is_none());
    assert_eq!(h.platform.function_names(), vec![user.resource_name.clone()]);
    let function = h.platform.function(&user.resource_name).unwrap();
    assert_eq!(function.code_size, b"handler".len());
    assert_eq!(function.layers, user.layers);
}

#[tokio::test]
async fn test_create_runtime_returns_metadata() {
    let h = harness();
    let prober = MetadataProber::new(h.lifecycle.clone());
    h.platform.set_response(
        METADATA_RUNTIME,
        json!({ "preinstalled": [["six", "1.16.0"]], "runtime_version": "3.9" }),
    );

    let created = prober.create_runtime("python3.9", 512, None).await.unwrap();

    assert_eq!(created.deployment.action, DeployAction::Created);
    assert_eq!(created.deployment.resource_name, "fnbridge_v0-3-0_python3-9_512MB");
    assert_eq!(
        created.report.metadata.preinstalled,
        vec![("six".to_string(), "1.16.0".to_string())]
    );
    assert_eq!(
        h.platform.function_names(),
        vec!["fnbridge_v0-3-0_python3-9_512MB"]
    );
}

#[tokio::test]
async fn test_create_runtime_stops_when_discovery_fails() {
    let h = harness();
    let prober = MetadataProber::new(h.lifecycle.clone());

    let result = prober.create_runtime("python3.9", 512, None).await;

    assert!(matches!(result, Err(BackendError::ProbeFailed { .. })));
    assert!(h.platform.function_names().is_empty());
    // Only the transient metadata runtime was ever created
    assert_eq!(h.platform.call_count("CreateFunction"), 1);
    assert_eq!(h.packager.handler_builds.load(Ordering::SeqCst), 0);
}
