//! Function platform adapter for fnbridge
//!
//! Deploys runtimes as functions, keeps them converged with the current
//! handler code and dependency layers, and dispatches tasks to them.

pub mod api;
pub mod artifact;
pub mod aws;
pub mod ephemeral;
pub mod invocation;
pub mod invoker;
pub mod lifecycle;
pub mod prober;
pub mod registry;

pub use api::{ApiError, LambdaApi};
pub use artifact::{ArtifactBuilder, Packager};
pub use aws::AwsLambdaApi;
pub use ephemeral::EphemeralLambda;
pub use invocation::{InvocationKind, InvocationPayload};
pub use invoker::Invoker;
pub use lifecycle::{Deployment, LifecycleManager, SweepReport};
pub use prober::{MetadataProber, ProbeReport, ProvisionedRuntime, RuntimeMetadata};
pub use registry::RuntimeRegistry;
