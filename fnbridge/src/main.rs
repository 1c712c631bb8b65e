//! fnbridge - serverless runtime adapter
//!
//! Deploys execution environments as platform functions and dispatches
//! tasks to them.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fnbridge_core::BackendConfig;
use fnbridge_lambda::{
    ArtifactBuilder, AwsLambdaApi, InvocationPayload, Invoker, LifecycleManager, MetadataProber,
    RuntimeRegistry,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fnbridge")]
#[command(about = "Serverless runtime adapter", long_about = None)]
struct Args {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "fnbridge", env = "FNBRIDGE_CONFIG")]
    config: String,

    /// Platform region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Role deployed functions execute as
    #[arg(long, global = true)]
    execution_role: Option<String>,

    /// Control-plane endpoint override
    #[arg(long, global = true)]
    endpoint_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "FNBRIDGE_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct RuntimeArgs {
    /// Environment name, defaults to the configured runtime
    #[arg(short, long)]
    runtime: Option<String>,

    /// Memory in MB, defaults to the configured runtime memory
    #[arg(short, long)]
    memory: Option<u32>,
}

impl RuntimeArgs {
    fn resolve(&self, config: &BackendConfig) -> (String, u32) {
        (
            self.runtime.clone().unwrap_or_else(|| config.runtime.clone()),
            self.memory.unwrap_or(config.runtime_memory),
        )
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or update a runtime
    Deploy {
        #[command(flatten)]
        runtime: RuntimeArgs,
        /// Discover the environment's preinstalled packages first and print them
        #[arg(long)]
        metadata: bool,
    },
    /// Delete a runtime
    Delete(RuntimeArgs),
    /// Delete every runtime of this package
    Clean,
    /// List functions in the region
    List,
    /// Invoke a runtime
    Invoke {
        #[command(flatten)]
        runtime: RuntimeArgs,
        #[arg(long, default_value = "cli")]
        executor_id: String,
        #[arg(long)]
        call_id: String,
        /// Extra payload keys as a JSON object
        #[arg(long)]
        data: Option<String>,
        /// Wait for the output instead of queueing
        #[arg(long)]
        sync: bool,
    },
    /// Report what an environment has preinstalled
    Probe {
        #[arg(short, long)]
        runtime: Option<String>,
    },
    /// Print the storage key of a runtime
    Key(RuntimeArgs),
    /// Delete a layer version
    DeleteLayer {
        arn: String,
        #[arg(long)]
        version: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "fnbridge={0},fnbridge_lambda={0},fnbridge_core={0}",
                    args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let overrides = config::Overrides {
        region: args.region.clone(),
        execution_role: args.execution_role.clone(),
        endpoint_url: args.endpoint_url.clone(),
    };
    let config = Arc::new(
        config::load(&args.config, &overrides).context("loading configuration")?,
    );
    info!(
        region = %config.region,
        package = %config.package_label(),
        "Starting fnbridge"
    );

    let api = Arc::new(AwsLambdaApi::from_config(&config).await);
    let registry = Arc::new(RuntimeRegistry::new(api, config.clone()));
    let packager = Arc::new(ArtifactBuilder::new(
        config.artifacts.clone(),
        config.package_name.clone(),
    ));
    let lifecycle = Arc::new(LifecycleManager::new(registry.clone(), packager));
    let invoker = Arc::new(Invoker::new(registry.clone()));

    match args.command {
        Command::Deploy { runtime, metadata } => {
            let (environment, memory) = runtime.resolve(&config);
            let deployment = if metadata {
                let created = MetadataProber::new(lifecycle)
                    .create_runtime(&environment, memory, None)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&created.report.metadata)?);
                if let Some(err) = created.report.cleanup {
                    tracing::warn!(error = %err, "Metadata runtime left behind");
                }
                created.deployment
            } else {
                lifecycle.ensure_runtime(&environment, memory, None).await?
            };
            println!(
                "{} {:?} layers={:?}",
                deployment.resource_name, deployment.action, deployment.layers
            );
        }
        Command::Delete(runtime) => {
            let (environment, memory) = runtime.resolve(&config);
            lifecycle.delete_runtime(&environment, memory).await?;
        }
        Command::Clean => {
            let report = lifecycle.delete_all_runtimes().await?;
            for function_name in &report.deleted {
                println!("deleted {function_name}");
            }
            for (function_name, err) in &report.failed {
                println!("failed {function_name}: {err}");
            }
            if !report.is_clean() {
                anyhow::bail!("{} runtime(s) could not be deleted", report.failed.len());
            }
        }
        Command::List => {
            for function in lifecycle.list_runtimes().await? {
                println!("{}\t{}MB", function.function_name, function.memory_mb);
            }
        }
        Command::Invoke {
            runtime,
            executor_id,
            call_id,
            data,
            sync,
        } => {
            let (environment, memory) = runtime.resolve(&config);
            let identity = fnbridge_core::RuntimeIdentity::new(environment, memory)?;
            let extra: Map<String, Value> = match data {
                Some(data) => {
                    serde_json::from_str(&data).context("--data must be a JSON object")?
                }
                None => Map::new(),
            };
            let mut payload = InvocationPayload::new(executor_id, call_id);
            payload.extra = extra;

            if sync {
                let output = invoker
                    .invoke_sync(&identity, &serde_json::to_value(&payload)?)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                match invoker.invoke_async(&identity, &payload).await? {
                    Some(request_id) => println!("{request_id}"),
                    None => anyhow::bail!("invocation was not scheduled, retry later"),
                }
            }
        }
        Command::Probe { runtime } => {
            let environment = runtime.unwrap_or_else(|| config.runtime.clone());
            let prober = MetadataProber::new(lifecycle);
            let report = prober.discover_runtime_metadata(&environment).await?;
            println!("{}", serde_json::to_string_pretty(&report.metadata)?);
            if let Some(err) = report.cleanup {
                tracing::warn!(error = %err, "Probe runtime left behind");
            }
        }
        Command::Key(runtime) => {
            let (environment, memory) = runtime.resolve(&config);
            println!("{}", lifecycle.runtime_key(&environment, memory)?);
        }
        Command::DeleteLayer { arn, version } => {
            registry.delete_layer(&arn, version).await?;
        }
    }

    Ok(())
}
