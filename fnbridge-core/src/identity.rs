//! Runtime identities and resource naming
//!
//! A runtime is a deployed function keyed by `(environment, memory)`. The
//! platform only knows it by its resource name, which is derived from the
//! package prefix, the environment and the memory:
//!
//! ```text
//! fnbridge_v0-3-0_python3-9_512MB
//! ```
//!
//! Dots become dashes in the environment and the version, so `_` only ever
//! separates the three parts and the name can be decoded back losslessly.

use crate::error::BackendError;
use crate::limits::{clamp_memory, MAX_MEMORY_MB, MEMORY_INCREMENT_MB, MIN_MEMORY_MB};
use serde::Serialize;
use std::fmt;

/// Backend name used in storage-facing runtime keys
pub const BACKEND_NAME: &str = "aws_lambda";

/// A deployed runtime's identity: environment name plus effective memory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RuntimeIdentity {
    environment: String,
    memory_mb: u32,
}

impl RuntimeIdentity {
    /// Build an identity, clamping the memory to what the platform accepts
    pub fn new(environment: impl Into<String>, memory_mb: u32) -> Result<Self, BackendError> {
        let environment = environment.into();
        if !is_valid_environment(&environment) {
            return Err(BackendError::InvalidEnvironment(environment));
        }

        Ok(Self {
            environment,
            memory_mb: clamp_memory(memory_mb),
        })
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn memory_mb(&self) -> u32 {
        self.memory_mb
    }
}

impl fmt::Display for RuntimeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}MB)", self.environment, self.memory_mb)
    }
}

fn is_valid_environment(environment: &str) -> bool {
    !environment.is_empty()
        && environment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.')
}

fn is_valid_memory(memory_mb: u32) -> bool {
    (MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&memory_mb) && memory_mb % MEMORY_INCREMENT_MB == 0
}

/// Encodes and decodes platform resource names for one package version
#[derive(Debug, Clone)]
pub struct ResourceNamer {
    package_name: String,
    prefix: String,
}

impl ResourceNamer {
    pub fn new(package_name: impl Into<String>, package_version: &str) -> Self {
        let package_name = package_name.into();
        let prefix = format!("{}_v{}", package_name, package_version.replace(['.', '_'], "-"));
        Self {
            package_name,
            prefix,
        }
    }

    /// The versioned prefix, e.g. `fnbridge_v0-3-0`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn encode(&self, identity: &RuntimeIdentity) -> String {
        format!(
            "{}_{}_{}MB",
            self.prefix,
            identity.environment.replace('.', "-"),
            identity.memory_mb
        )
    }

    /// Decode a resource name created by any version of this package.
    ///
    /// Returns `None` for names this package did not produce.
    pub fn decode(&self, resource_name: &str) -> Option<RuntimeIdentity> {
        let mut parts = resource_name.rsplitn(3, '_');
        let memory = parts.next()?;
        let environment = parts.next()?;
        let prefix = parts.next()?;

        let version = prefix.strip_prefix(&self.package_name)?.strip_prefix("_v")?;
        if version.is_empty() || version.contains('_') {
            return None;
        }

        let memory_mb: u32 = memory.strip_suffix("MB")?.parse().ok()?;
        let environment = environment.replace('-', ".");
        if !is_valid_environment(&environment) || !is_valid_memory(memory_mb) {
            return None;
        }

        Some(RuntimeIdentity {
            environment,
            memory_mb,
        })
    }

    /// Namer for transient probe runtimes.
    ///
    /// Probe names use the `<package>-probe` prefix, so they never collide
    /// with a regular runtime of the same memory and are never decoded as one.
    pub fn for_probes(&self) -> Self {
        let version = &self.prefix[self.package_name.len()..];
        let package_name = format!("{}-probe", self.package_name);
        Self {
            prefix: format!("{package_name}{version}"),
            package_name,
        }
    }

    /// Name of the third-party dependencies layer for this package version
    pub fn layer_key(&self) -> String {
        format!("{}_dependencies", self.prefix)
    }

    /// Whether a layer was published by this package, any version
    pub fn owns_layer(&self, layer_name: &str) -> bool {
        layer_name
            .strip_prefix(&self.package_name)
            .is_some_and(|rest| rest.starts_with("_v"))
    }

    /// Dependencies layer published by another version of this package
    pub fn is_stale_dependencies(&self, layer_name: &str) -> bool {
        self.owns_layer(layer_name)
            && layer_name.ends_with("_dependencies")
            && layer_name != self.layer_key()
    }
}

/// Storage-facing key telling whether a runtime is installed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeKey {
    pub backend_name: String,
    pub region: String,
    pub resource_name: String,
}

impl RuntimeKey {
    pub fn new(region: impl Into<String>, resource_name: impl Into<String>) -> Self {
        Self {
            backend_name: BACKEND_NAME.to_string(),
            region: region.into(),
            resource_name: resource_name.into(),
        }
    }

    /// The four path components: backend, region, region, resource name
    pub fn components(&self) -> [&str; 4] {
        [
            &self.backend_name,
            &self.region,
            &self.region,
            &self.resource_name,
        ]
    }
}

impl fmt::Display for RuntimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components().join("/"))
    }
}
