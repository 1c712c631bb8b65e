//! Backend configuration
//!
//! Built once (usually by the CLI from a file plus environment) and shared
//! read-only by every component.

use crate::error::BackendError;
use crate::identity::{ResourceNamer, RuntimeKey};
use crate::limits::{clamp_memory, clamp_timeout, DEFAULT_MEMORY_MB, DEFAULT_TIMEOUT_SECS};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub region: String,

    /// Role the deployed functions execute as
    pub execution_role: String,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    #[serde(default)]
    pub session_token: Option<String>,

    /// Override the control-plane endpoint (local emulators)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    #[serde(default = "default_package_name")]
    pub package_name: String,

    #[serde(default = "default_package_version")]
    pub package_version: String,

    /// Environment used when the caller does not name one
    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default = "default_memory")]
    pub runtime_memory: u32,

    #[serde(default = "default_timeout")]
    pub runtime_timeout: u32,

    #[serde(default)]
    pub artifacts: ArtifactConfig,
}

/// Where the deployment artifacts are assembled from
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    /// Source tree shipped inside the handler package
    #[serde(default = "default_handler_source")]
    pub handler_source_dir: PathBuf,

    /// File placed at the archive root as the platform's main module
    #[serde(default = "default_entry_point")]
    pub entry_point: PathBuf,

    /// `package==version` manifest for the dependencies layer
    #[serde(default = "default_requirements")]
    pub requirements: PathBuf,

    /// Installer invocation; the target directory and packages are appended
    #[serde(default = "default_installer")]
    pub installer: Vec<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            handler_source_dir: default_handler_source(),
            entry_point: default_entry_point(),
            requirements: default_requirements(),
            installer: default_installer(),
        }
    }
}

fn default_package_name() -> String {
    "fnbridge".to_string()
}

fn default_package_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_runtime() -> String {
    "python3.9".to_string()
}

fn default_memory() -> u32 {
    DEFAULT_MEMORY_MB
}

fn default_timeout() -> u32 {
    DEFAULT_TIMEOUT_SECS
}

fn default_handler_source() -> PathBuf {
    PathBuf::from("handler")
}

fn default_entry_point() -> PathBuf {
    PathBuf::from("handler/entry_point.py")
}

fn default_requirements() -> PathBuf {
    PathBuf::from("handler/requirements.txt")
}

fn default_installer() -> Vec<String> {
    vec![
        "python3".to_string(),
        "-m".to_string(),
        "pip".to_string(),
        "install".to_string(),
    ]
}

impl BackendConfig {
    /// Minimal configuration for a region and role, everything else defaulted
    pub fn new(region: impl Into<String>, execution_role: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            execution_role: execution_role.into(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            endpoint_url: None,
            package_name: default_package_name(),
            package_version: default_package_version(),
            runtime: default_runtime(),
            runtime_memory: default_memory(),
            runtime_timeout: default_timeout(),
            artifacts: ArtifactConfig::default(),
        }
    }

    /// Check required values and normalize memory/timeout to platform limits
    pub fn validate(mut self) -> Result<Self, BackendError> {
        if self.region.trim().is_empty() {
            return Err(BackendError::Config("'region' is mandatory".to_string()));
        }
        if self.execution_role.trim().is_empty() {
            return Err(BackendError::Config(
                "'execution_role' is mandatory".to_string(),
            ));
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(BackendError::Config(
                "'access_key_id' and 'secret_access_key' must be set together".to_string(),
            ));
        }
        if self.package_name.is_empty() || self.package_name.contains('_') {
            return Err(BackendError::Config(format!(
                "invalid package name {:?}",
                self.package_name
            )));
        }

        self.runtime_memory = clamp_memory(self.runtime_memory);
        self.runtime_timeout = clamp_timeout(self.runtime_timeout);
        Ok(self)
    }

    pub fn namer(&self) -> ResourceNamer {
        ResourceNamer::new(&self.package_name, &self.package_version)
    }

    /// Human readable package label used as function/layer description
    pub fn package_label(&self) -> String {
        format!("{}_v{}", self.package_name, self.package_version)
    }

    pub fn runtime_key(&self, resource_name: impl Into<String>) -> RuntimeKey {
        RuntimeKey::new(&self.region, resource_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let config: BackendConfig = serde_json::from_value(serde_json::json!({
            "region": "eu-west-1",
            "execution_role": "arn:aws:iam::123456789012:role/fnbridge"
        }))
        .unwrap();

        assert_eq!(config.runtime_memory, 256);
        assert_eq!(config.runtime_timeout, 900);
        assert_eq!(config.runtime, "python3.9");
        assert_eq!(config.package_name, "fnbridge");
        assert_eq!(config.artifacts.installer[0], "python3");
    }

    #[test]
    fn test_validate_normalizes_limits() {
        let mut config = BackendConfig::new("us-east-1", "role");
        config.runtime_memory = 1000;
        config.runtime_timeout = 1200;

        let config = config.validate().unwrap();
        assert_eq!(config.runtime_memory, 1024);
        assert_eq!(config.runtime_timeout, 900);
    }

    #[test]
    fn test_validate_requires_role() {
        let config = BackendConfig::new("us-east-1", "");
        assert!(matches!(config.validate(), Err(BackendError::Config(_))));
    }

    #[test]
    fn test_validate_requires_paired_credentials() {
        let mut config = BackendConfig::new("us-east-1", "role");
        config.access_key_id = Some("AKIA".to_string());
        assert!(matches!(config.validate(), Err(BackendError::Config(_))));
    }

    #[test]
    fn test_runtime_key_uses_region() {
        let config = BackendConfig::new("eu-north-1", "role");
        let key = config.runtime_key("fnbridge_v1_python3-9_256MB");
        assert_eq!(key.region, "eu-north-1");
        assert_eq!(key.backend_name, "aws_lambda");
    }
}
