//! Configuration loading

use fnbridge_core::BackendConfig;

/// Values given on the command line, applied over file and environment
#[derive(Debug, Default)]
pub struct Overrides {
    pub region: Option<String>,
    pub execution_role: Option<String>,
    pub endpoint_url: Option<String>,
}

/// Load configuration from file and environment.
///
/// `FNBRIDGE_*` variables override the file; nested keys use `__`, e.g.
/// `FNBRIDGE_ARTIFACTS__REQUIREMENTS`.
pub fn load(path: &str, overrides: &Overrides) -> anyhow::Result<BackendConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("FNBRIDGE")
                .prefix_separator("_")
                .separator("__"),
        )
        .set_override_option("region", overrides.region.clone())?
        .set_override_option("execution_role", overrides.execution_role.clone())?
        .set_override_option("endpoint_url", overrides.endpoint_url.clone())?
        .build()?;

    let config: BackendConfig = settings.try_deserialize()?;
    Ok(config.validate()?)
}
