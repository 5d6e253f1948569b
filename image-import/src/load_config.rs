/// `load_config` module: loads a static YAML config, injects secrets from the environment,
/// and validates the result into the core's typed [`ImportConfig`].
///
/// This module is the only place where untrusted YAML is parsed.
///
/// # Responsibilities
/// - Parse the user-supplied YAML file into [`ImportSettings`] plus connection options
/// - Inject credentials from the environment (`UCLOUD_PUBLIC_KEY`, `UCLOUD_PRIVATE_KEY`)
///   and fill region/project from `UCLOUD_REGION` / `UCLOUD_PROJECT_ID` when the file
///   leaves them empty
/// - Report every validation problem at once
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{Context, Result};
use image_import_core::config::{ImportConfig, ImportSettings};
use image_import_core::redact::Redacted;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const DEFAULT_BASE_URL: &str = "https://api.ucloud.cn";
pub const DEFAULT_UFILE_SCHEME: &str = "http";

pub const ENV_PUBLIC_KEY: &str = "UCLOUD_PUBLIC_KEY";
pub const ENV_PRIVATE_KEY: &str = "UCLOUD_PRIVATE_KEY";
pub const ENV_REGION: &str = "UCLOUD_REGION";
pub const ENV_PROJECT_ID: &str = "UCLOUD_PROJECT_ID";

/// Credentials and endpoints for the UCloud client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessConfig {
    pub public_key: String,
    pub private_key: String,
    pub region: String,
    pub project_id: String,
    pub base_url: String,
    pub ufile_scheme: String,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub import: ImportConfig,
    pub access: AccessConfig,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(flatten)]
    import: ImportSettings,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    ufile_scheme: Option<String>,
}

fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        Ok(_) => {
            error!(var = name, "Environment variable is empty");
            anyhow::bail!("{name} environment variable is empty")
        }
        Err(e) => {
            error!(error = ?e, var = name, "Environment variable not set");
            Err(anyhow::anyhow!("{name} environment variable not set: {e}"))
        }
    }
}

fn fill_from_env(field: &mut String, name: &str) {
    if field.trim().is_empty() {
        if let Ok(value) = std::env::var(name) {
            info!(var = name, "Using value from environment");
            *field = value;
        }
    }
}

/// Loads the YAML config at `path`, merges environment secrets and validates everything.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<LoadedConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let public_key = required_env(ENV_PUBLIC_KEY)?;
    let private_key = required_env(ENV_PRIVATE_KEY)?;

    let mut settings = raw.import;
    fill_from_env(&mut settings.region, ENV_REGION);
    fill_from_env(&mut settings.project_id, ENV_PROJECT_ID);

    let base_url = raw
        .base_url
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    url::Url::parse(&base_url).with_context(|| format!("base_url {base_url:?} is not a valid URL"))?;

    let ufile_scheme = raw
        .ufile_scheme
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_UFILE_SCHEME.to_string());
    if ufile_scheme != "http" && ufile_scheme != "https" {
        anyhow::bail!("ufile_scheme must be \"http\" or \"https\", got {ufile_scheme:?}");
    }

    let import = settings.validate().map_err(|errs| {
        error!(errors = errs.0.len(), "Configuration is invalid");
        anyhow::Error::new(errs)
    })?;

    let loaded = LoadedConfig {
        access: AccessConfig {
            public_key,
            private_key,
            region: import.region.clone(),
            project_id: import.project_id.clone(),
            base_url,
            ufile_scheme,
        },
        import,
    };

    let secrets = [
        loaded.access.public_key.as_str(),
        loaded.access.private_key.as_str(),
    ];
    info!(config = %Redacted::new(&loaded, &secrets), "Config loaded and merged successfully");
    loaded.import.trace_loaded();

    Ok(loaded)
}
