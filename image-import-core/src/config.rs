//! Typed import configuration and its validation.
//!
//! [`ImportSettings`] is the user-facing shape (every field defaulted so that missing keys
//! surface as validation errors rather than a parse failure). [`ImportSettings::validate`]
//! checks all fields at once and returns either a resolved [`ImportConfig`] or every
//! problem found.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::import::ImageFormat;

/// Poll deadline used when `wait_image_ready_timeout` is absent or not positive.
pub const DEFAULT_WAIT_IMAGE_READY_TIMEOUT: Duration = Duration::from_secs(3600);

/// Prefix of generated object keys: `image-import-<unix-timestamp>.<format>`.
pub const DEFAULT_KEY_PREFIX: &str = "image-import";

const IMAGE_NAME_PATTERN: &str = r"^[A-Za-z0-9\p{Han}\-_,.:\[\]]{1,63}$";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    pub ufile_bucket_name: String,
    pub ufile_key_name: Option<String>,
    pub skip_clean: bool,
    pub image_name: String,
    pub image_description: String,
    pub image_os_type: String,
    pub image_os_name: String,
    pub format: String,
    /// Seconds; zero or negative selects the default.
    pub wait_image_ready_timeout: i64,
    pub region: String,
    pub project_id: String,
}

/// Image metadata handed to the import request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSettings {
    pub name: String,
    pub description: String,
    pub os_type: String,
    pub os_name: String,
    pub format: ImageFormat,
}

/// Resolved configuration consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub bucket: String,
    pub object_key: String,
    pub skip_clean: bool,
    pub image: ImageSettings,
    pub wait_image_ready_timeout: Duration,
    pub region: String,
    pub project_id: String,
}

impl ImportConfig {
    pub fn trace_loaded(&self) {
        info!(
            bucket = %self.bucket,
            object_key = %self.object_key,
            image_name = %self.image.name,
            format = %self.image.format,
            region = %self.region,
            timeout_secs = self.wait_image_ready_timeout.as_secs(),
            "Loaded import configuration"
        );
        debug!(?self, "Import configuration (full debug)");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("expected \"image_name\" to be 1-63 characters and only support chinese, english, numbers, '-_,.:[]', got {0:?}")]
    InvalidImageName(String),

    #[error("expected \"format\" only be one of 'raw', 'vhd', 'vmdk', or 'qcow2', got {0:?}")]
    InvalidFormat(String),
}

/// All validation failures of one configuration, reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigErrors(pub Vec<ConfigError>);

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s):", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

pub fn default_object_key(format: ImageFormat, now: DateTime<Utc>) -> String {
    format!("{DEFAULT_KEY_PREFIX}-{}.{format}", now.timestamp())
}

fn is_valid_image_name(name: &str) -> bool {
    Regex::new(IMAGE_NAME_PATTERN)
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

impl ImportSettings {
    /// Validate against the current time (used for the default object key).
    pub fn validate(&self) -> Result<ImportConfig, ConfigErrors> {
        self.validate_at(Utc::now())
    }

    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<ImportConfig, ConfigErrors> {
        let mut errors = Vec::new();

        let required = [
            ("ufile_bucket_name", &self.ufile_bucket_name),
            ("image_name", &self.image_name),
            ("image_os_type", &self.image_os_type),
            ("image_os_name", &self.image_os_name),
            ("format", &self.format),
            ("region", &self.region),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errors.push(ConfigError::Missing(field));
            }
        }

        if !is_valid_image_name(&self.image_name) {
            errors.push(ConfigError::InvalidImageName(self.image_name.clone()));
        }

        let format = match self.format.parse::<ImageFormat>() {
            Ok(format) => Some(format),
            Err(_) => {
                errors.push(ConfigError::InvalidFormat(self.format.clone()));
                None
            }
        };

        let format = match format {
            Some(format) if errors.is_empty() => format,
            _ => return Err(ConfigErrors(errors)),
        };

        let object_key = match self.ufile_key_name.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => default_object_key(format, now),
        };

        let wait_image_ready_timeout = if self.wait_image_ready_timeout > 0 {
            Duration::from_secs(self.wait_image_ready_timeout.unsigned_abs())
        } else {
            DEFAULT_WAIT_IMAGE_READY_TIMEOUT
        };

        Ok(ImportConfig {
            bucket: self.ufile_bucket_name.clone(),
            object_key,
            skip_clean: self.skip_clean,
            image: ImageSettings {
                name: self.image_name.clone(),
                description: self.image_description.clone(),
                os_type: self.image_os_type.clone(),
                os_name: self.image_os_name.clone(),
                format,
            },
            wait_image_ready_timeout,
            region: self.region.clone(),
            project_id: self.project_id.clone(),
        })
    }
}
