//! Save configuration for the persistence pipeline
//!
//! [`SaveConfiguration`] enumerates every recognized option with its default
//! and is validated once, when it is built or loaded, so misconfiguration
//! surfaces before any file is touched.

use crate::naming::{NamingTemplate, STANDARD_VARIABLES};
use crate::{Result, SatStoreError};
use satstore_retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Retry settings for remote uploads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per upload, including the first
    pub max_attempts: usize,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl RetrySettings {
    /// Build the backoff policy these settings describe
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_interval_ms: 500,
            max_interval_ms: 10_000,
        }
    }
}

/// Immutable options for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfiguration {
    /// Root directory all relative artifact paths are resolved against
    pub output_path: PathBuf,
    pub save_to_local: bool,
    pub save_to_remote: bool,
    pub save_as_raster: bool,
    pub save_as_array: bool,
    /// Write the whole band stack as one artifact instead of one per band
    pub merge_bands: bool,
    /// Lossless DEFLATE for raster output
    pub enable_compression: bool,
    pub custom_naming_template: Option<String>,
    pub identifier_type: String,
    pub remote_bucket: Option<String>,
    /// Key prefix inside the bucket
    pub remote_base_path: String,
    /// Additional template variables
    pub extra_naming_fields: BTreeMap<String, String>,
    /// Where temporary targets are allocated; the OS temp dir when unset
    pub scratch_dir: Option<PathBuf>,
    pub upload_retry: RetrySettings,
}

impl Default for SaveConfiguration {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("./data"),
            save_to_local: true,
            save_to_remote: false,
            save_as_raster: true,
            save_as_array: false,
            merge_bands: true,
            enable_compression: true,
            custom_naming_template: None,
            identifier_type: "area_name".to_string(),
            remote_bucket: None,
            remote_base_path: String::new(),
            extra_naming_fields: BTreeMap::new(),
            scratch_dir: None,
            upload_retry: RetrySettings::default(),
        }
    }
}

impl SaveConfiguration {
    /// Start from the defaults
    ///
    /// # Example
    /// ```rust
    /// use satstore_core::SaveConfiguration;
    ///
    /// let config = SaveConfiguration::builder()
    ///     .output_path("/data/out")
    ///     .save_as_array(true)
    ///     .merge_bands(false)
    ///     .build()?;
    /// assert!(config.save_as_raster);
    /// # Ok::<(), satstore_core::SatStoreError>(())
    /// ```
    pub fn builder() -> SaveConfigurationBuilder {
        SaveConfigurationBuilder {
            config: SaveConfiguration::default(),
        }
    }

    /// Parse a configuration from JSON; omitted fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SaveConfiguration = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// * `SatStoreError::Configuration` - missing bucket, no destination, shadowed variable
    /// * `SatStoreError::NamingTemplate` - template malformed or referencing unknown variables
    pub fn validate(&self) -> Result<()> {
        if !self.save_to_local && !self.save_to_remote {
            return Err(SatStoreError::configuration(
                "at least one of save_to_local or save_to_remote must be enabled",
            ));
        }

        if self.save_to_remote && self.bucket().is_none() {
            return Err(SatStoreError::configuration(
                "save_to_remote requires a non-empty remote_bucket",
            ));
        }

        if let Some(shadowed) = self
            .extra_naming_fields
            .keys()
            .find(|k| STANDARD_VARIABLES.contains(&k.as_str()))
        {
            return Err(SatStoreError::configuration(format!(
                "extra naming field '{shadowed}' shadows a standard variable"
            )));
        }

        self.naming_template()?;
        Ok(())
    }

    /// Parsed custom template, checked against the allowed variables
    pub fn naming_template(&self) -> Result<Option<NamingTemplate>> {
        let Some(source) = &self.custom_naming_template else {
            return Ok(None);
        };
        let template = NamingTemplate::parse(source)?;
        template.validate_variables(self.extra_naming_fields.keys().map(String::as_str))?;
        Ok(Some(template))
    }

    /// Bucket name, if one is set and non-empty
    pub fn bucket(&self) -> Option<&str> {
        self.remote_bucket
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }
}

/// Builder for [`SaveConfiguration`]; `build` validates
#[derive(Debug, Clone)]
pub struct SaveConfigurationBuilder {
    config: SaveConfiguration,
}

impl SaveConfigurationBuilder {
    pub fn output_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.output_path = path.into();
        self
    }

    pub fn save_to_local(mut self, enabled: bool) -> Self {
        self.config.save_to_local = enabled;
        self
    }

    pub fn save_to_remote(mut self, enabled: bool) -> Self {
        self.config.save_to_remote = enabled;
        self
    }

    pub fn save_as_raster(mut self, enabled: bool) -> Self {
        self.config.save_as_raster = enabled;
        self
    }

    pub fn save_as_array(mut self, enabled: bool) -> Self {
        self.config.save_as_array = enabled;
        self
    }

    pub fn merge_bands(mut self, enabled: bool) -> Self {
        self.config.merge_bands = enabled;
        self
    }

    pub fn enable_compression(mut self, enabled: bool) -> Self {
        self.config.enable_compression = enabled;
        self
    }

    pub fn custom_naming_template<S: Into<String>>(mut self, template: S) -> Self {
        self.config.custom_naming_template = Some(template.into());
        self
    }

    pub fn identifier_type<S: Into<String>>(mut self, identifier_type: S) -> Self {
        self.config.identifier_type = identifier_type.into();
        self
    }

    pub fn remote_bucket<S: Into<String>>(mut self, bucket: S) -> Self {
        self.config.remote_bucket = Some(bucket.into());
        self
    }

    pub fn remote_base_path<S: Into<String>>(mut self, base_path: S) -> Self {
        self.config.remote_base_path = base_path.into();
        self
    }

    pub fn extra_naming_field<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.config.extra_naming_fields.insert(key.into(), value.into());
        self
    }

    pub fn scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn upload_retry(mut self, retry: RetrySettings) -> Self {
        self.config.upload_retry = retry;
        self
    }

    pub fn build(self) -> Result<SaveConfiguration> {
        self.config.validate()?;
        Ok(self.config)
    }
}
