//! Merge job configuration.
//!
//! Settings come from, in increasing precedence: built-in defaults, an
//! optional YAML file, `S2LU_*` environment variables, and whatever the
//! caller overrides afterwards (the CLI flags).

use crate::rule::RuleConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_REFERENCE: &str = "S2LU_REFERENCE";
pub const ENV_OUTPUT_ROOT: &str = "S2LU_OUTPUT_ROOT";
pub const ENV_OUTPUT_PREFIX: &str = "S2LU_OUTPUT_PREFIX";
pub const ENV_RULE: &str = "S2LU_RULE";
pub const ENV_DEFAULT_EPSG: &str = "S2LU_DEFAULT_EPSG";
pub const ENV_CLIP_TO_FOOTPRINT: &str = "S2LU_CLIP_TO_FOOTPRINT";
pub const ENV_WRITE_SUMMARY: &str = "S2LU_WRITE_SUMMARY";
pub const ENV_DOWNLOAD_DIR: &str = "S2LU_DOWNLOAD_DIR";

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("no reference raster configured (set S2LU_REFERENCE or `reference`)")]
    MissingReference,
}

/// Settings for the merge job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Location of the reference land-use raster.
    pub reference: String,
    /// Directory that output keys are resolved against.
    pub output_root: PathBuf,
    /// Key prefix of every output object.
    pub output_prefix: String,
    pub rule: RuleConfig,
    /// EPSG code assumed for rasters that carry none.
    pub default_epsg: Option<u32>,
    /// Set pixels outside the item's footprint to no-data.
    pub clip_to_footprint: bool,
    /// Write the JSON summary sidecar next to the raster.
    pub write_summary: bool,
    /// Keep downloaded copies of remote rasters here.
    pub download_dir: Option<PathBuf>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            reference: String::new(),
            output_root: PathBuf::from("."),
            output_prefix: "output".to_string(),
            rule: RuleConfig::default(),
            default_epsg: None,
            clip_to_footprint: true,
            write_summary: true,
            download_dir: None,
        }
    }
}

impl MergeConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_lookup(|name| std::env::var(name).ok())
    }

    /// Read a YAML config file; missing keys take their defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Optional YAML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        base.with_env_lookup(|name| std::env::var(name).ok())
    }

    /// Override settings with the variables `lookup` returns.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(reference) = var(ENV_REFERENCE) {
            self.reference = reference;
        }
        if let Some(root) = var(ENV_OUTPUT_ROOT) {
            self.output_root = PathBuf::from(root);
        }
        if let Some(prefix) = lookup(ENV_OUTPUT_PREFIX) {
            self.output_prefix = prefix;
        }
        if let Some(rule) = var(ENV_RULE) {
            self.rule = rule.parse().map_err(|e: crate::MergeError| ConfigError::InvalidValue {
                name: ENV_RULE,
                value: rule.clone(),
                reason: e.to_string(),
            })?;
        }
        if let Some(epsg) = var(ENV_DEFAULT_EPSG) {
            let code = epsg.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    name: ENV_DEFAULT_EPSG,
                    value: epsg.clone(),
                    reason: e.to_string(),
                }
            })?;
            self.default_epsg = Some(code);
        }
        if let Some(clip) = var(ENV_CLIP_TO_FOOTPRINT) {
            self.clip_to_footprint = parse_bool(ENV_CLIP_TO_FOOTPRINT, &clip)?;
        }
        if let Some(summary) = var(ENV_WRITE_SUMMARY) {
            self.write_summary = parse_bool(ENV_WRITE_SUMMARY, &summary)?;
        }
        if let Some(dir) = var(ENV_DOWNLOAD_DIR) {
            self.download_dir = Some(PathBuf::from(dir));
        }

        Ok(self)
    }

    /// Check the settings needed to handle a notification.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reference.trim().is_empty() {
            return Err(ConfigError::MissingReference);
        }
        if let Some(epsg) = self.default_epsg {
            s2lu_raster::Crs::from_epsg(epsg).map_err(|e| ConfigError::InvalidValue {
                name: "default_epsg",
                value: epsg.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: "expected true or false".into(),
        }),
    }
}
