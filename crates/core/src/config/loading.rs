//! Configuration loading from files and environment variables

use crate::error::{Error, Result};
use config::{Config as ConfigLib, ConfigBuilder as LibConfigBuilder, Environment, File};
use std::path::Path;

use super::defaults::*;
use super::{global_config_path, Config};

/// Prefix for environment variable overrides
const ENV_PREFIX: &str = "EVENTBATCH";

/// Helper to set a config default with consistent error mapping
fn set_config_default<T: Into<config::Value>>(
    builder: LibConfigBuilder<config::builder::DefaultState>,
    key: &str,
    value: T,
) -> Result<LibConfigBuilder<config::builder::DefaultState>> {
    builder
        .set_default(key, value)
        .map_err(|e| Error::config(format!("Failed to set {key} default: {e}")))
}

impl Config {
    /// Loads configuration from a TOML file with environment variable overrides
    ///
    /// Environment variables are prefixed with `EVENTBATCH_` and use double underscores
    /// for nested values. For example:
    /// - `EVENTBATCH_BATCHER__BATCH_SIZE=50`
    /// - `EVENTBATCH_BATCHER__MAX_DELAY_MS=250`
    pub fn from_file(path: &Path) -> Result<Self> {
        let builder = ConfigLib::builder();

        // config crate doesn't apply serde defaults for missing sections
        let builder =
            set_config_default(builder, "batcher.batch_size", default_batch_size() as i64)?;
        let builder = set_config_default(
            builder,
            "batcher.max_delay_ms",
            default_max_delay_ms() as i64,
        )?;
        let builder = set_config_default(
            builder,
            "batcher.queue_capacity",
            default_queue_capacity() as i64,
        )?;
        let builder = set_config_default(
            builder,
            "batcher.report_capacity",
            default_report_capacity() as i64,
        )?;
        let mut builder = set_config_default(
            builder,
            "batcher.drain_timeout_ms",
            default_drain_timeout_ms() as i64,
        )?;

        // Add the config file if it exists
        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize config: {e}")))
    }

    /// Creates a config from a TOML string (useful for testing)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("Failed to parse TOML: {e}")))
    }

    /// Serializes the config back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {e}")))
    }

    /// Load configuration from a single file
    ///
    /// Precedence (lowest to highest):
    /// 1. Hardcoded defaults
    /// 2. Config file (~/.eventbatch/config.toml or custom --config path)
    /// 3. Environment variables (EVENTBATCH_*)
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => global_config_path()?,
        };
        let config = Self::from_file(&path)?;
        config.validate()?;
        Ok(config)
    }
}
