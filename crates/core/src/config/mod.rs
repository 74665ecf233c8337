//! Configuration module for the eventbatch system
//!
//! This module provides configuration structures and loading mechanisms for the
//! event batcher. Configuration can be loaded from TOML files and/or environment
//! variables, or built in code with [`BatcherConfig::builder`].

mod defaults;
mod loading;


use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use defaults::*;

/// Returns the path to the global configuration file
///
/// The global config is stored at `~/.eventbatch/config.toml`.
pub fn global_config_path() -> Result<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| Error::config("Unable to determine home directory".to_string()))?;
    Ok(home_dir.join(".eventbatch").join("config.toml"))
}

/// Main configuration structure for the eventbatch system
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Event batcher configuration
    #[serde(default)]
    pub batcher: BatcherConfig,
}

/// Immutable parameters of an event batcher, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Buffered event count that triggers a flush (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Milliseconds from the first event of a window until a forced flush (default: 500)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Events the queue holds before `submit` waits for room (default: 10000)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Reports retained per subscriber before the oldest are dropped (default: 64)
    #[serde(default = "default_report_capacity")]
    pub report_capacity: usize,

    /// Grace period in milliseconds that `close()` waits for the final drain (default: 30000)
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl BatcherConfig {
    /// Create configuration from builder
    pub fn builder() -> BatcherConfigBuilder {
        BatcherConfigBuilder::default()
    }

    /// Get the flush deadline duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Get the shutdown grace period
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Validates the batcher configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config(
                "batcher.batch_size must be greater than 0".to_string(),
            ));
        }
        if self.max_delay_ms == 0 {
            return Err(Error::config(
                "batcher.max_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::config(
                "batcher.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(Error::config(format!(
                "batcher.queue_capacity too large (max {MAX_QUEUE_CAPACITY}, got {})",
                self.queue_capacity
            )));
        }
        if self.report_capacity == 0 {
            return Err(Error::config(
                "batcher.report_capacity must be greater than 0".to_string(),
            ));
        }
        if self.report_capacity > MAX_REPORT_CAPACITY {
            return Err(Error::config(format!(
                "batcher.report_capacity too large (max {MAX_REPORT_CAPACITY}, got {})",
                self.report_capacity
            )));
        }
        if self.drain_timeout_ms == 0 {
            return Err(Error::config(
                "batcher.drain_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_delay_ms: default_max_delay_ms(),
            queue_capacity: default_queue_capacity(),
            report_capacity: default_report_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Builder for BatcherConfig
#[derive(Debug, Default)]
pub struct BatcherConfigBuilder {
    config: BatcherConfig,
}

impl BatcherConfigBuilder {
    /// Set the size flush trigger
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the flush deadline in milliseconds
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.config.max_delay_ms = ms;
        self
    }

    /// Set the flush deadline
    ///
    /// Sub-millisecond remainders are rounded up so a non-zero duration never
    /// becomes a zero deadline.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay_ms = duration_to_millis_ceil(delay);
        self
    }

    /// Set the event queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the per-subscriber report backlog
    pub fn report_capacity(mut self, capacity: usize) -> Self {
        self.config.report_capacity = capacity;
        self
    }

    /// Set the shutdown grace period in milliseconds
    pub fn drain_timeout_ms(mut self, ms: u64) -> Self {
        self.config.drain_timeout_ms = ms;
        self
    }

    /// Set the shutdown grace period
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout_ms = duration_to_millis_ceil(timeout);
        self
    }

    /// Build the configuration
    pub fn build(self) -> BatcherConfig {
        self.config
    }
}

fn duration_to_millis_ceil(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    let rounded = if duration.subsec_nanos() % 1_000_000 != 0 {
        millis + 1
    } else {
        millis
    };
    u64::try_from(rounded).unwrap_or(u64::MAX)
}

impl Config {
    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        self.batcher.validate()
    }
}
