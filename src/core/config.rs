//! Configuration management for the persister.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Environment variable and CLI overrides (applied by `cli`)
//! - Validation and defaults
//!
//! Values are read once at start-up; there is no hot reload.

use crate::core::{PersisterError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for the persister
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ring buffer and consumer pool
    pub dispatcher: DispatcherConfig,
    /// Per-processor flush triggers
    pub pipeline: PipelineConfig,
    /// Backing store selection
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Slot count of the shared ring; must be a power of two
    pub ring_buffer_size: usize,
    /// Number of batch processors (partition count)
    pub num_processors: usize,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Flush once this many envelopes were forwarded since the last flush
    pub batch_size: usize,
    /// Flush on a periodic tick regardless of count
    #[serde(with = "humantime_serde")]
    pub flush_interval: Option<Duration>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which backend each repository writes to
    pub backend: StorageBackendKind,
    /// Output directory for file based backends
    pub data_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread ids and line numbers
    pub structured: bool,
}

/// Available storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    /// In-process sink, inspected by tests and dry runs
    Memory,
    /// One JSON object per series per flush, one file per processor
    JsonLines,
    /// Accept and drop
    Discard,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything
    Trace,
    /// Construction steps and flush timings
    Debug,
    /// Start-up and shutdown summaries
    Info,
    /// Dropped envelopes and skipped input
    Warn,
    /// Failed writes only
    Error,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            ring_buffer_size: 1024,
            num_processors: 4,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            batch_size: 1000,
            flush_interval: Some(Duration::from_secs(5)),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackendKind::JsonLines,
            data_dir: PathBuf::from("./persister_data"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let ring = self.dispatcher.ring_buffer_size;
        if ring == 0 || !ring.is_power_of_two() {
            return Err(PersisterError::config(format!(
                "ring_buffer_size must be a power of two greater than 0, got {}",
                ring
            )));
        }

        if self.dispatcher.num_processors == 0 {
            return Err(PersisterError::config("num_processors must be greater than 0"));
        }

        if self.pipeline.batch_size == 0 {
            return Err(PersisterError::config("batch_size must be greater than 0"));
        }

        if self.pipeline.flush_interval == Some(Duration::ZERO) {
            return Err(PersisterError::config("flush_interval must be greater than 0"));
        }

        Ok(())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| PersisterError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set ring buffer slot count
    pub fn ring_buffer_size(mut self, size: usize) -> Self {
        self.config.dispatcher.ring_buffer_size = size;
        self
    }

    /// Set number of processors
    pub fn num_processors(mut self, count: usize) -> Self {
        self.config.dispatcher.num_processors = count;
        self
    }

    /// Set per-processor batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.pipeline.batch_size = size;
        self
    }

    /// Set or clear the periodic flush interval
    pub fn flush_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.pipeline.flush_interval = interval;
        self
    }

    /// Select storage backend
    pub fn backend(mut self, backend: StorageBackendKind) -> Self {
        self.config.storage.backend = backend;
        self
    }

    /// Set data directory
    pub fn data_dir(mut self, path: PathBuf) -> Self {
        self.config.storage.data_dir = path;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
