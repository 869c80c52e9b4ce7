//! Command-line interface for the persister.
//!
//! Reads envelope arrays (one JSON array per line) from a file or stdin,
//! pushes them through the dispatcher, and shuts down cleanly on end of
//! input or ctrl-c.

use crate::core::config::ConfigBuilder;
use crate::core::{Config, PersisterError, Result, StorageBackendKind};
use crate::ingest::{publish_lines, IngestStats};
use crate::monitoring::MetricsRegistry;
use crate::provider::{DispatcherProvider, MetricDispatcher};
use crate::repository::MemoryStore;
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Partitioned, batching metrics persister
#[derive(Parser, Debug)]
#[command(name = "persister")]
#[command(version, about, long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/persister/config.yaml)
    #[arg(short, long, env = "PERSISTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Input file of newline-delimited envelope arrays (default: stdin)
    #[arg(short, long, env = "PERSISTER_INPUT")]
    pub input: Option<PathBuf>,

    /// Ring buffer slot count (power of two)
    #[arg(long, env = "PERSISTER_RING_BUFFER_SIZE")]
    pub ring_buffer_size: Option<usize>,

    /// Number of batch processors
    #[arg(long, env = "PERSISTER_NUM_PROCESSORS")]
    pub num_processors: Option<usize>,

    /// Envelopes per processor before a flush
    #[arg(long, env = "PERSISTER_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Periodic flush interval, e.g. `5s` or `250ms`
    #[arg(long, env = "PERSISTER_FLUSH_INTERVAL", value_parser = parse_duration)]
    pub flush_interval: Option<Duration>,

    /// Storage backend: memory, json_lines or discard
    #[arg(long, env = "PERSISTER_BACKEND", value_parser = parse_backend)]
    pub backend: Option<StorageBackendKind>,

    /// Output directory for the json_lines backend
    #[arg(long, env = "PERSISTER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "PERSISTER_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,

    /// Show version information
    #[arg(short = 'V', long = "show-version")]
    pub version: bool,
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_backend(s: &str) -> std::result::Result<StorageBackendKind, String> {
    match s {
        "memory" => Ok(StorageBackendKind::Memory),
        "json_lines" | "json-lines" => Ok(StorageBackendKind::JsonLines),
        "discard" => Ok(StorageBackendKind::Discard),
        other => Err(format!(
            "unknown backend '{}', expected memory, json_lines or discard",
            other
        )),
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest priority)
    ///
    /// Returns the file the configuration came from, if any.
    pub async fn load_config(&self) -> Result<(Config, Option<PathBuf>)> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => Some(path.clone()),
            None => dirs::config_dir()
                .map(|d| d.join("persister").join("config.yaml"))
                .filter(|path| path.exists()),
        };

        let mut loaded_from = None;
        if let Some(path) = config_path {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    builder = builder.from_yaml(&content)?;
                    loaded_from = Some(path);
                },
                Err(e) => {
                    return Err(PersisterError::config(format!(
                        "Failed to read config file {:?}: {}",
                        path, e
                    )));
                },
            }
        }

        Ok((self.apply_overrides(builder).build()?, loaded_from))
    }

    fn apply_overrides(&self, mut builder: ConfigBuilder) -> ConfigBuilder {
        if let Some(size) = self.ring_buffer_size {
            builder = builder.ring_buffer_size(size);
        }
        if let Some(count) = self.num_processors {
            builder = builder.num_processors(count);
        }
        if let Some(size) = self.batch_size {
            builder = builder.batch_size(size);
        }
        if let Some(interval) = self.flush_interval {
            builder = builder.flush_interval(Some(interval));
        }
        if let Some(backend) = self.backend {
            builder = builder.backend(backend);
        }
        if let Some(dir) = &self.data_dir {
            builder = builder.data_dir(dir.clone());
        }
        builder.debug(self.debug)
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let level = if self.debug {
            "debug".to_string()
        } else {
            std::env::var("PERSISTER_LOG_LEVEL")
                .unwrap_or_else(|_| config.logging.level.as_str().to_string())
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        let fmt_layer = if config.logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| PersisterError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the persister.
pub async fn execute(cli: Cli) -> Result<()> {
    if cli.version {
        println!("persister {}", env!("CARGO_PKG_VERSION"));
        println!("Partitioned, batching metrics persister");
        return Ok(());
    }

    let (config, loaded_from) = cli.load_config().await?;
    cli.init_logging(&config)?;
    match &loaded_from {
        Some(path) => tracing::info!("Loaded configuration from: {:?}", path),
        None => tracing::debug!("No config file found, using defaults"),
    }

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  Ring buffer size: {}", config.dispatcher.ring_buffer_size);
        println!("  Processors: {}", config.dispatcher.num_processors);
        println!("  Batch size: {}", config.pipeline.batch_size);
        println!("  Flush interval: {:?}", config.pipeline.flush_interval);
        println!("  Backend: {:?}", config.storage.backend);
        return Ok(());
    }

    run(config, cli.input).await
}

fn ingest(input: Option<PathBuf>, dispatcher: &MetricDispatcher) -> Result<IngestStats> {
    match input {
        Some(path) => publish_lines(BufReader::new(File::open(path)?), dispatcher),
        None => publish_lines(std::io::stdin().lock(), dispatcher),
    }
}

async fn run(config: Config, input: Option<PathBuf>) -> Result<()> {
    let backend = config.storage.backend;
    let registry = Arc::new(MetricsRegistry::new());
    let store = MemoryStore::new();

    let provider = DispatcherProvider::install(DispatcherProvider::from_config(
        config,
        Arc::clone(&registry),
        store.clone(),
    ))?;
    let dispatcher = provider.get()?;

    // Plain thread: a blocking stdin read must not hold the runtime open on ctrl-c
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::Builder::new()
        .name("persister-ingest".to_string())
        .spawn(move || {
            let _ = tx.send(ingest(input, &dispatcher));
        })?;

    tokio::select! {
        result = rx => {
            match result {
                Ok(Ok(stats)) => tracing::info!(
                    lines = stats.lines,
                    published = stats.published,
                    envelopes = stats.envelopes,
                    rejected = stats.rejected_lines,
                    "Input exhausted, shutting down"
                ),
                Ok(Err(e)) => tracing::error!(error = %e, "Ingestion stopped"),
                Err(_) => tracing::error!("Ingestion thread exited without a result"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    // Drains published items and runs the final flushes
    tokio::task::spawn_blocking(move || provider.shutdown()).await?;

    let snapshot = registry.snapshot();
    tracing::info!(signals = %serde_json::to_string(&snapshot)?, "Final persister metrics");

    if backend == StorageBackendKind::Memory {
        tracing::info!(
            series = store.series().len(),
            measurements = store.measurement_count(),
            "Memory store contents"
        );
    }

    Ok(())
}
