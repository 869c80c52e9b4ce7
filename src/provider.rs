//! Once-only construction of the dispatcher and its processor pool.
//!
//! The first [`DispatcherProvider::get`] builds the ring, one
//! [`BatchProcessor`] per configured partition, and starts the consumer
//! threads. Concurrent first callers block until that single construction
//! finishes and then all receive the same instance. Nothing is rebuilt;
//! teardown happens only through [`DispatcherProvider::shutdown`] at exit.

use crate::core::{Config, PersisterError, Result};
use crate::dispatcher::{Dispatcher, EventHandler};
use crate::monitoring::MetricsRegistry;
use crate::pipeline::{BatchProcessor, FlushPolicy, MetricBatch};
use crate::repository::{factory_from_config, MemoryStore, RepositoryFactory};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Dispatcher carrying envelope arrays to batch processors.
pub type MetricDispatcher = Dispatcher<MetricBatch>;

static GLOBAL: OnceCell<DispatcherProvider> = OnceCell::new();

/// Builds the dispatcher and its processors on first use and hands out the
/// same instance afterwards.
pub struct DispatcherProvider {
    config: Config,
    factory: RepositoryFactory,
    registry: Arc<MetricsRegistry>,
    instance: OnceCell<Arc<MetricDispatcher>>,
    constructions: AtomicUsize,
}

impl DispatcherProvider {
    /// Provider building repositories with `factory`.
    pub fn new(config: Config, factory: RepositoryFactory, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            config,
            factory,
            registry,
            instance: OnceCell::new(),
            constructions: AtomicUsize::new(0),
        }
    }

    /// Provider whose repositories use the backend selected in `config`.
    pub fn from_config(config: Config, registry: Arc<MetricsRegistry>, store: MemoryStore) -> Self {
        let factory = factory_from_config(&config, Arc::clone(&registry), store);
        Self::new(config, factory, registry)
    }

    /// Make `provider` the process-wide instance. Fails if one is installed.
    pub fn install(provider: DispatcherProvider) -> Result<&'static DispatcherProvider> {
        GLOBAL
            .set(provider)
            .map_err(|_| PersisterError::construction("dispatcher provider already installed"))?;
        Self::global().ok_or_else(|| PersisterError::construction("dispatcher provider missing"))
    }

    /// The process-wide instance, if installed.
    pub fn global() -> Option<&'static DispatcherProvider> {
        GLOBAL.get()
    }

    /// Return the dispatcher, constructing and starting it on first call.
    pub fn get(&self) -> Result<Arc<MetricDispatcher>> {
        tracing::trace!("Requesting instance of dispatcher");
        self.instance.get_or_try_init(|| self.build()).map(Arc::clone)
    }

    fn build(&self) -> Result<Arc<MetricDispatcher>> {
        tracing::debug!("Instance of dispatcher is empty, creating dispatcher");
        self.constructions.fetch_add(1, Ordering::SeqCst);

        self.config
            .validate()
            .map_err(|e| PersisterError::construction(e.to_string()))?;

        let ring_buffer_size = self.config.dispatcher.ring_buffer_size;
        let num_processors = self.config.dispatcher.num_processors;
        let policy = FlushPolicy::from(&self.config.pipeline);
        tracing::debug!(
            ring_buffer_size,
            num_processors,
            batch_size = policy.batch_size,
            flush_interval = ?policy.flush_interval,
            "Dispatcher settings"
        );

        let mut processors: Vec<Box<dyn EventHandler<MetricBatch>>> =
            Vec::with_capacity(num_processors);
        for ordinal in 0..num_processors {
            let repository = (self.factory)(ordinal).map_err(|e| {
                PersisterError::construction(format!(
                    "repository for processor {}: {}",
                    ordinal, e
                ))
            })?;
            processors.push(Box::new(BatchProcessor::new(
                ordinal,
                num_processors,
                policy,
                repository,
                &self.registry,
            )));
        }

        let dispatcher = Dispatcher::builder(ring_buffer_size)
            .wait_timeout(policy.flush_interval)
            .handle_boxed_events_with(processors)
            .start()?;

        tracing::info!(ring_buffer_size, num_processors, "Dispatcher started");
        Ok(Arc::new(dispatcher))
    }

    /// Shut the dispatcher down if it was ever built.
    pub fn shutdown(&self) {
        if let Some(dispatcher) = self.instance.get() {
            dispatcher.shutdown();
        }
    }

    /// True once the dispatcher has been built.
    pub fn is_initialized(&self) -> bool {
        self.instance.get().is_some()
    }

    /// How many times construction ran.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Configuration the dispatcher is built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registry receiving processor and repository signals.
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }
}
