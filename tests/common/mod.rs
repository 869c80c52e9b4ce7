//! Common test utilities and fixtures.

#![allow(dead_code)]

use persister_lib::core::{Config, ConfigBuilder, Metric, MetricEnvelope, Result, StorageBackendKind};
use persister_lib::monitoring::MetricsRegistry;
use persister_lib::repository::{
    BatchRepository, MeasurementBuffer, MeasurementWriter, MemoryStore, MetricRepository,
    RepositoryFactory,
};
use persister_lib::core::PersisterError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Test fixture builder for creating envelopes with sensible defaults.
pub struct TestEnvelopeBuilder {
    name: String,
    tenant: String,
    region: String,
    dimensions: BTreeMap<String, String>,
    timestamp: i64,
    value: f64,
}

impl TestEnvelopeBuilder {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            name: "cpu.idle".to_string(),
            tenant: "T1".to_string(),
            region: "R1".to_string(),
            dimensions: BTreeMap::new(),
            timestamp,
            value,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn tenant(mut self, tenant: &str) -> Self {
        self.tenant = tenant.to_string();
        self
    }

    pub fn dimension(mut self, key: &str, value: &str) -> Self {
        self.dimensions.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> MetricEnvelope {
        let metric = Metric {
            name: self.name,
            dimensions: self.dimensions,
            timestamp: self.timestamp,
            value: self.value,
            value_meta: None,
        };
        MetricEnvelope::new(metric, self.tenant, self.region)
    }
}

/// Small ring, count-only flushing, memory backend.
pub fn memory_config(num_processors: usize, batch_size: usize) -> Config {
    ConfigBuilder::new()
        .ring_buffer_size(16)
        .num_processors(num_processors)
        .batch_size(batch_size)
        .flush_interval(None)
        .backend(StorageBackendKind::Memory)
        .build()
        .unwrap()
}

/// Factory giving processor `k` its own memory store `stores[k]`.
pub fn per_processor_factory(stores: Vec<MemoryStore>, registry: Arc<MetricsRegistry>) -> RepositoryFactory {
    Arc::new(move |ordinal| {
        let repository: Box<dyn MetricRepository> =
            Box::new(BatchRepository::new(stores[ordinal].clone(), ordinal, &registry));
        Ok(repository)
    })
}

/// Writer that always fails, counting attempts.
#[derive(Clone, Default)]
pub struct FailingWriter {
    pub attempts: Arc<parking_lot::Mutex<usize>>,
}

impl MeasurementWriter for FailingWriter {
    fn write(&mut self, _buffer: &MeasurementBuffer) -> Result<()> {
        *self.attempts.lock() += 1;
        Err(PersisterError::storage("backend unavailable"))
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}
