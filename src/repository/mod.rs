//! Metric repositories: grouping buffer plus guarded flush to a backend.
//!
//! A repository belongs to exactly one batch processor. `flush` never fails
//! from the caller's point of view: a storage error is logged and counted,
//! the buffered data is discarded, and ingestion carries on. Nothing is
//! retried or requeued.

pub mod buffer;
pub mod writer;

pub use buffer::{MeasurementBuffer, SeriesRef};
pub use writer::{DiscardWriter, JsonLinesWriter, MeasurementWriter, MemoryStore, WrittenSeries};

use crate::core::{Config, MetricEnvelope, Result, StorageBackendKind};
use crate::monitoring::{signal_name, Counter, Meter, MetricsRegistry, Timer};
use std::sync::Arc;
use std::time::Duration;

/// Capability every backend variant provides to a batch processor.
pub trait MetricRepository: Send {
    /// Buffer one envelope under its series key.
    ///
    /// Fails with `MalformedEnvelope` without touching the buffer when the
    /// envelope cannot be decomposed.
    fn add_to_batch(&mut self, envelope: &MetricEnvelope) -> Result<()>;

    /// Write the buffer to the backend and clear it, whatever the outcome.
    fn flush(&mut self) -> FlushOutcome;

    /// Measurements waiting for the next flush.
    fn pending(&self) -> usize;
}

impl MetricRepository for Box<dyn MetricRepository> {
    fn add_to_batch(&mut self, envelope: &MetricEnvelope) -> Result<()> {
        (**self).add_to_batch(envelope)
    }

    fn flush(&mut self) -> FlushOutcome {
        (**self).flush()
    }

    fn pending(&self) -> usize {
        (**self).pending()
    }
}

/// What a flush attempt did. Informational only.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Buffer was empty; nothing was written.
    Empty,
    /// Backend accepted the batch.
    Written {
        /// Distinct series written
        series: usize,
        /// Measurements written
        measurements: usize,
        /// Time spent in the backend write
        elapsed: Duration,
    },
    /// Backend failed; the batch was discarded.
    Failed {
        /// Distinct series discarded
        series: usize,
        /// Measurements discarded
        measurements: usize,
        /// Backend error message
        error: String,
    },
}

/// Observability signals of one repository.
struct RepositorySignals {
    flush_timer: Arc<Timer>,
    flush_failures: Arc<Counter>,
    measurement_meter: Arc<Meter>,
}

impl RepositorySignals {
    fn register(registry: &MetricsRegistry, ordinal: usize) -> Self {
        Self {
            flush_timer: registry.timer(&signal_name("repository", ordinal, "flush-timer")),
            flush_failures: registry
                .counter(&signal_name("repository", ordinal, "flush-failure-counter")),
            measurement_meter: registry
                .meter(&signal_name("repository", ordinal, "measurement-meter")),
        }
    }
}

/// Grouping buffer in front of a [`MeasurementWriter`].
pub struct BatchRepository<W> {
    ordinal: usize,
    buffer: MeasurementBuffer,
    writer: W,
    signals: RepositorySignals,
}

impl<W: MeasurementWriter> BatchRepository<W> {
    /// Repository for processor `ordinal`, writing through `writer`.
    pub fn new(writer: W, ordinal: usize, registry: &MetricsRegistry) -> Self {
        Self {
            ordinal,
            buffer: MeasurementBuffer::new(),
            writer,
            signals: RepositorySignals::register(registry, ordinal),
        }
    }

    /// Current buffer contents.
    pub fn buffer(&self) -> &MeasurementBuffer {
        &self.buffer
    }

    /// Backend writer.
    pub fn writer(&self) -> &W {
        &self.writer
    }
}

impl<W: MeasurementWriter> MetricRepository for BatchRepository<W> {
    fn add_to_batch(&mut self, envelope: &MetricEnvelope) -> Result<()> {
        let (definition, dimensions, measurement) = envelope.decompose()?;
        self.buffer.put(definition, dimensions, measurement);
        self.signals.measurement_meter.mark();
        Ok(())
    }

    fn flush(&mut self) -> FlushOutcome {
        if self.buffer.is_empty() {
            return FlushOutcome::Empty;
        }

        let series = self.buffer.series_count();
        let measurements = self.buffer.measurement_count();

        let context = self.signals.flush_timer.time();
        let result = self.writer.write(&self.buffer);
        let elapsed = context.stop();

        let outcome = match result {
            Ok(()) => {
                tracing::debug!(
                    ordinal = self.ordinal,
                    backend = self.writer.backend(),
                    series,
                    measurements,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Wrote measurements"
                );
                FlushOutcome::Written {
                    series,
                    measurements,
                    elapsed,
                }
            },
            Err(e) => {
                self.signals.flush_failures.inc();
                tracing::error!(
                    ordinal = self.ordinal,
                    backend = self.writer.backend(),
                    series,
                    measurements,
                    recoverable = e.is_recoverable(),
                    error = %e,
                    "Failed to write measurements, discarding batch"
                );
                FlushOutcome::Failed {
                    series,
                    measurements,
                    error: e.to_string(),
                }
            },
        };

        self.buffer.clear();
        outcome
    }

    fn pending(&self) -> usize {
        self.buffer.measurement_count()
    }
}

/// Creates the repository for a given processor ordinal.
pub type RepositoryFactory =
    Arc<dyn Fn(usize) -> Result<Box<dyn MetricRepository>> + Send + Sync>;

/// Factory for the backend named in `config.storage`.
///
/// `memory` backends all share `store` so callers can inspect what was written.
pub fn factory_from_config(
    config: &Config,
    registry: Arc<MetricsRegistry>,
    store: MemoryStore,
) -> RepositoryFactory {
    let backend = config.storage.backend;
    let data_dir = config.storage.data_dir.clone();

    Arc::new(move |ordinal| {
        let repository: Box<dyn MetricRepository> = match backend {
            StorageBackendKind::Memory => {
                Box::new(BatchRepository::new(store.clone(), ordinal, &registry))
            },
            StorageBackendKind::JsonLines => Box::new(BatchRepository::new(
                JsonLinesWriter::open(&data_dir, ordinal)?,
                ordinal,
                &registry,
            )),
            StorageBackendKind::Discard => {
                Box::new(BatchRepository::new(DiscardWriter, ordinal, &registry))
            },
        };
        Ok(repository)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Definition, Dimensions, Measurement, Metric, PersisterError};

    struct BrokenWriter;

    impl MeasurementWriter for BrokenWriter {
        fn write(&mut self, _buffer: &MeasurementBuffer) -> Result<()> {
            Err(PersisterError::storage("connection refused"))
        }

        fn backend(&self) -> &'static str {
            "broken"
        }
    }

    fn envelope(dims: &[(&str, &str)], ts: i64, value: f64) -> MetricEnvelope {
        let metric = Metric {
            name: "cpu.idle".to_string(),
            dimensions: dims.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            timestamp: ts,
            value,
            value_meta: None,
        };
        MetricEnvelope::new(metric, "T1", "R1")
    }

    fn cpu_idle() -> Definition {
        Definition::new("cpu.idle".to_string(), "T1".to_string(), "R1".to_string()).unwrap()
    }

    #[test]
    fn test_flush_groups_same_series_in_order() {
        let registry = MetricsRegistry::new();
        let store = MemoryStore::new();
        let mut repo = BatchRepository::new(store.clone(), 0, &registry);

        repo.add_to_batch(&envelope(&[("host", "a")], 1, 10.0)).unwrap();
        repo.add_to_batch(&envelope(&[("host", "a")], 2, 20.0)).unwrap();
        let outcome = repo.flush();

        assert!(matches!(outcome, FlushOutcome::Written { series: 1, measurements: 2, .. }));
        let written = store.series_for(&cpu_idle());
        assert_eq!(written.len(), 1);
        assert_eq!(
            written[0].measurements,
            vec![Measurement::new(1, 10.0), Measurement::new(2, 20.0)]
        );
        assert!(repo.buffer().is_empty());
    }

    #[test]
    fn test_flush_keeps_distinct_dimensions_apart() {
        let registry = MetricsRegistry::new();
        let store = MemoryStore::new();
        let mut repo = BatchRepository::new(store.clone(), 0, &registry);

        repo.add_to_batch(&envelope(&[("host", "a")], 1, 10.0)).unwrap();
        repo.add_to_batch(&envelope(&[("host", "b")], 1, 20.0)).unwrap();
        repo.flush();

        let mut dims: Vec<Dimensions> =
            store.series().into_iter().map(|s| s.dimensions).collect();
        dims.sort();
        assert_eq!(dims, vec![
            [("host", "a")].into_iter().collect::<Dimensions>(),
            [("host", "b")].into_iter().collect::<Dimensions>(),
        ]);
    }

    #[test]
    fn test_failed_write_is_contained_and_clears_buffer() {
        let registry = MetricsRegistry::new();
        let mut repo = BatchRepository::new(BrokenWriter, 4, &registry);

        repo.add_to_batch(&envelope(&[("host", "a")], 1, 10.0)).unwrap();
        let outcome = repo.flush();

        assert!(matches!(outcome, FlushOutcome::Failed { measurements: 1, .. }));
        assert_eq!(repo.pending(), 0);
        assert_eq!(
            registry
                .counter("repository[4].flush-failure-counter")
                .count(),
            1
        );
        assert_eq!(registry.timer("repository[4].flush-timer").count(), 1);
    }

    #[test]
    fn test_malformed_envelope_leaves_buffer_untouched() {
        let registry = MetricsRegistry::new();
        let mut repo = BatchRepository::new(MemoryStore::new(), 0, &registry);
        let mut bad = envelope(&[], 1, 1.0);
        bad.meta.clear();

        let err = repo.add_to_batch(&bad).unwrap_err();
        assert!(matches!(err, PersisterError::MalformedEnvelope(_)));
        assert_eq!(repo.pending(), 0);
        assert_eq!(registry.meter("repository[0].measurement-meter").count(), 0);
    }

    #[test]
    fn test_empty_flush_skips_write() {
        let registry = MetricsRegistry::new();
        let store = MemoryStore::new();
        let mut repo = BatchRepository::new(store.clone(), 0, &registry);

        assert_eq!(repo.flush(), FlushOutcome::Empty);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_factory_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::core::ConfigBuilder::new()
            .backend(StorageBackendKind::JsonLines)
            .data_dir(dir.path().to_path_buf())
            .build()
            .unwrap();
        let factory = factory_from_config(&config, Arc::new(MetricsRegistry::new()), MemoryStore::new());

        let mut repo = factory(1).unwrap();
        repo.add_to_batch(&envelope(&[("host", "a")], 1, 1.0)).unwrap();
        assert!(matches!(repo.flush(), FlushOutcome::Written { .. }));
        assert!(dir.path().join("measurements-1.jsonl").exists());
    }
}
