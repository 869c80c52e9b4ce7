//! Batch processor: the dispatcher consumer that feeds one repository.
//!
//! Two states, re-entered for the life of the process:
//! `Accumulating` forwards owned envelope arrays into the repository and
//! counts them; `Flushing` runs the repository flush synchronously on the
//! consumer thread, so this partition pauses while the other partitions keep
//! going. Storage failures never leave the repository.

use crate::core::{MetricEnvelope, Result};
use crate::dispatcher::{EventHandler, ModuloPartitioner, Partitioner};
use crate::monitoring::{signal_name, Counter, MetricsRegistry};
use crate::pipeline::policy::{FlushPolicy, FlushReason};
use crate::repository::{FlushOutcome, MetricRepository};
use std::sync::Arc;
use std::time::Instant;

/// One delivery from the transport: an array of envelopes.
pub type MetricBatch = Vec<MetricEnvelope>;

/// Where a processor is in its accumulate/flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Forwarding owned envelopes into the repository
    Accumulating,
    /// Repository flush in progress on the consumer thread
    Flushing,
}

/// Dispatcher consumer for one partition, feeding one repository.
pub struct BatchProcessor<R = Box<dyn MetricRepository>> {
    ordinal: usize,
    num_processors: usize,
    partitioner: Arc<dyn Partitioner>,
    policy: FlushPolicy,
    repository: R,
    state: ProcessorState,
    /// Envelopes forwarded since the last flush
    event_count: usize,
    last_flush: Instant,
    flushes: u64,
    added: Arc<Counter>,
    malformed: Arc<Counter>,
}

impl<R: MetricRepository> BatchProcessor<R> {
    /// Processor `ordinal` of `num_processors`, using modulo partitioning.
    pub fn new(
        ordinal: usize,
        num_processors: usize,
        policy: FlushPolicy,
        repository: R,
        registry: &MetricsRegistry,
    ) -> Self {
        Self {
            ordinal,
            num_processors,
            partitioner: Arc::new(ModuloPartitioner),
            policy,
            repository,
            state: ProcessorState::Accumulating,
            event_count: 0,
            last_flush: Instant::now(),
            flushes: 0,
            added: registry
                .counter(&signal_name("processor", ordinal, "metrics-added-to-batch-counter")),
            malformed: registry
                .counter(&signal_name("processor", ordinal, "malformed-envelope-counter")),
        }
    }

    /// Replace the default modulo partition rule.
    pub fn with_partitioner(mut self, partitioner: Arc<dyn Partitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }

    /// True when this processor is responsible for `sequence`.
    pub fn owns(&self, sequence: u64) -> bool {
        self.partitioner.partition(sequence, self.num_processors) == self.ordinal
    }

    /// Forward every envelope to the repository.
    ///
    /// A malformed envelope is dropped and counted; the rest of the array is
    /// still forwarded. Returns the number of envelopes consumed.
    pub fn process(&mut self, envelopes: &[MetricEnvelope]) -> usize {
        for envelope in envelopes {
            match self.repository.add_to_batch(envelope) {
                Ok(()) => self.added.inc(),
                Err(e) => {
                    self.malformed.inc();
                    tracing::warn!(
                        ordinal = self.ordinal,
                        metric = %envelope.metric.name,
                        error = %e,
                        "Dropping malformed envelope"
                    );
                },
            }
        }
        envelopes.len()
    }

    /// Flush the repository and return to accumulating.
    pub fn flush(&mut self, reason: FlushReason) -> FlushOutcome {
        self.state = ProcessorState::Flushing;
        let outcome = self.repository.flush();

        tracing::debug!(
            ordinal = self.ordinal,
            reason = reason.as_str(),
            events = self.event_count,
            "Flushed repository"
        );

        self.event_count = 0;
        self.last_flush = Instant::now();
        self.flushes += 1;
        self.state = ProcessorState::Accumulating;
        outcome
    }

    fn flush_if_due(&mut self) {
        if let Some(reason) = self.policy.due(self.event_count, self.last_flush.elapsed()) {
            self.flush(reason);
        }
    }

    /// Partition index this processor owns.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Current state.
    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Envelopes forwarded since the last flush.
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Flushes performed so far.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// The repository this processor feeds.
    pub fn repository(&self) -> &R {
        &self.repository
    }
}

impl<R: MetricRepository> EventHandler<MetricBatch> for BatchProcessor<R> {
    fn on_event(&mut self, event: &MetricBatch, sequence: u64, _end_of_batch: bool) -> Result<()> {
        if !self.owns(sequence) {
            // Steady traffic for other partitions keeps the wait from timing out
            self.flush_if_due();
            return Ok(());
        }

        self.event_count += self.process(event);
        self.flush_if_due();
        Ok(())
    }

    fn on_timeout(&mut self) -> Result<()> {
        self.flush_if_due();
        Ok(())
    }

    fn on_start(&mut self) {
        tracing::debug!(
            ordinal = self.ordinal,
            num_processors = self.num_processors,
            batch_size = self.policy.batch_size,
            "Batch processor started"
        );
        self.last_flush = Instant::now();
    }

    fn on_shutdown(&mut self) {
        if self.event_count > 0 || self.repository.pending() > 0 {
            self.flush(FlushReason::Shutdown);
        }
        tracing::debug!(ordinal = self.ordinal, flushes = self.flushes, "Batch processor stopped");
    }
}
