//! Batch processors and their flush policy.

pub mod policy;
pub mod processor;

pub use policy::{FlushPolicy, FlushReason};
pub use processor::{BatchProcessor, MetricBatch, ProcessorState};
