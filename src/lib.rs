//! Persister - partitioned, batching metrics persister.
//!
//! Envelope arrays are published onto a single bounded ring and fanned out
//! to a fixed pool of batch processors. Each processor keeps only the
//! sequences its partition owns, groups the envelopes it receives by series,
//! and flushes the grouped measurements to a storage backend when a batch
//! size or time interval is reached.
//!
//! # Features
//!
//! - **Back-pressure**: publishing blocks while the ring is full, nothing is dropped
//! - **Partition ordering**: each processor sees its sequences in publish order
//! - **Contained failures**: a failed write is logged and counted, never propagated
//! - **Single construction**: the dispatcher is built once per process
//!
//! # Architecture
//!
//! - `dispatcher`: sequenced ring, partitioning and consumer threads
//! - `provider`: once-only dispatcher construction
//! - `pipeline`: batch processors and flush policy
//! - `repository`: grouping buffer and storage writers
//! - `monitoring`: counters, meters and timers per component
//! - `core`: domain types, configuration and errors
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use persister_lib::core::Config;
//! use persister_lib::monitoring::MetricsRegistry;
//! use persister_lib::provider::DispatcherProvider;
//! use persister_lib::repository::MemoryStore;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(MetricsRegistry::new());
//!     let provider = DispatcherProvider::from_config(Config::default(), registry, MemoryStore::new());
//!     let dispatcher = provider.get()?;
//!     dispatcher.publish(Vec::new())?;
//!     provider.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod core;
pub mod dispatcher;
pub mod ingest;
pub mod monitoring;
pub mod pipeline;
pub mod provider;
pub mod repository;

// Re-export core types for convenience
pub use crate::core::{Config, Result};
pub use crate::provider::{DispatcherProvider, MetricDispatcher};
