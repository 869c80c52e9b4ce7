//! Core domain models, configuration and errors.
//!
//! This module contains the types shared by the dispatcher, the batch
//! processors and the repositories.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, StorageBackendKind};
pub use error::{PersisterError, Result};
pub use types::{Definition, Dimensions, Measurement, Metric, MetricEnvelope};
