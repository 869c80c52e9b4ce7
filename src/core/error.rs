//! Error types for the persister.

use thiserror::Error;

/// Every failure the persister can report
#[derive(Error, Debug)]
pub enum PersisterError {
    /// Envelope cannot be split into definition, dimensions and measurement
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Backing store rejected or could not be reached
    #[error("Storage write failed: {0}")]
    StorageWrite(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// One-time dispatcher setup failed
    #[error("Dispatcher construction failed: {0}")]
    DispatcherConstruction(String),

    /// Publish attempted after shutdown
    #[error("Dispatcher is shut down")]
    Shutdown,

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input line that is not an envelope array
    #[error("Decode error on line {line}: {message}")]
    Decode {
        /// 1-based input line
        line: usize,
        /// Parser message
        message: String,
    },

    /// Background task failed to complete
    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for persister operations
pub type Result<T> = std::result::Result<T, PersisterError>;

impl PersisterError {
    /// Creates a new malformed envelope error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedEnvelope(msg.into())
    }

    /// Creates a new storage write error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::StorageWrite(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new dispatcher construction error
    pub fn construction<S: Into<String>>(msg: S) -> Self {
        Self::DispatcherConstruction(msg.into())
    }

    /// Returns true if the failure is transient on the storage side.
    ///
    /// Only affects log severity; nothing in the pipeline retries.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StorageWrite(_) | Self::Io(_))
    }

    /// Returns the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "malformed",
            Self::StorageWrite(_) => "storage",
            Self::Config(_) => "config",
            Self::DispatcherConstruction(_) => "construction",
            Self::Shutdown => "shutdown",
            Self::Io(_) => "io",
            Self::Serialization(_) | Self::Decode { .. } => "serialization",
            Self::Join(_) => "async",
        }
    }
}
