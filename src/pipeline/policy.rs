//! When a batch processor flushes.

use crate::core::config::PipelineConfig;
use std::time::Duration;

/// Why a flush was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// `batch_size` items were forwarded since the last flush.
    BatchSize,
    /// The periodic interval elapsed with items pending.
    Interval,
    /// The dispatcher is shutting down.
    Shutdown,
}

impl FlushReason {
    /// Label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::BatchSize => "batch_size",
            FlushReason::Interval => "interval",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

/// Count trigger plus an optional periodic trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Envelopes forwarded before a count-triggered flush, at least 1
    pub batch_size: usize,
    /// Periodic trigger; `None` disables it
    pub flush_interval: Option<Duration>,
}

impl FlushPolicy {
    /// Policy with both triggers. A zero `batch_size` is raised to 1.
    pub fn new(batch_size: usize, flush_interval: Option<Duration>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            flush_interval,
        }
    }

    /// Count trigger only.
    pub fn count_only(batch_size: usize) -> Self {
        Self::new(batch_size, None)
    }

    /// Decide whether `count` items accumulated over `since_last_flush`
    /// warrant a flush. Nothing accumulated never flushes.
    pub fn due(&self, count: usize, since_last_flush: Duration) -> Option<FlushReason> {
        if count == 0 {
            return None;
        }
        if count >= self.batch_size {
            return Some(FlushReason::BatchSize);
        }
        match self.flush_interval {
            Some(interval) if since_last_flush >= interval => Some(FlushReason::Interval),
            _ => None,
        }
    }
}

impl From<&PipelineConfig> for FlushPolicy {
    fn from(config: &PipelineConfig) -> Self {
        FlushPolicy::new(config.batch_size, config.flush_interval)
    }
}
