//! Operational metrics for the persister itself.
//!
//! Counters, meters and timers are handed out by a shared [`MetricsRegistry`]
//! keyed by name, so every processor and repository registers its own signals
//! and a snapshot can be taken at any time without stopping the pipeline.
//! None of these values take part in correctness decisions.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
}

impl Counter {
    /// Increment by one.
    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    /// Increment by `n`.
    #[inline]
    pub fn add(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Event counter with a mean rate since creation.
#[derive(Debug)]
pub struct Meter {
    count: AtomicU64,
    created: Instant,
}

impl Meter {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Record one event.
    #[inline]
    pub fn mark(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total events recorded.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Events per second since the meter was created.
    pub fn mean_rate(&self) -> f64 {
        let elapsed = self.created.elapsed().as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0.0;
        }
        self.count() as f64 / elapsed
    }
}

/// Duration recorder: call count, total and max.
#[derive(Debug, Default)]
pub struct Timer {
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl Timer {
    /// Record one observed duration.
    pub fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    /// Start timing; the returned guard records on drop.
    pub fn time(&self) -> TimerContext<'_> {
        TimerContext {
            timer: self,
            start: Some(Instant::now()),
        }
    }

    /// Number of recorded durations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean recorded duration.
    pub fn mean(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed) / count)
    }

    /// Longest recorded duration.
    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed))
    }
}

/// Running timer measurement; stops on drop.
pub struct TimerContext<'a> {
    timer: &'a Timer,
    start: Option<Instant>,
}

impl TimerContext<'_> {
    /// Stop explicitly, record, and return the elapsed duration.
    pub fn stop(mut self) -> Duration {
        self.finish()
    }

    fn finish(&mut self) -> Duration {
        match self.start.take() {
            Some(start) => {
                let elapsed = start.elapsed();
                self.timer.record(elapsed);
                elapsed
            },
            None => Duration::ZERO,
        }
    }
}

impl Drop for TimerContext<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Value of one registered signal at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignalValue {
    /// Monotonic count
    Counter {
        /// Total increments
        count: u64,
    },
    /// Count with rate
    Meter {
        /// Events marked
        count: u64,
        /// Events per second since creation
        mean_rate: f64,
    },
    /// Duration distribution
    Timer {
        /// Recorded durations
        count: u64,
        /// Mean duration
        #[serde(with = "humantime_serde")]
        mean: Duration,
        /// Longest duration
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

/// Point-in-time copy of every registered signal, sorted by name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrySnapshot {
    /// `(name, value)` pairs
    pub signals: Vec<(String, SignalValue)>,
}

impl RegistrySnapshot {
    /// Look up one signal by name.
    pub fn get(&self, name: &str) -> Option<&SignalValue> {
        self.signals
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Count of a counter, meter or timer.
    pub fn count(&self, name: &str) -> Option<u64> {
        self.get(name).map(|value| match value {
            SignalValue::Counter { count }
            | SignalValue::Meter { count, .. }
            | SignalValue::Timer { count, .. } => *count,
        })
    }
}

/// Shared registry of named counters, meters and timers.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, Arc<Counter>>,
    meters: DashMap<String, Arc<Meter>>,
    timers: DashMap<String, Arc<Timer>>,
}

impl MetricsRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter registered under `name`.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Counter::default()))
            .clone()
    }

    /// Get or create the meter registered under `name`.
    pub fn meter(&self, name: &str) -> Arc<Meter> {
        self.meters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Meter::new()))
            .clone()
    }

    /// Get or create the timer registered under `name`.
    pub fn timer(&self, name: &str) -> Arc<Timer> {
        self.timers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Timer::default()))
            .clone()
    }

    /// Copy every signal into a snapshot.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut signals: Vec<(String, SignalValue)> = Vec::with_capacity(
            self.counters.len() + self.meters.len() + self.timers.len(),
        );

        for item in self.counters.iter() {
            signals.push((item.key().clone(), SignalValue::Counter {
                count: item.value().count(),
            }));
        }
        for item in self.meters.iter() {
            signals.push((item.key().clone(), SignalValue::Meter {
                count: item.value().count(),
                mean_rate: item.value().mean_rate(),
            }));
        }
        for item in self.timers.iter() {
            let timer = item.value();
            signals.push((item.key().clone(), SignalValue::Timer {
                count: timer.count(),
                mean: timer.mean(),
                max: timer.max(),
            }));
        }

        signals.sort_by(|a, b| a.0.cmp(&b.0));
        RegistrySnapshot { signals }
    }
}

/// Builds the `<component>[<ordinal>].<signal>` name used for per-processor signals.
pub fn signal_name(component: &str, ordinal: usize, signal: &str) -> String {
    format!("{}[{}].{}", component, ordinal, signal)
}
