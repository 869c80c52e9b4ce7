//! Partitioned dispatcher: one bounded ring, N consumer threads.
//!
//! Every consumer is offered every published item in sequence order and
//! keeps only the items its [`Partitioner`] assigns to it. Within a partition
//! publish order is preserved; across partitions nothing is ordered. The
//! consumer set is fixed once [`DispatcherBuilder::start`] returns.

pub mod handler;
pub mod partition;
mod ring;

pub use handler::EventHandler;
pub use partition::{ModuloPartitioner, Partitioner};

use crate::core::{PersisterError, Result};
use parking_lot::Mutex;
use ring::{SequencedRing, Wait};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Running dispatcher. Dropping it shuts it down.
pub struct Dispatcher<T> {
    ring: Arc<SequencedRing<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_consumers: usize,
}

impl<T> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("capacity", &self.ring.capacity())
            .field("published", &self.ring.published())
            .field("num_consumers", &self.num_consumers)
            .finish()
    }
}

impl<T: Send + Sync + 'static> Dispatcher<T> {
    /// Start building a dispatcher over a ring of `ring_buffer_size` slots.
    pub fn builder(ring_buffer_size: usize) -> DispatcherBuilder<T> {
        DispatcherBuilder::new(ring_buffer_size)
    }

    /// Publish one item at the next sequence number.
    ///
    /// Blocks while the ring is full. Never drops; fails only once the
    /// dispatcher is shut down.
    pub fn publish(&self, item: T) -> Result<u64> {
        self.ring.publish(item)
    }

    /// Stop accepting publishes, let consumers drain what was already
    /// published, run their shutdown hooks, and join the threads.
    pub fn shutdown(&self) {
        self.ring.close();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let name = worker.thread().name().unwrap_or("consumer").to_string();
            if worker.join().is_err() {
                tracing::error!(thread = %name, "Consumer thread panicked");
            }
        }
    }
}

impl<T> Dispatcher<T> {
    /// Number of items published so far.
    pub fn published(&self) -> u64 {
        self.ring.published()
    }

    /// Slots a producer can fill before blocking.
    pub fn remaining_capacity(&self) -> usize {
        self.ring.remaining_capacity()
    }

    /// Ring slot count.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Number of registered consumers.
    pub fn num_consumers(&self) -> usize {
        self.num_consumers
    }

    /// True once [`Dispatcher::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.ring.is_closed()
    }
}

impl<T> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        self.ring.close();
        for worker in self.workers.get_mut().drain(..) {
            let _ = worker.join();
        }
    }
}

/// Collects consumers and ring settings, then starts the threads.
pub struct DispatcherBuilder<T> {
    ring_buffer_size: usize,
    wait_timeout: Option<Duration>,
    thread_name: String,
    handlers: Vec<Box<dyn EventHandler<T>>>,
}

impl<T: Send + Sync + 'static> DispatcherBuilder<T> {
    /// Builder for a ring of `ring_buffer_size` slots and no consumers yet.
    pub fn new(ring_buffer_size: usize) -> Self {
        Self {
            ring_buffer_size,
            wait_timeout: None,
            thread_name: "persister-processor".to_string(),
            handlers: Vec::new(),
        }
    }

    /// How long a consumer waits for new items before calling
    /// [`EventHandler::on_timeout`]. `None` waits indefinitely.
    pub fn wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Prefix of consumer thread names; the ordinal is appended.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Register consumers; their position becomes their ordinal.
    pub fn handle_events_with<H, I>(mut self, handlers: I) -> Self
    where
        H: EventHandler<T> + 'static,
        I: IntoIterator<Item = H>,
    {
        self.handlers
            .extend(handlers.into_iter().map(|h| Box::new(h) as Box<dyn EventHandler<T>>));
        self
    }

    /// Register already boxed consumers.
    pub fn handle_boxed_events_with(mut self, handlers: Vec<Box<dyn EventHandler<T>>>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Allocate the ring and start one thread per consumer.
    pub fn start(self) -> Result<Dispatcher<T>> {
        let num_consumers = self.handlers.len();
        let ring = Arc::new(SequencedRing::new(self.ring_buffer_size, num_consumers)?);

        let mut workers = Vec::with_capacity(num_consumers);
        for (ordinal, handler) in self.handlers.into_iter().enumerate() {
            let ring_clone = Arc::clone(&ring);
            let timeout = self.wait_timeout;
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}", self.thread_name, ordinal))
                .spawn(move || run_consumer(ring_clone, ordinal, handler, timeout));

            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    ring.close();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(PersisterError::construction(format!(
                        "failed to spawn consumer {}: {}",
                        ordinal, e
                    )));
                },
            }
        }

        tracing::debug!(
            capacity = ring.capacity(),
            consumers = num_consumers,
            "Dispatcher started"
        );

        Ok(Dispatcher {
            ring,
            workers: Mutex::new(workers),
            num_consumers,
        })
    }
}

/// Releases the consumer's gate when its thread exits for any reason, so a
/// dead consumer can never wedge producers.
struct GateRelease<'a, T> {
    ring: &'a SequencedRing<T>,
    ordinal: usize,
}

impl<T> Drop for GateRelease<'_, T> {
    fn drop(&mut self) {
        self.ring.mark_consumed(self.ordinal, u64::MAX);
    }
}

fn run_consumer<T>(
    ring: Arc<SequencedRing<T>>,
    ordinal: usize,
    mut handler: Box<dyn EventHandler<T>>,
    timeout: Option<Duration>,
) {
    let _gate = GateRelease {
        ring: &ring,
        ordinal,
    };
    handler.on_start();

    let mut next = 0u64;
    loop {
        match ring.wait_for(next, timeout) {
            Wait::Available(available) => {
                while next < available {
                    let end_of_batch = next + 1 == available;
                    let slot = ring.get(next);
                    if let Some(event) = slot.as_ref() {
                        if let Err(e) = handler.on_event(event, next, end_of_batch) {
                            tracing::error!(
                                ordinal,
                                sequence = next,
                                error = %e,
                                "Event handler failed"
                            );
                        }
                    }
                    drop(slot);
                    next += 1;
                }
                ring.mark_consumed(ordinal, next);
            },
            Wait::TimedOut => {
                if let Err(e) = handler.on_timeout() {
                    tracing::error!(ordinal, error = %e, "Timeout handler failed");
                }
            },
            Wait::Closed => break,
        }
    }

    handler.on_shutdown();
    tracing::debug!(ordinal, consumed = next, "Consumer stopped");
}
