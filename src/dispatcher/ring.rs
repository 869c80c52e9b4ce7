//! Bounded sequenced ring shared by one producer side and N consumers.
//!
//! Every published item gets the next global sequence number and is stored
//! in slot `sequence & mask`. Each consumer tracks how far it has read; a slot
//! is only reused once every consumer has moved past it, which gives the
//! producer blocking backpressure instead of drops or unbounded growth.

use crate::core::{PersisterError, Result};
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Outcome of a consumer waiting for a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    /// Everything below this (exclusive) sequence is readable.
    Available(u64),
    /// Nothing new arrived before the timeout.
    TimedOut,
    /// The ring is closed and the consumer has read everything published.
    Closed,
}

pub(crate) struct SequencedRing<T> {
    slots: Box<[RwLock<Option<T>>]>,
    capacity: u64,
    mask: u64, // For fast modulo via bitwise AND
    /// Count of published items, i.e. the next sequence to become readable
    published: CachePadded<AtomicU64>,
    /// Per consumer: count of sequences fully handled
    consumed: Box<[CachePadded<AtomicU64>]>,
    /// Next sequence to claim; held for the whole publish to keep order
    claim: Mutex<u64>,
    signal: Mutex<()>,
    cond: Condvar,
    closed: AtomicBool,
}

impl<T> SequencedRing<T> {
    pub(crate) fn new(capacity: usize, consumers: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(PersisterError::construction(format!(
                "ring buffer size must be a power of two greater than 0, got {}",
                capacity
            )));
        }
        if consumers == 0 {
            return Err(PersisterError::construction("at least one consumer is required"));
        }

        let slots = (0..capacity).map(|_| RwLock::new(None)).collect::<Vec<_>>();
        let consumed = (0..consumers)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect::<Vec<_>>();

        Ok(Self {
            slots: slots.into_boxed_slice(),
            capacity: capacity as u64,
            mask: capacity as u64 - 1,
            published: CachePadded::new(AtomicU64::new(0)),
            consumed: consumed.into_boxed_slice(),
            claim: Mutex::new(0),
            signal: Mutex::new(()),
            cond: Condvar::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Store `item` at the next sequence, blocking while the ring is full.
    pub(crate) fn publish(&self, item: T) -> Result<u64> {
        let mut next = self.claim.lock();
        if self.is_closed() {
            return Err(PersisterError::Shutdown);
        }

        let sequence = *next;
        if sequence >= self.capacity {
            // Slot is free once every consumer has handled `sequence - capacity`
            let wrap_point = sequence - self.capacity;
            if self.min_consumed() <= wrap_point {
                let mut guard = self.signal.lock();
                while self.min_consumed() <= wrap_point {
                    if self.is_closed() {
                        return Err(PersisterError::Shutdown);
                    }
                    self.cond.wait(&mut guard);
                }
            }
        }

        *self.slots[(sequence & self.mask) as usize].write() = Some(item);
        *next = sequence + 1;
        self.published.store(sequence + 1, Ordering::Release);
        drop(next);

        self.notify_all();
        Ok(sequence)
    }

    /// Wait until `sequence` is readable, the timeout passes, or the ring closes.
    pub(crate) fn wait_for(&self, sequence: u64, timeout: Option<Duration>) -> Wait {
        let published = self.published.load(Ordering::Acquire);
        if published > sequence {
            return Wait::Available(published);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.signal.lock();
        loop {
            let published = self.published.load(Ordering::Acquire);
            if published > sequence {
                return Wait::Available(published);
            }
            if self.is_closed() {
                drop(guard);
                // A publish that passed its closed check holds `claim` until
                // its item is visible
                let _claim = self.claim.lock();
                let published = self.published.load(Ordering::Acquire);
                if published > sequence {
                    return Wait::Available(published);
                }
                return Wait::Closed;
            }

            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut guard, deadline).timed_out() {
                        let published = self.published.load(Ordering::Acquire);
                        if published > sequence {
                            return Wait::Available(published);
                        }
                        return Wait::TimedOut;
                    }
                },
                None => self.cond.wait(&mut guard),
            }
        }
    }

    /// Read access to a published slot.
    pub(crate) fn get(&self, sequence: u64) -> RwLockReadGuard<'_, Option<T>> {
        self.slots[(sequence & self.mask) as usize].read()
    }

    /// Record that `consumer` has handled every sequence below `upto`.
    pub(crate) fn mark_consumed(&self, consumer: usize, upto: u64) {
        self.consumed[consumer].store(upto, Ordering::Release);
        self.notify_all();
    }

    /// Stop accepting publishes and wake every waiter.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Free slots from the producer's point of view.
    pub(crate) fn remaining_capacity(&self) -> usize {
        let in_flight = self.published().saturating_sub(self.min_consumed());
        self.capacity.saturating_sub(in_flight) as usize
    }

    fn min_consumed(&self) -> u64 {
        self.consumed
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .min()
            .unwrap_or(u64::MAX)
    }

    fn notify_all(&self) {
        let _guard = self.signal.lock();
        self.cond.notify_all();
    }
}
