//! Consumer capability driven by the dispatcher threads.

use crate::core::Result;

/// Consumer side of the dispatcher.
///
/// Every registered handler is offered every published event on its own
/// thread, in sequence order. Handlers decide for themselves which events to
/// act on (see [`Partitioner`](super::Partitioner)).
pub trait EventHandler<T>: Send {
    /// Called once per published event.
    ///
    /// `end_of_batch` is true for the last event currently available, i.e.
    /// the consumer is about to wait for more.
    fn on_event(&mut self, event: &T, sequence: u64, end_of_batch: bool) -> Result<()>;

    /// Called when no event arrived within the dispatcher's wait timeout.
    fn on_timeout(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called on the consumer thread before the first event.
    fn on_start(&mut self) {}

    /// Called after every published event has been offered and the
    /// dispatcher is shutting down.
    fn on_shutdown(&mut self) {}
}
