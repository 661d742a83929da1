//! Table-change notifications and live query results.
//!
//! Writers publish the affected table on a broadcast channel after every
//! successful write. A live query holds a subscription that, on each event
//! for its table, re-runs the query and delivers a fresh full snapshot.
//! There is no per-row diffing and no backpressure guarantee beyond
//! "eventually consistent with the latest completed write"; a lagged
//! observer simply requeries.

use tokio::sync::mpsc;

/// Tables an observer can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Recipes,
    Appointments,
    ChatMessages,
}

/// Capacity of the per-database change feed. Events carry no payload, so a
/// small buffer is plenty; a lagged receiver requeries anyway.
pub(crate) const CHANGE_FEED_CAPACITY: usize = 64;

/// Buffer between a live query's worker and its consumer. The worker waits
/// for the consumer, so snapshots are never silently dropped.
pub(crate) const SNAPSHOT_BUFFER: usize = 8;

/// Receiving half of a live query.
///
/// The first snapshot arrives immediately after subscribing; later ones
/// arrive whenever the watched table changes. Dropping the handle (or
/// calling [`close`](Self::close)) ends the observation: the worker task
/// stops at its next delivery attempt.
pub struct LiveResults<T> {
    rx: mpsc::Receiver<Vec<T>>,
}

impl<T> LiveResults<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Vec<T>>) -> Self {
        Self { rx }
    }

    /// Wait for the next snapshot. Returns `None` once the observation has
    /// ended and buffered snapshots are drained.
    pub async fn next(&mut self) -> Option<Vec<T>> {
        self.rx.recv().await
    }

    /// Stop observing. Already-delivered snapshots can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
