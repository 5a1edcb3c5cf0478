use crate::core::catalog::Catalog;
use crate::core::models::App;
use std::time::Duration;

/// Typed messages flowing from the workers (poller, idlers) to the scheduler
/// and from the scheduler out to whatever consumes status (UI, logs).
///
/// Delivery is fire-and-forget over mpsc channels; events from a given worker
/// arrive in the order they were produced.
#[derive(Debug, Clone)]
pub enum Event {
    /// A fresh catalog snapshot was fetched; fully replaces the previous one.
    SnapshotReady(Catalog),
    /// A fetch failed; the previous snapshot stays in effect and the poller
    /// keeps its schedule.
    RefreshFailed(String),
    /// The refresh timer completed one cycle at the given interval.
    TimerTick(Duration),
    /// The refresh timer was cancelled.
    TimerStopped,
    /// Human-readable progress from a running idle session.
    StatusUpdate(String),
    /// One app exhausted its card drops (distinct from a requested stop).
    AppDone(App),
    /// Every member of a multi-idle set finished naturally.
    AllDone,
    /// An idler acknowledged shutdown; its task has ended.
    Finished,
}
