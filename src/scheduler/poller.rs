use crate::core::events::Event;
use crate::source::SnapshotSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Restartable periodic refresh of the library catalog.
///
/// Owned by the scheduler, which is the only mutator of the timer state.
/// Each tick fetches a snapshot, publishes `SnapshotReady` (or
/// `RefreshFailed` on a transient error), then `TimerTick`, and reschedules.
pub struct RefreshPoller {
    source: Arc<dyn SnapshotSource>,
    events: mpsc::UnboundedSender<Event>,
    timer: Option<JoinHandle<()>>,
}

impl RefreshPoller {
    pub fn new(source: Arc<dyn SnapshotSource>, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            source,
            events,
            timer: None,
        }
    }

    /// (Re)start the recurring refresh. Any previous timer is cancelled
    /// first, so repeated calls leave exactly one timer running. Restarting
    /// does not trigger an immediate fetch; the first one happens a full
    /// interval later.
    pub fn start_timer(&mut self, interval: Duration) {
        if let Some(previous) = self.timer.take() {
            previous.abort();
        }

        tracing::debug!(interval_secs = interval.as_secs(), "Starting refresh timer");
        let source = Arc::clone(&self.source);
        let events = self.events.clone();
        self.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // An interval fires immediately on creation; swallow that so a
            // cadence change does not refetch right away
            ticker.tick().await;
            loop {
                ticker.tick().await;
                fetch_and_publish(&source, &events).await;
                let _ = events.send(Event::TimerTick(interval));
            }
        }));
    }

    /// Cancel the recurring refresh; no-op when not running.
    pub fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
            tracing::debug!("Refresh timer stopped");
            let _ = self.events.send(Event::TimerStopped);
        }
    }

    /// Immediate out-of-band fetch; the timer's own schedule is untouched.
    pub fn update_apps(&self) {
        let source = Arc::clone(&self.source);
        let events = self.events.clone();
        tokio::spawn(async move {
            fetch_and_publish(&source, &events).await;
        });
    }
}

impl Drop for RefreshPoller {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

async fn fetch_and_publish(
    source: &Arc<dyn SnapshotSource>,
    events: &mpsc::UnboundedSender<Event>,
) {
    match source.fetch_snapshot().await {
        Ok(catalog) => {
            let _ = events.send(Event::SnapshotReady(catalog));
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to fetch library snapshot");
            let _ = events.send(Event::RefreshFailed(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::Catalog;
    use crate::core::models::App;
    use crate::source::testing::MockSource;
    use std::collections::HashMap;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn small_catalog() -> Catalog {
        let mut apps = HashMap::new();
        apps.insert(
            1,
            App {
                id: 1,
                name: "Game 1".to_string(),
                icon: None,
                header: None,
                remaining_drops: 2,
                play_time: 0.5,
            },
        );
        Catalog::from_apps(apps)
    }

    fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn count_snapshots(events: &[Event]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, Event::SnapshotReady(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_timer_is_idempotent() {
        let source = MockSource::new(small_catalog());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut poller = RefreshPoller::new(source.clone(), events_tx);

        // Two starts in a row must leave exactly one timer at 50ms cadence
        poller.start_timer(Duration::from_millis(50));
        poller.start_timer(Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(225)).await;

        let events = drain(&mut events_rx);
        assert_eq!(count_snapshots(&events), 4);
        assert_eq!(source.fetch_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_event_carries_the_interval() {
        let source = MockSource::new(small_catalog());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut poller = RefreshPoller::new(source, events_tx);

        poller.start_timer(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(60)).await;

        let events = drain(&mut events_rx);
        assert!(matches!(events[0], Event::SnapshotReady(_)));
        match events[1] {
            Event::TimerTick(interval) => assert_eq!(interval, Duration::from_millis(50)),
            ref other => panic!("expected TimerTick, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_keeps_the_schedule() {
        let source = MockSource::new(small_catalog());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut poller = RefreshPoller::new(source.clone(), events_tx);

        source.set_failing(true);
        poller.start_timer(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(120)).await;

        let events = drain(&mut events_rx);
        let failures = events
            .iter()
            .filter(|e| matches!(e, Event::RefreshFailed(_)))
            .count();
        assert_eq!(failures, 2);
        assert_eq!(count_snapshots(&events), 0);

        // Recovery: the next scheduled tick still happens and succeeds
        source.set_failing(false);
        tokio::time::sleep(Duration::from_millis(60)).await;
        let events = drain(&mut events_rx);
        assert_eq!(count_snapshots(&events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_apps_is_out_of_band() {
        let source = MockSource::new(small_catalog());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let poller = RefreshPoller::new(source.clone(), events_tx);

        // No timer running; a forced refresh still publishes a snapshot
        poller.update_apps();
        match events_rx.recv().await.unwrap() {
            Event::SnapshotReady(catalog) => assert_eq!(catalog.len(), 1),
            other => panic!("expected SnapshotReady, got {other:?}"),
        }
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timer_cancels_and_is_noop_when_idle() {
        let source = MockSource::new(small_catalog());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut poller = RefreshPoller::new(source.clone(), events_tx);

        poller.start_timer(Duration::from_millis(50));
        poller.stop_timer();

        let event = events_rx.recv().await.unwrap();
        assert!(matches!(event, Event::TimerStopped));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count_snapshots(&drain(&mut events_rx)), 0);
        assert_eq!(source.fetch_count(), 0);

        // Second stop with no timer running: no event
        poller.stop_timer();
        assert!(events_rx.try_recv().is_err());
    }
}
