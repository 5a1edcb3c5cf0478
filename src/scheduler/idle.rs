use crate::core::catalog::Catalog;
use crate::core::events::Event;
use crate::core::models::App;
use crate::core::settings::IdleSettings;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Delays between simulated play ticks. The remote service credits drops
/// while an app looks "played", so the loop only needs to wake up to
/// re-check drop counts; the last drop gets a shorter cycle.
#[derive(Debug, Clone, Copy)]
pub struct IdleTiming {
    pub tick: Duration,
    pub final_tick: Duration,
}

impl IdleTiming {
    pub fn from_settings(idle: &IdleSettings) -> Self {
        Self {
            tick: Duration::from_secs(idle.tick_secs),
            final_tick: Duration::from_secs(idle.final_tick_secs),
        }
    }

    pub fn delay_for(&self, remaining_drops: u32) -> Duration {
        if remaining_drops > 1 {
            self.tick
        } else {
            self.final_tick
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SessionOutcome {
    /// The app ran out of drops (or vanished from the catalog).
    Done,
    /// A stop request was honored.
    Stopped,
}

/// One app's idle loop, shared between the single-session idler and each
/// multi-idle sub-session.
///
/// The app view is refreshed from the latest catalog snapshot at every wake;
/// a snapshot arriving mid-tick never interrupts the delay in progress. At
/// zero remaining drops the loop emits `AppDone` and returns `Done`; a stop
/// request wins over the current tick and returns `Stopped`.
pub(crate) async fn run_session(
    mut app: App,
    catalog: watch::Receiver<Catalog>,
    events: mpsc::UnboundedSender<Event>,
    mut stop: watch::Receiver<bool>,
    timing: IdleTiming,
) -> SessionOutcome {
    loop {
        let latest = catalog.borrow().get(app.id).cloned();
        match latest {
            Some(current) => app = current,
            // Gone from the snapshot: nothing left to idle for
            None => app.remaining_drops = 0,
        }

        if app.remaining_drops == 0 {
            tracing::info!(app = app.id, name = %app.name, "All cards dropped");
            let _ = events.send(Event::AppDone(app));
            return SessionOutcome::Done;
        }

        let delay = timing.delay_for(app.remaining_drops);
        let _ = events.send(Event::StatusUpdate(format!(
            "Idling {} ({} drops remaining), next check in {}s",
            app.name,
            app.remaining_drops,
            delay.as_secs()
        )));

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    tracing::debug!(app = app.id, "Idle session stop acknowledged");
                    return SessionOutcome::Stopped;
                }
            }
        }
    }
}

/// Exactly one app idling at a time. Natural completion ends with `AppDone`
/// only; a requested stop is acknowledged with `Finished` once the in-flight
/// tick is cancelled.
pub struct IdleSession {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl IdleSession {
    pub fn spawn(
        app: App,
        catalog: watch::Receiver<Catalog>,
        events: mpsc::UnboundedSender<Event>,
        timing: IdleTiming,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let outcome = run_session(app, catalog, events.clone(), stop_rx, timing).await;
            if outcome == SessionOutcome::Stopped {
                let _ = events.send(Event::Finished);
            }
        });
        Self {
            stop: stop_tx,
            handle,
        }
    }

    /// Advisory stop; completion is signaled by the `Finished` event.
    pub fn request_stop(&self) {
        let _ = self.stop.send(true);
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn make_app(id: u32, remaining_drops: u32) -> App {
        App {
            id,
            name: format!("Game {id}"),
            icon: None,
            header: None,
            remaining_drops,
            play_time: 9.0,
        }
    }

    fn catalog_of(apps: &[(u32, u32)]) -> Catalog {
        let map: HashMap<u32, App> = apps
            .iter()
            .map(|&(id, drops)| (id, make_app(id, drops)))
            .collect();
        Catalog::from_apps(map)
    }

    fn timing() -> IdleTiming {
        IdleTiming {
            tick: Duration::from_millis(50),
            final_tick: Duration::from_millis(10),
        }
    }

    async fn next_skipping_status(rx: &mut UnboundedReceiver<Event>) -> Event {
        loop {
            match rx.recv().await.expect("event channel closed") {
                Event::StatusUpdate(_) => continue,
                other => return other,
            }
        }
    }

    #[test]
    fn test_delay_shortens_on_last_drop() {
        let timing = IdleTiming {
            tick: Duration::from_secs(900),
            final_tick: Duration::from_secs(300),
        };
        assert_eq!(timing.delay_for(3), Duration::from_secs(900));
        assert_eq!(timing.delay_for(2), Duration::from_secs(900));
        assert_eq!(timing.delay_for(1), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_reports_progress_and_detects_completion() {
        let (catalog_tx, catalog_rx) = watch::channel(catalog_of(&[(1, 2)]));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session = IdleSession::spawn(make_app(1, 2), catalog_rx, events_tx, timing());

        match events_rx.recv().await.unwrap() {
            Event::StatusUpdate(msg) => assert!(msg.contains("Game 1")),
            other => panic!("expected StatusUpdate, got {other:?}"),
        }

        // Drops exhausted in a fresher snapshot; detected after the
        // in-flight tick, without emitting Finished
        catalog_tx.send(catalog_of(&[(1, 0)])).unwrap();
        match next_skipping_status(&mut events_rx).await {
            Event::AppDone(app) => assert_eq!(app.id, 1),
            other => panic!("expected AppDone, got {other:?}"),
        }

        session.join().await;
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_request_is_acknowledged_with_finished() {
        let (_catalog_tx, catalog_rx) = watch::channel(catalog_of(&[(1, 5)]));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session = IdleSession::spawn(make_app(1, 5), catalog_rx, events_tx, timing());

        // Let it settle into its first tick
        match events_rx.recv().await.unwrap() {
            Event::StatusUpdate(_) => {}
            other => panic!("expected StatusUpdate, got {other:?}"),
        }

        session.request_stop();
        match next_skipping_status(&mut events_rx).await {
            Event::Finished => {}
            other => panic!("expected Finished, got {other:?}"),
        }
        session.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_app_missing_from_snapshot_counts_as_done() {
        let (_catalog_tx, catalog_rx) = watch::channel(Catalog::default());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session = IdleSession::spawn(make_app(7, 3), catalog_rx, events_tx, timing());

        match events_rx.recv().await.unwrap() {
            Event::AppDone(app) => {
                assert_eq!(app.id, 7);
                assert_eq!(app.remaining_drops, 0);
            }
            other => panic!("expected AppDone, got {other:?}"),
        }
        session.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_does_not_interrupt_tick_in_progress() {
        let (catalog_tx, catalog_rx) = watch::channel(catalog_of(&[(1, 5)]));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _session = IdleSession::spawn(make_app(1, 5), catalog_rx, events_tx, timing());

        match events_rx.recv().await.unwrap() {
            Event::StatusUpdate(_) => {}
            other => panic!("expected StatusUpdate, got {other:?}"),
        }

        // Same-drop snapshot mid-tick: no extra status update until the
        // current delay elapses
        catalog_tx.send(catalog_of(&[(1, 5)])).unwrap();
        assert!(events_rx.try_recv().is_err());
    }
}
