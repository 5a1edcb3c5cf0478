use crate::core::catalog::Catalog;
use crate::core::events::Event;
use crate::core::models::App;
use crate::scheduler::idle::{run_session, IdleTiming, SessionOutcome};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

/// A set of apps idling concurrently, one sub-session per app, sharing the
/// session lifecycle but not serialized with each other.
///
/// Each sub-session emits its own `AppDone` when its drops run out. `AllDone`
/// fires once when every member finished naturally; `Finished` always fires
/// last, after all sub-sessions have ended (stop included).
pub struct MultiIdleSession {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MultiIdleSession {
    pub fn spawn(
        apps: Vec<App>,
        catalog: watch::Receiver<Catalog>,
        events: mpsc::UnboundedSender<Event>,
        timing: IdleTiming,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(supervise(apps, catalog, events, stop_rx, timing));
        Self {
            stop: stop_tx,
            handle,
        }
    }

    /// Advisory stop for all sub-sessions; `Finished` fires once every one
    /// of them has acknowledged.
    pub fn request_stop(&self) {
        let _ = self.stop.send(true);
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

async fn supervise(
    mut apps: Vec<App>,
    catalog: watch::Receiver<Catalog>,
    events: mpsc::UnboundedSender<Event>,
    stop: watch::Receiver<bool>,
    timing: IdleTiming,
) {
    // Apps without drops never enter the active set
    apps.retain(App::idle_eligible);
    let members = apps.len();

    let _ = events.send(Event::StatusUpdate(format!(
        "Multi-idling {members} apps in refund window"
    )));

    let mut sessions = JoinSet::new();
    for app in apps {
        sessions.spawn(run_session(
            app,
            catalog.clone(),
            events.clone(),
            stop.clone(),
            timing,
        ));
    }

    let mut done = 0usize;
    while let Some(result) = sessions.join_next().await {
        match result {
            Ok(SessionOutcome::Done) => done += 1,
            Ok(SessionOutcome::Stopped) => {}
            Err(e) => tracing::warn!(error = %e, "Multi-idle sub-session panicked"),
        }
    }

    if members > 0 && done == members {
        let _ = events.send(Event::AllDone);
    }
    let _ = events.send(Event::Finished);
}
