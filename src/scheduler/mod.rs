pub mod idle;
pub mod multi;
pub mod poller;

use crate::core::catalog::Catalog;
use crate::core::events::Event;
use crate::core::models::{App, AppId};
use crate::core::settings::{AutostartMode, Settings};
use crate::source::SnapshotSource;
use idle::{IdleSession, IdleTiming};
use multi::MultiIdleSession;
use poller::RefreshPoller;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// What is running right now. Single- and multi-session idling are mutually
/// exclusive; the scheduler is the only writer of this state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    None,
    Single(AppId),
    Multi(BTreeSet<AppId>),
}

impl SessionState {
    pub fn contains(&self, id: AppId) -> bool {
        match self {
            SessionState::None => false,
            SessionState::Single(active) => *active == id,
            SessionState::Multi(active) => active.contains(&id),
        }
    }
}

/// Control-side commands, serialized through the scheduler's event loop so
/// conflicting starts can never race into an inconsistent session state.
#[derive(Debug)]
pub enum Command {
    StartIdle(AppId),
    StartMultiIdle,
    Stop,
    /// Skip past the current app to the next one with drops remaining.
    Next,
    RefreshNow,
    Cleanup,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub default_refresh: Duration,
    pub idling_refresh: Duration,
    pub timing: IdleTiming,
    pub multi_idle_threshold: usize,
    pub autostart: AutostartMode,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_refresh: settings.default_refresh_interval(),
            idling_refresh: settings.idling_refresh_interval(),
            timing: IdleTiming::from_settings(&settings.idle),
            multi_idle_threshold: settings.multi_idle.threshold,
            autostart: settings.autostart,
        }
    }
}

enum ActiveSession {
    Single(IdleSession),
    Multi(MultiIdleSession),
}

impl ActiveSession {
    fn request_stop(&self) {
        match self {
            ActiveSession::Single(session) => session.request_stop(),
            ActiveSession::Multi(session) => session.request_stop(),
        }
    }

    async fn join(self) {
        match self {
            ActiveSession::Single(session) => session.join().await,
            ActiveSession::Multi(session) => session.join().await,
        }
    }
}

/// Client side of a running scheduler. Commands are fire-and-forget; state
/// is observable through the `session` and `catalog` watch channels.
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    pub session: watch::Receiver<SessionState>,
    pub catalog: watch::Receiver<Catalog>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn start_idle(&self, app: AppId) {
        let _ = self.commands.send(Command::StartIdle(app));
    }

    pub fn start_multi_idle(&self) {
        let _ = self.commands.send(Command::StartMultiIdle);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn next(&self) {
        let _ = self.commands.send(Command::Next);
    }

    pub fn refresh_now(&self) {
        let _ = self.commands.send(Command::RefreshNow);
    }

    /// Stop whatever is active, wait for full worker shutdown and return
    /// once the scheduler task has exited.
    pub async fn cleanup(self) {
        let _ = self.commands.send(Command::Cleanup);
        let _ = self.join.await;
    }
}

/// The orchestrator: sole owner of `SessionState`, router between the
/// refresh poller and the active idler(s), and the one place where
/// start/stop/switch/advance policy lives.
pub struct Scheduler {
    config: SchedulerConfig,
    poller: RefreshPoller,
    catalog_tx: watch::Sender<Catalog>,
    session_tx: watch::Sender<SessionState>,
    worker_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    outbound: mpsc::UnboundedSender<Event>,
    active: Option<ActiveSession>,
    /// App to start once the session being torn down reports `Finished`.
    pending_start: Option<AppId>,
    /// One-shot continuation of the multi-to-single handoff: consumed by the
    /// next snapshot (or refresh failure) after the multi set drained.
    single_after_refresh: bool,
    /// An explicit stop was issued while a session was active. A worker that
    /// completed naturally never observes the stop watch, so its queued
    /// completion events must not auto-advance or hand off; cleared once the
    /// session is fully torn down.
    stop_requested: bool,
    /// Consumed when the first snapshot arrives.
    autostart: Option<AutostartMode>,
    shutting_down: bool,
    running: bool,
}

impl Scheduler {
    /// Spawn the scheduler task. The poller starts at the default cadence
    /// and an initial fetch is forced so the catalog populates right away.
    pub fn spawn(
        source: Arc<dyn SnapshotSource>,
        config: SchedulerConfig,
    ) -> (SchedulerHandle, mpsc::UnboundedReceiver<Event>) {
        let (worker_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (catalog_tx, catalog_rx) = watch::channel(Catalog::default());
        let (session_tx, session_rx) = watch::channel(SessionState::None);

        let mut poller = RefreshPoller::new(source, worker_tx.clone());
        poller.start_timer(config.default_refresh);
        poller.update_apps();

        let autostart = match config.autostart {
            AutostartMode::None => None,
            mode => Some(mode),
        };

        let scheduler = Scheduler {
            config,
            poller,
            catalog_tx,
            session_tx,
            worker_tx,
            events_rx,
            commands_rx,
            outbound: outbound_tx,
            active: None,
            pending_start: None,
            single_after_refresh: false,
            stop_requested: false,
            autostart,
            shutting_down: false,
            running: true,
        };
        let join = tokio::spawn(scheduler.run());

        (
            SchedulerHandle {
                commands: commands_tx,
                session: session_rx,
                catalog: catalog_rx,
                join,
            },
            outbound_rx,
        )
    }

    async fn run(mut self) {
        while self.running {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // All handles dropped; nothing can drive us anymore
                    None => self.running = false,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }
        // Flush whatever the workers reported during teardown
        while let Ok(event) = self.events_rx.try_recv() {
            let _ = self.outbound.send(event);
        }
        tracing::debug!("Scheduler loop ended");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartIdle(id) => {
                if self.active.is_some() {
                    // Tear down the running session first; the new one
                    // starts once Finished comes back.
                    tracing::info!(app = id, "Switch requested, stopping active session first");
                    self.pending_start = Some(id);
                    self.request_stop();
                } else {
                    self.start_single(id);
                }
            }
            Command::StartMultiIdle => self.start_multi(),
            Command::Stop => {
                self.pending_start = None;
                self.single_after_refresh = false;
                if self.active.is_some() {
                    self.stop_requested = true;
                }
                self.request_stop();
            }
            Command::Next => self.skip_to_next(),
            Command::RefreshNow => self.poller.update_apps(),
            Command::Cleanup => {
                tracing::info!("Cleanup requested");
                self.shutting_down = true;
                self.pending_start = None;
                self.single_after_refresh = false;
                if self.active.is_some() {
                    self.request_stop();
                } else {
                    self.poller.stop_timer();
                    self.running = false;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match &event {
            Event::SnapshotReady(catalog) => self.on_snapshot(catalog.clone()),
            Event::RefreshFailed(reason) => self.on_refresh_failed(reason),
            Event::AppDone(app) => self.on_app_done(app.clone()).await,
            Event::AllDone => {
                if self.stop_requested {
                    tracing::info!("Multi-idle set drained during stop, no handoff");
                } else {
                    tracing::info!("Multi-idle set drained");
                    self.single_after_refresh = true;
                }
            }
            Event::Finished => self.on_finished().await,
            Event::StatusUpdate(message) => tracing::debug!(%message, "Idle status"),
            Event::TimerTick(_) | Event::TimerStopped => {}
        }
        // State first, then the event, so observers never see an event
        // ahead of the state it implies
        let _ = self.outbound.send(event);
    }

    fn on_snapshot(&mut self, catalog: Catalog) {
        tracing::debug!(apps = catalog.len(), "Publishing catalog snapshot");
        let _ = self.catalog_tx.send(catalog);

        if let Some(mode) = self.autostart.take() {
            if self.active.is_none() {
                match mode {
                    AutostartMode::Idle => {
                        tracing::info!("Autostart: single idle");
                        self.start_next_single();
                    }
                    AutostartMode::MultiIdle => {
                        tracing::info!("Autostart: multi-idle");
                        self.start_multi();
                    }
                    AutostartMode::None => {}
                }
            }
        }

        if self.single_after_refresh && self.active.is_none() {
            self.single_after_refresh = false;
            self.start_next_single();
        }
    }

    fn on_refresh_failed(&mut self, reason: &str) {
        tracing::warn!(%reason, "Library refresh failed");
        if self.single_after_refresh && self.active.is_none() {
            // The reconciling refresh stalled; fall back to the last-known
            // snapshot instead of blocking the handoff indefinitely.
            self.single_after_refresh = false;
            self.start_next_single();
        }
    }

    async fn on_app_done(&mut self, app: App) {
        let state = self.session_tx.borrow().clone();
        match state {
            SessionState::Single(_) => {
                // The session task ended on its own; reap it before moving on
                if let Some(session) = self.active.take() {
                    session.join().await;
                }

                if self.shutting_down {
                    self.set_session(SessionState::None);
                    self.poller.stop_timer();
                    self.running = false;
                    return;
                }

                if self.stop_requested {
                    // The stop raced a natural completion and the worker
                    // never saw it; honor it here instead of advancing
                    self.stop_requested = false;
                    self.set_session(SessionState::None);
                    self.poller.start_timer(self.config.default_refresh);
                    self.poller.update_apps();
                    if let Some(pending) = self.pending_start.take() {
                        self.start_single(pending);
                    }
                    return;
                }

                if let Some(pending) = self.pending_start.take() {
                    self.set_session(SessionState::None);
                    self.start_single(pending);
                    return;
                }

                let next = self.catalog_tx.borrow().next_eligible(app.id).map(|a| a.id);
                match next {
                    Some(id) => {
                        tracing::info!(done = app.id, next = id, "Advancing to next app");
                        // Direct hand-off, no pass through an idle-none state
                        self.start_single(id);
                    }
                    None => {
                        tracing::info!(done = app.id, "No eligible app remains, stopping");
                        self.set_session(SessionState::None);
                        self.poller.start_timer(self.config.default_refresh);
                        self.poller.update_apps();
                    }
                }
            }
            SessionState::Multi(mut members) => {
                members.remove(&app.id);
                tracing::info!(app = app.id, remaining = members.len(), "Multi-idle member done");
                self.set_session(SessionState::Multi(members));
            }
            SessionState::None => {
                tracing::debug!(app = app.id, "AppDone with no active session");
            }
        }
    }

    async fn on_finished(&mut self) {
        let Some(session) = self.active.take() else {
            tracing::debug!("Finished with no active session");
            return;
        };
        session.join().await;
        self.set_session(SessionState::None);
        self.stop_requested = false;
        tracing::info!("Idle session torn down");

        if self.shutting_down {
            self.poller.stop_timer();
            self.running = false;
            return;
        }

        // Back to the non-idling cadence and reconcile with fresh data
        self.poller.start_timer(self.config.default_refresh);
        self.poller.update_apps();

        if let Some(pending) = self.pending_start.take() {
            self.start_single(pending);
        }
    }

    fn start_single(&mut self, id: AppId) {
        debug_assert!(self.active.is_none(), "start_single with a session active");
        let app = {
            let catalog = self.catalog_tx.borrow();
            match catalog.get(id) {
                Some(app) if app.idle_eligible() => app.clone(),
                Some(_) => {
                    tracing::warn!(app = id, "Refusing to idle app with no drops remaining");
                    return;
                }
                None => {
                    tracing::warn!(app = id, "Unknown app id, not starting idle");
                    return;
                }
            }
        };

        tracing::info!(
            app = app.id,
            name = %app.name,
            drops = app.remaining_drops,
            "Starting idle session"
        );
        let session = IdleSession::spawn(
            app,
            self.catalog_tx.subscribe(),
            self.worker_tx.clone(),
            self.config.timing,
        );
        self.active = Some(ActiveSession::Single(session));
        self.set_session(SessionState::Single(id));
        self.poller.start_timer(self.config.idling_refresh);
    }

    fn start_multi(&mut self) {
        if self.active.is_some() {
            tracing::warn!("Multi-idle requested while a session is active, ignoring");
            return;
        }

        let candidates = self.catalog_tx.borrow().refund_candidates();
        if candidates.len() < self.config.multi_idle_threshold {
            tracing::warn!(
                candidates = candidates.len(),
                threshold = self.config.multi_idle_threshold,
                "Not enough refund-eligible apps for multi-idle"
            );
            return;
        }

        let members: BTreeSet<AppId> = candidates.iter().map(|a| a.id).collect();
        tracing::info!(apps = candidates.len(), "Starting multi-idle session");
        let session = MultiIdleSession::spawn(
            candidates,
            self.catalog_tx.subscribe(),
            self.worker_tx.clone(),
            self.config.timing,
        );
        self.active = Some(ActiveSession::Multi(session));
        self.set_session(SessionState::Multi(members));
        self.poller.start_timer(self.config.idling_refresh);
    }

    /// Manual skip: stop the current single session and move on to the next
    /// app with drops, or start one from the top when nothing is running.
    fn skip_to_next(&mut self) {
        let state = self.session_tx.borrow().clone();
        match state {
            SessionState::Single(current) => {
                let next = self.catalog_tx.borrow().next_eligible(current).map(|a| a.id);
                match next {
                    Some(id) => {
                        tracing::info!(from = current, to = id, "Skipping to next app");
                        self.pending_start = Some(id);
                        self.request_stop();
                    }
                    None => {
                        tracing::info!(from = current, "Nothing to skip to, stopping");
                        self.stop_requested = true;
                        self.request_stop();
                    }
                }
            }
            SessionState::Multi(_) => {
                tracing::warn!("Skip has no meaning during multi-idle, ignoring");
            }
            SessionState::None => self.start_next_single(),
        }
    }

    fn start_next_single(&mut self) {
        let next = self.catalog_tx.borrow().next_eligible(0).map(|a| a.id);
        match next {
            Some(id) => self.start_single(id),
            None => tracing::info!("No app with remaining drops to idle"),
        }
    }

    fn request_stop(&self) {
        match &self.active {
            Some(session) => session.request_stop(),
            None => tracing::debug!("Stop requested with no active session"),
        }
    }

    fn set_session(&mut self, state: SessionState) {
        let _ = self.session_tx.send(state);
    }
}
