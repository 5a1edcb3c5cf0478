use crate::core::events::Event;
use crate::core::settings::Settings;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::source::{HttpSource, SnapshotSource};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Run the idling daemon until interrupted. Everything interesting happens
/// inside the scheduler task; this loop only turns its outbound events into
/// log lines and handles shutdown.
pub async fn run() -> Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    settings.validate()?;
    tracing::info!(
        endpoint = %settings.source.endpoint,
        autostart = ?settings.autostart,
        "Starting card idler daemon"
    );

    let source = Arc::new(HttpSource::new(&settings.source));
    if !source.is_reachable().await {
        tracing::warn!("Library service not reachable yet, will keep retrying");
    }

    let config = SchedulerConfig::from_settings(&settings);
    let (handle, mut events) = Scheduler::spawn(source, config);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => {
                    tracing::error!("Scheduler ended unexpectedly");
                    break;
                }
            },
        }
    }

    drain_and_cleanup(handle, events).await;
    tracing::info!("Daemon stopped");
    Ok(())
}

async fn drain_and_cleanup(
    handle: crate::scheduler::SchedulerHandle,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    // Keep logging the teardown events while cleanup runs
    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });
    handle.cleanup().await;
    let _ = logger.await;
}

fn log_event(event: &Event) {
    match event {
        Event::SnapshotReady(catalog) => tracing::info!(
            apps = catalog.len(),
            to_idle = catalog.games_to_idle(),
            in_refund = catalog.games_in_refund(),
            drops = catalog.total_remaining_drops(),
            "Library refreshed"
        ),
        Event::RefreshFailed(reason) => tracing::warn!(%reason, "Refresh failed"),
        Event::TimerTick(interval) => {
            tracing::debug!(secs = interval.as_secs(), "Refresh cycle complete")
        }
        Event::TimerStopped => tracing::debug!("Refresh timer stopped"),
        Event::StatusUpdate(message) => tracing::info!("{message}"),
        Event::AppDone(app) => tracing::info!(app = app.id, name = %app.name, "App finished"),
        Event::AllDone => tracing::info!("All multi-idle apps finished"),
        Event::Finished => tracing::info!("Idle session finished"),
    }
}
