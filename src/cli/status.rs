use crate::core::catalog::Catalog;
use crate::core::models::AppId;
use crate::core::settings::Settings;
use crate::source::{HttpSource, SnapshotSource};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize)]
struct StatusOutput {
    games_to_idle: usize,
    games_in_refund: usize,
    remaining_drops: u64,
    apps: Vec<AppStatus>,
    #[serde(with = "chrono::serde::ts_seconds")]
    fetched_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct AppStatus {
    id: AppId,
    name: String,
    remaining_drops: u32,
    play_time: f64,
    refund_eligible: bool,
}

pub async fn run(json: bool) -> Result<()> {
    let settings = Settings::load()?;
    settings.validate()?;

    let source = HttpSource::new(&settings.source);
    let catalog = source.fetch_snapshot().await?;

    if json {
        let output = build_output(&catalog);
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text_output(&catalog);
    }

    Ok(())
}

fn build_output(catalog: &Catalog) -> StatusOutput {
    StatusOutput {
        games_to_idle: catalog.games_to_idle(),
        games_in_refund: catalog.games_in_refund(),
        remaining_drops: catalog.total_remaining_drops(),
        apps: catalog
            .iter()
            .filter(|app| app.idle_eligible())
            .map(|app| AppStatus {
                id: app.id,
                name: app.name.clone(),
                remaining_drops: app.remaining_drops,
                play_time: app.play_time,
                refund_eligible: app.refund_eligible(),
            })
            .collect(),
        fetched_at: catalog.fetched_at().unwrap_or_else(Utc::now),
    }
}

fn print_text_output(catalog: &Catalog) {
    println!("{} games left to idle", catalog.games_to_idle());
    println!(
        "{} games in refund period (<2h play time)",
        catalog.games_in_refund()
    );
    println!("{} remaining card drops", catalog.total_remaining_drops());

    let eligible: Vec<_> = catalog.iter().filter(|app| app.idle_eligible()).collect();
    if eligible.is_empty() {
        return;
    }

    println!();
    for app in eligible {
        let refund = if app.refund_eligible() { " [refund]" } else { "" };
        println!(
            "  {:<8} {:<40} {:>3} drops  {:>6.1}h{}",
            app.id, app.name, app.remaining_drops, app.play_time, refund
        );
    }
}
