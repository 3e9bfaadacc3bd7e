mod config;
mod db;
mod runner;
mod state;
mod valve;
mod web;

use anyhow::{Context, Result};
use std::{env, sync::Arc};
use time::UtcOffset;
use tokio::sync::{Notify, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use db::Db;
use state::HubState;
use valve::ValveBoard;
use web::AppState;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // The local offset can only be read soundly while single-threaded, so
    // resolve it before the runtime spawns workers.
    let offset = UtcOffset::current_local_offset().unwrap_or_else(|e| {
        warn!("local utc offset unavailable ({e}), scheduling in UTC");
        UtcOffset::UTC
    });

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(run(offset))
}

async fn run(offset: UtcOffset) -> Result<()> {
    // ── Env config ──────────────────────────────────────────────────
    let db_url = env::var("DB_URL")
        .unwrap_or_else(|_| "sqlite:irrigation.db?mode=rwc".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (valve + seed timers) ───────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &db).await?;

    // The database is the source of truth for timers.
    let timers = db.list_timers().await?;
    if timers.is_empty() {
        warn!("no timers configured in the database");
    }

    // ── Valve board ─────────────────────────────────────────────────
    // Many common relay boards are active-low. If yours is active-high, set false.
    let active_low = cfg.valve.active_low.unwrap_or_else(|| {
        env::var("RELAY_ACTIVE_LOW")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true)
    });
    let gpio_pin = cfg.gpio_pin();
    let mut valve = ValveBoard::new(gpio_pin, active_low)?;
    valve.set(false);

    // ── Shared state (ephemeral, for the API) ───────────────────────
    let mut hub = HubState::new(gpio_pin);
    hub.set_timers(&timers);
    info!(
        timers = timers.len(),
        intervals = hub.intervals.len(),
        gpio_pin,
        active_low,
        "db ready"
    );
    hub.record_system("hub started".to_string());
    let shared = Arc::new(RwLock::new(hub));
    let wake = Arc::new(Notify::new());

    // ── Web server ──────────────────────────────────────────────────
    let web_state = AppState::new(db.clone(), Arc::clone(&shared), Arc::clone(&wake), offset);
    let web_shared = Arc::clone(&shared);
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state).await {
            error!("web server stopped: {e:#}");
            web_shared
                .write()
                .await
                .record_error(format!("web server stopped: {e:#}"));
        }
    });

    // ── Valve runner ────────────────────────────────────────────────
    let runner_task = tokio::spawn(runner::run(Arc::clone(&shared), valve, wake, offset));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    // Aborting drops the runner's ValveBoard; close the relay explicitly.
    runner_task.abort();
    let _ = runner_task.await;
    let mut valve = ValveBoard::new(gpio_pin, active_low)?;
    valve.set(false);
    shared.write().await.record_system("hub stopped".to_string());
    Ok(())
}
