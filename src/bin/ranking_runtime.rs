//! Ranking Runtime - periodic boost ranking against the views log
//!
//! This binary:
//! - Initializes the SQLite database with schema
//! - Restores the last window snapshot, if any
//! - Runs a ranking cycle every interval until CTRL+C
//!
//! Usage:
//!   cargo run --release --bin ranking_runtime
//!   cargo run --release --bin ranking_runtime -- --once
//!
//! Environment variables: see `RankingConfig`.

use boostrank::ranking::{
    config::RankingConfig,
    db::{run_schema_migrations, SqliteBoostRepository},
    engine::RankingEngine,
    persistence::{load_window_snapshot, save_window_snapshot},
    scheduler::{ranking_scheduler_task, run_cycle_and_snapshot},
    sqlite_source::SqliteEventSource,
    BoostRepository,
};
use dotenv::dotenv;
use log::{error, info, warn};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let run_once = std::env::args().any(|arg| arg == "--once");

    info!("🚀 Boost Ranking Runtime");
    info!("   ├─ Mode: {}", if run_once { "single cycle" } else { "scheduled" });

    let config = RankingConfig::from_env();
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Window: {}s", config.window_secs);
    info!("   ├─ Cycle interval: {}ms", config.cycle_interval_ms);
    info!("   ├─ Page size: {}", config.page_size);
    info!("   └─ Snapshot: {}", config.snapshot_path.as_deref().unwrap_or("disabled"));

    info!("🔧 Initializing database...");
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut conn = Connection::open(&config.db_path)?;
    run_schema_migrations(&mut conn, &config.schema_dir)?;
    drop(conn);

    let source = SqliteEventSource::new(&config.db_path)?.with_page_size(config.page_size);
    let repository: Arc<dyn BoostRepository + Send + Sync> = Arc::new(SqliteBoostRepository::new(&config.db_path)?);
    info!("✅ Database initialized");

    let mut engine = RankingEngine::new(Box::new(source), repository, config.window_secs);

    if let Some(path) = &config.snapshot_path {
        match load_window_snapshot(path, config.window_secs) {
            Ok(Some(state)) => engine.restore_window(state),
            Ok(None) => info!("🪟 Starting with an empty window"),
            Err(e) => warn!("⚠️  Unusable window snapshot {}, starting empty: {}", path, e),
        }
    }

    if run_once {
        let report = run_cycle_and_snapshot(&mut engine, config.window_secs, config.snapshot_path.as_deref())?;
        info!(
            "✅ Single cycle complete: {} rankings written, {} failed",
            report.rankings_written, report.ranking_failures
        );
        return Ok(());
    }

    let engine = Arc::new(Mutex::new(engine));
    let scheduler = tokio::spawn(ranking_scheduler_task(
        engine.clone(),
        config.window_secs,
        config.cycle_interval_ms,
        config.snapshot_path.clone(),
    ));

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    scheduler.abort();

    // Wait out an in-flight cycle so the final snapshot matches the stored rankings
    let engine_guard = engine.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(path) = &config.snapshot_path {
        if let Err(e) = save_window_snapshot(engine_guard.window_state(), config.window_secs, path) {
            error!("❌ Failed to save final window snapshot: {}", e);
        }
    }

    info!("✅ Ranking runtime stopped");
    Ok(())
}
