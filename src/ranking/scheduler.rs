//! Periodic ranking cycles on the tokio runtime

use super::engine::{CycleReport, RankingEngine, RankingError};
use super::persistence::save_window_snapshot;
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Run one cycle and, if configured, persist the resulting window
///
/// A failed snapshot write is logged; the cycle result stands.
pub fn run_cycle_and_snapshot(
    engine: &mut RankingEngine,
    window_secs: i64,
    snapshot_path: Option<&str>,
) -> Result<CycleReport, RankingError> {
    let report = engine.run_cycle()?;

    if let Some(path) = snapshot_path {
        if let Err(e) = save_window_snapshot(engine.window_state(), window_secs, path) {
            log::warn!("⚠️  Failed to save window snapshot to {}: {}", path, e);
        }
    }

    Ok(report)
}

/// Ranking scheduler task - run a cycle every `cycle_interval_ms`
///
/// Cycles run on the blocking pool and never overlap: a slow cycle delays
/// the next tick instead of queueing extra ticks behind it.
///
/// This function runs indefinitely until cancelled.
pub async fn ranking_scheduler_task(
    engine: Arc<Mutex<RankingEngine>>,
    window_secs: i64,
    cycle_interval_ms: u64,
    snapshot_path: Option<String>,
) {
    log::info!("⏰ Starting ranking scheduler (interval: {}ms)", cycle_interval_ms);

    let mut timer = interval(Duration::from_millis(cycle_interval_ms));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;

        let engine = engine.clone();
        let snapshot_path = snapshot_path.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut engine_guard = engine.lock().unwrap_or_else(|e| e.into_inner());
            run_cycle_and_snapshot(&mut engine_guard, window_secs, snapshot_path.as_deref())
        })
        .await;

        match result {
            Ok(Ok(report)) => {
                if report.ingest_error.is_some() || report.prune_error.is_some() {
                    log::warn!(
                        "⚠️  Cycle ranked on a partially advanced window (ingest: {:?}, prune: {:?})",
                        report.ingest_error,
                        report.prune_error
                    );
                }
            }
            Ok(Err(e)) => log::error!("❌ Ranking cycle failed: {}", e),
            Err(e) => log::error!("❌ Ranking cycle task panicked: {}", e),
        }
    }
}
