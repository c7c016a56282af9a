//! Ranking Engine - one cycle of refresh, window advance, and ranking
//!
//! ```text
//! BoostRepository::get_active_boost_share_ratios
//!     ↓
//! ActiveBoostCache::refresh (full replace)
//!     ↓
//! WindowAggregator::advance (ingest, then prune)
//!     ↓
//! RankCalculator::compute (per active boost)
//!     ↓
//! BoostRepository::add_boost_ranking
//! ```
//!
//! The engine holds unsynchronized window state. Callers must not run two
//! cycles at once; `scheduler::ranking_scheduler_task` serializes them.

use super::cache::ActiveBoostCache;
use super::cursor::EventCursor;
use super::rank::RankCalculator;
use super::repository::{BoostRepository, RepositoryError};
use super::source::PartitionedEventSource;
use super::window::{WindowAggregator, WindowState};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("Failed to refresh active boosts: {0}")]
    Refresh(#[source] RepositoryError),
}

/// What a cycle did, for logging and tests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub now_ms: i64,
    pub active_boosts: usize,
    pub ingested: usize,
    pub pruned: usize,
    pub unresolved: usize,
    pub rankings_written: usize,
    pub ranking_failures: usize,
    pub ingest_error: Option<String>,
    pub prune_error: Option<String>,
    pub min_cursor: Option<EventCursor>,
    pub max_cursor: Option<EventCursor>,
}

pub struct RankingEngine {
    source: Box<dyn PartitionedEventSource + Send>,
    repository: Arc<dyn BoostRepository + Send + Sync>,
    cache: ActiveBoostCache,
    aggregator: WindowAggregator,
    calculator: RankCalculator,

    /// Millisecond wall clock (replaceable for tests)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl RankingEngine {
    /// Create an engine on the system clock with an empty window
    pub fn new(
        source: Box<dyn PartitionedEventSource + Send>,
        repository: Arc<dyn BoostRepository + Send + Sync>,
        window_secs: i64,
    ) -> Self {
        Self::new_with_timestamp_fn(
            source,
            repository,
            window_secs,
            Box::new(|| chrono::Utc::now().timestamp_millis()),
        )
    }

    /// Create an engine with a custom millisecond clock
    pub fn new_with_timestamp_fn(
        source: Box<dyn PartitionedEventSource + Send>,
        repository: Arc<dyn BoostRepository + Send + Sync>,
        window_secs: i64,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            source,
            repository,
            cache: ActiveBoostCache::new(),
            aggregator: WindowAggregator::new(window_secs),
            calculator: RankCalculator::new(),
            now_fn,
        }
    }

    /// Resume from a saved window (see `persistence`)
    pub fn restore_window(&mut self, state: WindowState) {
        let window_secs = self.aggregator.window_secs();
        self.aggregator = WindowAggregator::with_state(window_secs, state);
    }

    pub fn window_state(&self) -> &WindowState {
        self.aggregator.state()
    }

    pub fn active_boosts(&self) -> &ActiveBoostCache {
        &self.cache
    }

    /// Run one full ranking cycle
    ///
    /// Only a failed active-boost refresh aborts the cycle. Scan failures are
    /// reported and ranking proceeds on the last consistent window; a failed
    /// ranking write skips that boost only.
    pub fn run_cycle(&mut self) -> Result<CycleReport, RankingError> {
        let now_ms = (self.now_fn)();
        let mut report = CycleReport {
            now_ms,
            ..CycleReport::default()
        };

        // 1. Active boosts for this cycle
        report.active_boosts = self
            .cache
            .refresh(self.repository.as_ref())
            .map_err(RankingError::Refresh)?;

        // 2. Slide the window
        let advance = self
            .aggregator
            .advance(now_ms, self.source.as_ref(), self.repository.as_ref());
        match advance.ingest {
            Ok(summary) => {
                report.ingested = summary.events;
                report.unresolved += summary.unresolved;
            }
            Err(e) => report.ingest_error = Some(e.to_string()),
        }
        match advance.prune {
            Ok(summary) => {
                report.pruned = summary.events;
                report.unresolved += summary.unresolved;
            }
            Err(e) => report.prune_error = Some(e.to_string()),
        }

        // 3. Rank and persist every active boost
        let state = self.aggregator.state();
        for boost in self.cache.iter() {
            let (ranking, breakdown) = self.calculator.compute(boost, state);

            for part in &breakdown {
                log::info!(
                    "   ├─ Setting {} {} rank to {:.4} (total_views={}, target={:.1}, actual={}, share={:.4})",
                    boost.boost_id,
                    part.audience.as_str(),
                    part.rank,
                    part.total_views,
                    part.views_target,
                    part.views_actual,
                    part.share_of_bids
                );
            }

            match self.repository.add_boost_ranking(&ranking) {
                Ok(()) => report.rankings_written += 1,
                Err(e) => {
                    report.ranking_failures += 1;
                    log::error!("❌ Failed to store ranking for boost {}: {}", boost.boost_id, e);
                }
            }
        }

        report.min_cursor = state.min_cursor();
        report.max_cursor = state.max_cursor();

        log::info!(
            "🏁 Ranking cycle: {} boosts, +{} / -{} views, {} rankings written, {} failed",
            report.active_boosts,
            report.ingested,
            report.pruned,
            report.rankings_written,
            report.ranking_failures
        );

        Ok(report)
    }
}
