//! Sliding-window view counters with resumable ingest and prune scans
//!
//! Two watermarks bound the window: everything in `(min_cursor, max_cursor]`
//! is counted. Each `advance`:
//! 1. ingests events in `(max_cursor, now]` and moves `max_cursor` forward
//! 2. prunes events in `(min_cursor, now - window)` and moves `min_cursor` forward
//!
//! Each scan is staged and committed only when it completes. A failed scan
//! leaves counters and its watermark untouched so the next cycle retries the
//! same range.
//!
//! Ingest resolves every boost against the repository once per scan, so a
//! relocated or re-flagged boost is counted under its current profile from
//! then on. Each boost keeps the runs of views it was counted for as
//! `ViewSegment`s; prune only takes back views that fall inside a segment,
//! under that segment's profile.

use super::campaign::boost_guid_from_tag;
use super::cursor::EventCursor;
use super::repository::{BoostRepository, RepositoryError};
use super::source::{CursorRange, PartitionedEventSource, SourceError};
use super::types::{Audience, BoostShareRatio, BoostTargetLocation, TargetKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::ops::Bound;

pub const DEFAULT_WINDOW_SECS: i64 = 3600;

/// Longest accepted window (30 days)
pub const MAX_WINDOW_SECS: i64 = 30 * 24 * 3600;

/// Buckets a boost's views are counted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostProfile {
    pub target_location: BoostTargetLocation,
    pub safe_for_all: bool,
}

impl BoostProfile {
    pub fn buckets(&self) -> Vec<TargetKey> {
        let mut keys = vec![(self.target_location, Audience::Open)];
        if self.safe_for_all {
            keys.push((self.target_location, Audience::Safe));
        }
        keys
    }
}

impl From<&BoostShareRatio> for BoostProfile {
    fn from(boost: &BoostShareRatio) -> Self {
        Self {
            target_location: boost.target_location,
            safe_for_all: boost.safe_for_all,
        }
    }
}

/// A run of views counted under one profile
///
/// Every view of the boost with a cursor in `[first_cursor, last_cursor]`
/// was counted in this profile's buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSegment {
    pub profile: BoostProfile,
    pub first_cursor: EventCursor,
    pub last_cursor: EventCursor,
    pub views: u64,
}

impl ViewSegment {
    fn starting_at(profile: BoostProfile, cursor: EventCursor) -> Self {
        Self {
            profile,
            first_cursor: cursor,
            last_cursor: cursor,
            views: 0,
        }
    }

    pub fn contains(&self, cursor: EventCursor) -> bool {
        self.first_cursor <= cursor && cursor <= self.last_cursor
    }
}

/// Views a boost holds in the window, oldest segment first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostViews {
    pub segments: VecDeque<ViewSegment>,
    /// Set when a view after the last segment went uncounted
    #[serde(default)]
    pub sealed: bool,
}

impl BoostViews {
    pub fn views(&self) -> u64 {
        self.segments.iter().map(|s| s.views).sum()
    }

    /// Profile of the most recently counted views
    pub fn profile(&self) -> Option<BoostProfile> {
        self.segments.back().map(|s| s.profile)
    }

    pub fn segment_for(&self, cursor: EventCursor) -> Option<&ViewSegment> {
        self.segments.iter().find(|s| s.contains(cursor))
    }

    /// Extend the newest segment, or open a new one on a profile change or gap
    fn append(&mut self, run: ViewSegment) {
        match self.segments.back_mut() {
            Some(last) if !self.sealed && last.profile == run.profile => {
                last.last_cursor = run.last_cursor;
                last.views += run.views;
            }
            _ => self.segments.push_back(run),
        }
        self.sealed = false;
    }
}

impl From<ViewSegment> for BoostViews {
    fn from(segment: ViewSegment) -> Self {
        Self {
            segments: VecDeque::from([segment]),
            sealed: false,
        }
    }
}

/// Counters and watermarks of the trailing window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowState {
    pub(crate) total_views: HashMap<TargetKey, u64>,
    pub(crate) views_by_boost: HashMap<String, BoostViews>,
    pub(crate) min_cursor: Option<EventCursor>,
    pub(crate) max_cursor: Option<EventCursor>,
}

impl WindowState {
    /// Views in a `(location, audience)` bucket, 0 when absent
    pub fn total_views(&self, key: TargetKey) -> u64 {
        self.total_views.get(&key).copied().unwrap_or(0)
    }

    /// Views attributed to a boost, 0 when absent
    pub fn views_for(&self, boost_id: &str) -> u64 {
        self.views_by_boost.get(boost_id).map(|b| b.views()).unwrap_or(0)
    }

    pub fn boost_views(&self) -> impl Iterator<Item = (&String, &BoostViews)> {
        self.views_by_boost.iter()
    }

    pub fn min_cursor(&self) -> Option<EventCursor> {
        self.min_cursor
    }

    pub fn max_cursor(&self) -> Option<EventCursor> {
        self.max_cursor
    }

    pub fn is_initialized(&self) -> bool {
        self.max_cursor.is_some()
    }

    /// Fold a committed scan into the counters; negative deltas never drop below zero
    fn apply(&mut self, staged: StagedScan, phase: ScanPhase) {
        let (min, max) = (self.min_cursor, self.max_cursor);

        for (key, delta) in staged.totals {
            let current = self.total_views(key);
            let next = checked_add(
                current,
                delta,
                || format!("bucket {}_{}", key.0.as_str(), key.1.as_str()),
                phase,
                min,
                max,
            );
            self.total_views.insert(key, next);
        }

        for boost_id in staged.missed {
            if let Some(views) = self.views_by_boost.get_mut(&boost_id) {
                views.sealed = true;
            }
        }

        for (boost_id, run) in staged.ingested {
            self.views_by_boost.entry(boost_id).or_default().append(run);
        }

        for ((boost_id, first_cursor), removed) in staged.pruned {
            let Some(views) = self.views_by_boost.get_mut(&boost_id) else {
                continue;
            };
            if let Some(idx) = views.segments.iter().position(|s| s.first_cursor == first_cursor) {
                let current = views.segments[idx].views;
                let next = checked_add(
                    current,
                    -(removed as i64),
                    || format!("boost {} segment {}", boost_id, first_cursor),
                    phase,
                    min,
                    max,
                );
                if next == 0 {
                    views.segments.remove(idx);
                } else {
                    views.segments[idx].views = next;
                }
            }
            if views.segments.is_empty() {
                self.views_by_boost.remove(&boost_id);
            }
        }

        if let Some(cursor) = staged.last_cursor {
            match phase {
                ScanPhase::Ingest => self.max_cursor = Some(cursor),
                ScanPhase::Prune => self.min_cursor = Some(cursor),
            }
        }
    }
}

fn checked_add(
    current: u64,
    delta: i64,
    what: impl FnOnce() -> String,
    phase: ScanPhase,
    min: Option<EventCursor>,
    max: Option<EventCursor>,
) -> u64 {
    let next = current as i128 + delta as i128;
    if next < 0 {
        log::error!(
            "❌ Counter underflow on {} during {}: {} + ({}) < 0, clamping to 0 (min_cursor={:?}, max_cursor={:?})",
            what(),
            phase,
            current,
            delta,
            min,
            max
        );
        return 0;
    }
    next as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Ingest,
    Prune,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanPhase::Ingest => write!(f, "ingest"),
            ScanPhase::Prune => write!(f, "prune"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("{phase} scan failed: {source}")]
    Source {
        phase: ScanPhase,
        #[source]
        source: SourceError,
    },

    #[error("{phase} scan could not resolve boost {boost_id}: {source}")]
    Resolution {
        phase: ScanPhase,
        boost_id: String,
        #[source]
        source: RepositoryError,
    },

    #[error("{phase} scan returned {got} after {previous}")]
    OutOfOrder {
        phase: ScanPhase,
        previous: EventCursor,
        got: EventCursor,
    },
}

/// Outcome of one committed scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub events: usize,
    pub counted: usize,
    pub unresolved: usize,
    pub last_cursor: Option<EventCursor>,
}

#[derive(Debug)]
pub struct AdvanceReport {
    pub ingest: Result<ScanSummary, WindowError>,
    pub prune: Result<ScanSummary, WindowError>,
}

/// Uncommitted deltas of a running scan
#[derive(Debug, Default)]
struct StagedScan {
    totals: HashMap<TargetKey, i64>,
    /// Ingest: the run of views counted per boost
    ingested: HashMap<String, ViewSegment>,
    /// Ingest: boosts with a view that could not be resolved
    missed: HashSet<String>,
    /// Prune: views to take back, keyed by boost and segment start
    pruned: HashMap<(String, EventCursor), u64>,
    last_cursor: Option<EventCursor>,
    events: usize,
    counted: usize,
    unresolved: usize,
}

impl StagedScan {
    fn add_buckets(&mut self, profile: BoostProfile, val: i64) {
        for key in profile.buckets() {
            *self.totals.entry(key).or_insert(0) += val;
        }
        self.counted += 1;
    }

    fn record_ingest(&mut self, boost_id: &str, profile: BoostProfile, cursor: EventCursor) {
        self.add_buckets(profile, 1);
        let run = self
            .ingested
            .entry(boost_id.to_string())
            .or_insert_with(|| ViewSegment::starting_at(profile, cursor));
        run.last_cursor = cursor;
        run.views += 1;
    }

    fn record_prune(&mut self, boost_id: &str, segment: &ViewSegment) {
        self.add_buckets(segment.profile, -1);
        *self
            .pruned
            .entry((boost_id.to_string(), segment.first_cursor))
            .or_insert(0) += 1;
    }

    fn summary(&self) -> ScanSummary {
        ScanSummary {
            events: self.events,
            counted: self.counted,
            unresolved: self.unresolved,
            last_cursor: self.last_cursor,
        }
    }
}

/// Owner of the window state; the only writer of its counters and cursors
pub struct WindowAggregator {
    state: WindowState,
    window_secs: i64,
    window_ms: i64,
}

impl WindowAggregator {
    pub fn new(window_secs: i64) -> Self {
        Self::with_state(window_secs, WindowState::default())
    }

    /// Resume from a previously saved state
    pub fn with_state(window_secs: i64, state: WindowState) -> Self {
        Self {
            state,
            window_secs,
            window_ms: window_secs.saturating_mul(1000),
        }
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    pub fn window_secs(&self) -> i64 {
        self.window_secs
    }

    /// Ingest new events, then prune expired ones
    pub fn advance(
        &mut self,
        now_ms: i64,
        source: &dyn PartitionedEventSource,
        repository: &dyn BoostRepository,
    ) -> AdvanceReport {
        self.initialize(now_ms);

        let ingest = self.ingest(now_ms, source, repository);
        if let Err(e) = &ingest {
            log::warn!("⚠️  Ingest aborted, max_cursor stays at {:?}: {}", self.state.max_cursor, e);
        }

        let prune = self.prune(now_ms, source);
        if let Err(e) = &prune {
            log::warn!("⚠️  Prune aborted, min_cursor stays at {:?}: {}", self.state.min_cursor, e);
        }

        AdvanceReport { ingest, prune }
    }

    /// Start with an empty window ending now
    fn initialize(&mut self, now_ms: i64) {
        if self.state.max_cursor.is_none() {
            let start = EventCursor::floor(now_ms.saturating_sub(self.window_ms));
            self.state.min_cursor = Some(start);
            self.state.max_cursor = Some(start);
            log::info!("🪟 Window initialized empty at {}", start);
        }
    }

    fn ingest(
        &mut self,
        now_ms: i64,
        source: &dyn PartitionedEventSource,
        repository: &dyn BoostRepository,
    ) -> Result<ScanSummary, WindowError> {
        let Some(max) = self.state.max_cursor else {
            return Ok(ScanSummary::default());
        };
        let phase = ScanPhase::Ingest;
        let range = CursorRange::new(Bound::Excluded(max), Bound::Included(EventCursor::ceiling(now_ms)));
        if range.is_empty() {
            return Ok(ScanSummary::default());
        }

        let mut staged = StagedScan::default();
        // One lookup per boost per scan
        let mut resolved: HashMap<String, Option<BoostProfile>> = HashMap::new();

        let stream = source
            .query(range)
            .map_err(|source| WindowError::Source { phase, source })?;

        for item in stream {
            let event = item.map_err(|source| WindowError::Source { phase, source })?;
            track_order(&mut staged, event.cursor, phase)?;

            let Some(boost_id) = boost_guid_from_tag(&event.campaign_tag) else {
                staged.unresolved += 1;
                continue;
            };

            let profile = match resolved.get(boost_id) {
                Some(cached) => *cached,
                None => {
                    let lookup = repository
                        .get_boost_share_ratio_by_guid(boost_id)
                        .map_err(|source| WindowError::Resolution {
                            phase,
                            boost_id: boost_id.to_string(),
                            source,
                        })?
                        .map(|boost| BoostProfile::from(&boost));
                    resolved.insert(boost_id.to_string(), lookup);
                    lookup
                }
            };

            match profile {
                Some(profile) => staged.record_ingest(boost_id, profile, event.cursor),
                None => {
                    staged.unresolved += 1;
                    staged.missed.insert(boost_id.to_string());
                }
            }
        }

        let summary = staged.summary();
        self.state.apply(staged, phase);

        if summary.events > 0 {
            log::debug!(
                "📥 Ingested {} views ({} counted, {} unresolved), max_cursor={:?}",
                summary.events,
                summary.counted,
                summary.unresolved,
                self.state.max_cursor
            );
        }
        Ok(summary)
    }

    fn prune(&mut self, now_ms: i64, source: &dyn PartitionedEventSource) -> Result<ScanSummary, WindowError> {
        let (Some(min), Some(max)) = (self.state.min_cursor, self.state.max_cursor) else {
            return Ok(ScanSummary::default());
        };
        let phase = ScanPhase::Prune;

        // Never prune past what ingest has counted
        let boundary = EventCursor::floor(now_ms.saturating_sub(self.window_ms));
        let high = if boundary <= max {
            Bound::Excluded(boundary)
        } else {
            Bound::Included(max)
        };
        let range = CursorRange::new(Bound::Excluded(min), high);
        if range.is_empty() {
            return Ok(ScanSummary::default());
        }

        let mut staged = StagedScan::default();
        let stream = source
            .query(range)
            .map_err(|source| WindowError::Source { phase, source })?;

        for item in stream {
            let event = item.map_err(|source| WindowError::Source { phase, source })?;
            track_order(&mut staged, event.cursor, phase)?;

            // Only views ingest counted are taken back
            let counted = boost_guid_from_tag(&event.campaign_tag).and_then(|id| {
                self.state
                    .views_by_boost
                    .get(id)
                    .and_then(|views| views.segment_for(event.cursor))
                    .map(|segment| (id, *segment))
            });

            match counted {
                Some((boost_id, segment)) => staged.record_prune(boost_id, &segment),
                None => staged.unresolved += 1,
            }
        }

        let summary = staged.summary();
        self.state.apply(staged, phase);

        if summary.events > 0 {
            log::debug!(
                "🧹 Pruned {} views ({} counted, {} unresolved), min_cursor={:?}",
                summary.events,
                summary.counted,
                summary.unresolved,
                self.state.min_cursor
            );
        }
        Ok(summary)
    }
}

fn track_order(staged: &mut StagedScan, cursor: EventCursor, phase: ScanPhase) -> Result<(), WindowError> {
    if let Some(previous) = staged.last_cursor {
        if cursor <= previous {
            return Err(WindowError::OutOfOrder {
                phase,
                previous,
                got: cursor,
            });
        }
    }
    staged.last_cursor = Some(cursor);
    staged.events += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::campaign::campaign_tag;
    use crate::ranking::memory::{InMemoryBoostRepository, InMemoryEventSource};
    use crate::ranking::types::ViewEvent;

    const MIDNIGHT: i64 = 1_710_028_800_000; // 2024-03-10T00:00:00Z
    const WINDOW_MS: i64 = DEFAULT_WINDOW_SECS * 1000;

    fn view(ts: i64, seq: u32, boost_id: &str) -> ViewEvent {
        ViewEvent::new(EventCursor::new(ts, seq), campaign_tag(BoostTargetLocation::Newsfeed, boost_id))
    }

    fn setup() -> (InMemoryEventSource, InMemoryBoostRepository, WindowAggregator) {
        let repo = InMemoryBoostRepository::new();
        repo.upsert_active(BoostShareRatio::new("safe", BoostTargetLocation::Newsfeed, true));
        repo.upsert_active(BoostShareRatio::new("open", BoostTargetLocation::Newsfeed, false));
        repo.upsert_active(BoostShareRatio::new("side", BoostTargetLocation::Sidebar, true));
        (InMemoryEventSource::new(), repo, WindowAggregator::new(DEFAULT_WINDOW_SECS))
    }

    #[test]
    fn test_first_advance_starts_empty_window() {
        let (source, repo, mut agg) = setup();
        source.push(view(MIDNIGHT - 2 * WINDOW_MS, 1, "safe")); // older than the window

        let report = agg.advance(MIDNIGHT, &source, &repo);

        assert_eq!(report.ingest.unwrap().events, 0);
        let start = EventCursor::floor(MIDNIGHT - WINDOW_MS);
        assert_eq!(agg.state().min_cursor(), Some(start));
        assert_eq!(agg.state().max_cursor(), Some(start));
        assert_eq!(agg.state().total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 0);
    }

    #[test]
    fn test_ingest_counts_open_and_safe_buckets() {
        let (source, repo, mut agg) = setup();
        agg.advance(MIDNIGHT, &source, &repo);

        source.extend(vec![
            view(MIDNIGHT + 1, 1, "safe"),
            view(MIDNIGHT + 2, 1, "safe"),
            view(MIDNIGHT + 3, 1, "open"),
            view(MIDNIGHT + 3, 2, "open"),
            view(MIDNIGHT + 4, 1, "open"),
            view(MIDNIGHT + 5, 1, "deleted"),
            ViewEvent::new(EventCursor::new(MIDNIGHT + 6, 1), "urn:activity:77"),
        ]);

        let report = agg.advance(MIDNIGHT + 10, &source, &repo);
        let ingest = report.ingest.unwrap();
        assert_eq!(ingest.events, 7);
        assert_eq!(ingest.counted, 5);
        assert_eq!(ingest.unresolved, 2);

        let state = agg.state();
        assert_eq!(state.total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 5);
        assert_eq!(state.total_views((BoostTargetLocation::Newsfeed, Audience::Safe)), 2);
        assert_eq!(state.total_views((BoostTargetLocation::Sidebar, Audience::Open)), 0);
        assert_eq!(state.views_for("safe"), 2);
        assert_eq!(state.views_for("open"), 3);
        assert_eq!(state.views_for("deleted"), 0);
        // Unresolved events still advance the watermark
        assert_eq!(state.max_cursor(), Some(EventCursor::new(MIDNIGHT + 6, 1)));
    }

    #[test]
    fn test_ingest_excludes_future_events() {
        let (source, repo, mut agg) = setup();
        agg.advance(MIDNIGHT, &source, &repo);
        source.extend(vec![view(MIDNIGHT + 5, 1, "open"), view(MIDNIGHT + 50, 1, "open")]);

        agg.advance(MIDNIGHT + 10, &source, &repo);
        assert_eq!(agg.state().views_for("open"), 1);

        agg.advance(MIDNIGHT + 50, &source, &repo);
        assert_eq!(agg.state().views_for("open"), 2);
    }

    #[test]
    fn test_prune_mirrors_ingest() {
        let (source, repo, mut agg) = setup();
        agg.advance(MIDNIGHT, &source, &repo);
        source.extend(vec![view(MIDNIGHT + 1_000, 1, "safe"), view(MIDNIGHT + 2_000, 1, "open")]);
        agg.advance(MIDNIGHT + 3_000, &source, &repo);

        // First event has aged out, second has not
        let report = agg.advance(MIDNIGHT + WINDOW_MS + 1_500, &source, &repo);
        assert_eq!(report.prune.unwrap().counted, 1);

        let state = agg.state();
        assert_eq!(state.views_for("safe"), 0);
        assert_eq!(state.views_for("open"), 1);
        assert_eq!(state.total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 1);
        assert_eq!(state.total_views((BoostTargetLocation::Newsfeed, Audience::Safe)), 0);
        assert_eq!(state.min_cursor(), Some(EventCursor::new(MIDNIGHT + 1_000, 1)));
        assert!(state.boost_views().all(|(id, _)| id != "safe"));
    }

    #[test]
    fn test_deleted_boost_still_pruned_with_recorded_profile() {
        let (source, repo, mut agg) = setup();
        agg.advance(MIDNIGHT, &source, &repo);
        source.push(view(MIDNIGHT + 1_000, 1, "safe"));
        agg.advance(MIDNIGHT + 2_000, &source, &repo);

        repo.remove("safe");
        agg.advance(MIDNIGHT + WINDOW_MS + 2_000, &source, &repo);

        assert_eq!(agg.state().views_for("safe"), 0);
        assert_eq!(agg.state().total_views((BoostTargetLocation::Newsfeed, Audience::Safe)), 0);
        assert_eq!(agg.state().total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 0);
    }

    #[test]
    fn test_failed_ingest_keeps_watermark_and_retries_cleanly() {
        let (source, repo, mut agg) = setup();
        agg.advance(MIDNIGHT, &source, &repo);
        let before = agg.state().clone();

        source.extend((1..=4).map(|i| view(MIDNIGHT + i, 1, "open")));
        source.fail_next_query_after(2);

        let report = agg.advance(MIDNIGHT + 10, &source, &repo);
        assert!(matches!(
            report.ingest,
            Err(WindowError::Source { phase: ScanPhase::Ingest, .. })
        ));
        assert_eq!(agg.state().max_cursor(), before.max_cursor());
        assert_eq!(agg.state().views_for("open"), 0);

        agg.advance(MIDNIGHT + 10, &source, &repo);
        assert_eq!(agg.state().views_for("open"), 4);
        assert_eq!(agg.state().max_cursor(), Some(EventCursor::new(MIDNIGHT + 4, 1)));
    }

    #[test]
    fn test_repository_outage_aborts_ingest() {
        let (source, repo, mut agg) = setup();
        agg.advance(MIDNIGHT, &source, &repo);
        source.push(view(MIDNIGHT + 1, 1, "open"));

        repo.set_unavailable(true);
        let report = agg.advance(MIDNIGHT + 10, &source, &repo);
        assert!(matches!(report.ingest, Err(WindowError::Resolution { .. })));
        assert_eq!(agg.state().views_for("open"), 0);

        repo.set_unavailable(false);
        agg.advance(MIDNIGHT + 10, &source, &repo);
        assert_eq!(agg.state().views_for("open"), 1);
    }

    #[test]
    fn test_prune_never_passes_max_cursor() {
        let (source, repo, mut agg) = setup();
        agg.advance(MIDNIGHT, &source, &repo);
        source.push(view(MIDNIGHT + 1, 1, "open"));
        agg.advance(MIDNIGHT + 10, &source, &repo);

        // Arrives later; ingest fails so it is never counted this cycle
        source.push(view(MIDNIGHT + 20, 1, "open"));
        source.fail_next_query_after(0);
        let report = agg.advance(MIDNIGHT + 3 * WINDOW_MS, &source, &repo);

        assert!(report.ingest.is_err());
        assert_eq!(report.prune.unwrap().counted, 1);
        let state = agg.state();
        assert_eq!(state.views_for("open"), 0);
        assert_eq!(state.min_cursor(), state.max_cursor());
    }

    #[test]
    fn test_underflow_is_clamped() {
        let (source, repo, _) = setup();
        let mut state = WindowState::default();
        state.min_cursor = Some(EventCursor::floor(MIDNIGHT));
        state.max_cursor = Some(EventCursor::new(MIDNIGHT + 1, 1));
        state.views_by_boost.insert(
            "open".to_string(),
            BoostViews::from(ViewSegment {
                profile: BoostProfile {
                    target_location: BoostTargetLocation::Newsfeed,
                    safe_for_all: false,
                },
                first_cursor: EventCursor::new(MIDNIGHT + 1, 1),
                last_cursor: EventCursor::new(MIDNIGHT + 1, 1),
                views: 1,
            }),
        );
        // Bucket total is corrupted: it should be 1
        source.push(view(MIDNIGHT + 1, 1, "open"));

        let mut agg = WindowAggregator::with_state(DEFAULT_WINDOW_SECS, state);
        let report = agg.advance(MIDNIGHT + WINDOW_MS + 10, &source, &repo);

        assert_eq!(report.prune.unwrap().counted, 1);
        assert_eq!(agg.state().total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 0);
        assert_eq!(agg.state().views_for("open"), 0);
    }

    #[test]
    fn test_window_spans_midnight() {
        let (source, repo, mut agg) = setup();
        let start = MIDNIGHT - 30 * 60 * 1000;
        agg.advance(start, &source, &repo);

        source.extend(vec![
            view(MIDNIGHT - 2, 1, "open"),
            view(MIDNIGHT - 1, 1, "open"),
            view(MIDNIGHT, 1, "open"),
            view(MIDNIGHT + 1, 1, "open"),
        ]);

        let reads_before = source.partition_reads();
        agg.advance(MIDNIGHT + 10, &source, &repo);
        assert_eq!(agg.state().views_for("open"), 4);
        assert_eq!(source.partition_reads() - reads_before, 2);

        // Window boundary lands exactly on midnight
        agg.advance(MIDNIGHT + WINDOW_MS, &source, &repo);
        assert_eq!(agg.state().views_for("open"), 2);

        agg.advance(MIDNIGHT + WINDOW_MS + 2, &source, &repo);
        assert_eq!(agg.state().views_for("open"), 0);
    }

    #[test]
    fn test_revoked_safe_flag_stops_safe_counting() {
        let (source, repo, mut agg) = setup();
        agg.advance(MIDNIGHT, &source, &repo);
        source.push(view(MIDNIGHT + 1_000, 1, "safe"));
        agg.advance(MIDNIGHT + 1_500, &source, &repo);

        repo.upsert_active(BoostShareRatio::new("safe", BoostTargetLocation::Newsfeed, false));
        source.extend((1..=5).map(|i| view(MIDNIGHT + 2_000 + i, 1, "safe")));
        agg.advance(MIDNIGHT + 3_000, &source, &repo);

        let state = agg.state();
        assert_eq!(state.total_views((BoostTargetLocation::Newsfeed, Audience::Safe)), 1);
        assert_eq!(state.total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 6);
        assert_eq!(state.views_for("safe"), 6);
        let views = state.boost_views().find(|(id, _)| *id == "safe").unwrap().1;
        assert_eq!(views.segments.len(), 2);
        assert_eq!(views.profile().map(|p| p.safe_for_all), Some(false));

        // The view counted as safe ages out first
        agg.advance(MIDNIGHT + WINDOW_MS + 1_500, &source, &repo);
        let state = agg.state();
        assert_eq!(state.total_views((BoostTargetLocation::Newsfeed, Audience::Safe)), 0);
        assert_eq!(state.total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 5);
        assert_eq!(state.views_for("safe"), 5);

        agg.advance(MIDNIGHT + WINDOW_MS + 3_000, &source, &repo);
        assert_eq!(agg.state().total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 0);
        assert_eq!(agg.state().views_for("safe"), 0);
        assert_eq!(agg.state().boost_views().count(), 0);
    }

    #[test]
    fn test_relocated_boost_counts_in_new_location() {
        let (source, repo, mut agg) = setup();
        agg.advance(MIDNIGHT, &source, &repo);
        source.extend(vec![view(MIDNIGHT + 1_000, 1, "open"), view(MIDNIGHT + 1_001, 1, "open")]);
        agg.advance(MIDNIGHT + 1_500, &source, &repo);

        repo.upsert_active(BoostShareRatio::new("open", BoostTargetLocation::Sidebar, false));
        source.push(view(MIDNIGHT + 2_000, 1, "open"));
        agg.advance(MIDNIGHT + 2_500, &source, &repo);

        let state = agg.state();
        assert_eq!(state.total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 2);
        assert_eq!(state.total_views((BoostTargetLocation::Sidebar, Audience::Open)), 1);
        assert_eq!(state.views_for("open"), 3);

        agg.advance(MIDNIGHT + WINDOW_MS + 1_500, &source, &repo);
        let state = agg.state();
        assert_eq!(state.total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 0);
        assert_eq!(state.total_views((BoostTargetLocation::Sidebar, Audience::Open)), 1);
        assert_eq!(state.views_for("open"), 1);
    }

    #[test]
    fn test_views_before_registration_are_not_pruned() {
        let (source, repo, mut agg) = setup();
        agg.advance(MIDNIGHT, &source, &repo);
        source.push(view(MIDNIGHT + 1_000, 1, "late"));
        let report = agg.advance(MIDNIGHT + 1_500, &source, &repo);
        assert_eq!(report.ingest.unwrap().unresolved, 1);

        repo.upsert_active(BoostShareRatio::new("late", BoostTargetLocation::Newsfeed, false));
        source.push(view(MIDNIGHT + 2_000, 1, "late"));
        agg.advance(MIDNIGHT + 2_500, &source, &repo);
        assert_eq!(agg.state().views_for("late"), 1);

        // Only the uncounted view has aged out
        let report = agg.advance(MIDNIGHT + WINDOW_MS + 1_500, &source, &repo);
        let prune = report.prune.unwrap();
        assert_eq!(prune.counted, 0);
        assert_eq!(prune.unresolved, 1);
        assert_eq!(agg.state().views_for("late"), 1);
        assert_eq!(agg.state().total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 1);
    }

    #[test]
    fn test_views_while_removed_are_not_pruned() {
        let (source, repo, mut agg) = setup();
        agg.advance(MIDNIGHT, &source, &repo);
        source.push(view(MIDNIGHT + 1_000, 1, "open"));
        agg.advance(MIDNIGHT + 1_500, &source, &repo);

        repo.remove("open");
        source.push(view(MIDNIGHT + 2_000, 1, "open"));
        agg.advance(MIDNIGHT + 2_500, &source, &repo);

        // Re-added with the same profile; the gap still splits the segments
        repo.upsert_active(BoostShareRatio::new("open", BoostTargetLocation::Newsfeed, false));
        source.push(view(MIDNIGHT + 3_000, 1, "open"));
        agg.advance(MIDNIGHT + 3_500, &source, &repo);

        let state = agg.state();
        assert_eq!(state.views_for("open"), 2);
        let views = state.boost_views().find(|(id, _)| *id == "open").unwrap().1;
        assert_eq!(views.segments.len(), 2);

        let report = agg.advance(MIDNIGHT + WINDOW_MS + 2_500, &source, &repo);
        let prune = report.prune.unwrap();
        assert_eq!(prune.counted, 1);
        assert_eq!(prune.unresolved, 1);
        assert_eq!(agg.state().views_for("open"), 1);
        assert_eq!(agg.state().total_views((BoostTargetLocation::Newsfeed, Audience::Open)), 1);
    }

    #[test]
    fn test_oversized_window_saturates() {
        let (source, repo, _) = setup();
        let mut agg = WindowAggregator::new(i64::MAX);
        source.push(view(MIDNIGHT + 1, 1, "open"));

        agg.advance(MIDNIGHT, &source, &repo);
        agg.advance(MIDNIGHT + 10, &source, &repo);

        assert_eq!(agg.window_secs(), i64::MAX);
        assert_eq!(agg.state().views_for("open"), 1);
        assert_eq!(agg.state().min_cursor(), Some(EventCursor::floor(MIDNIGHT - i64::MAX)));
    }
}
