//! In-memory collaborators for tests and local runs
//!
//! Both types are cheap to clone and share their state, so a test can keep a
//! handle while the engine owns another.

use super::cursor::EventCursor;
use super::repository::{BoostRepository, RepositoryError};
use super::source::{CursorRange, EventStream, PartitionedEventSource, SourceError};
use super::types::{BoostRanking, BoostShareRatio, Partition, ViewEvent};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct EventLog {
    partitions: BTreeMap<Partition, BTreeMap<EventCursor, ViewEvent>>,
    fail_after: Option<usize>,
    partition_reads: usize,
}

/// Day-partitioned event log held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSource {
    inner: Arc<Mutex<EventLog>>,
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EventLog> {
        // A poisoned lock only means another test thread panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, event: ViewEvent) {
        self.lock()
            .partitions
            .entry(event.partition)
            .or_default()
            .insert(event.cursor, event);
    }

    pub fn extend(&self, events: impl IntoIterator<Item = ViewEvent>) {
        for event in events {
            self.push(event);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().partitions.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next query yield `events_ok` events and then an error
    pub fn fail_next_query_after(&self, events_ok: usize) {
        self.lock().fail_after = Some(events_ok);
    }

    /// Number of partition reads served so far
    pub fn partition_reads(&self) -> usize {
        self.lock().partition_reads
    }
}

impl PartitionedEventSource for InMemoryEventSource {
    fn query(&self, range: CursorRange) -> Result<EventStream<'_>, SourceError> {
        let mut log = self.lock();
        let fail_after = log.fail_after.take();

        let mut events = Vec::new();
        let mut reads = 0;
        for partition_events in log.partitions.values() {
            let matching: Vec<ViewEvent> = partition_events
                .values()
                .filter(|event| range.contains(&event.cursor))
                .cloned()
                .collect();
            if !matching.is_empty() {
                reads += 1;
                events.extend(matching);
            }
        }
        log.partition_reads += reads;

        let stream: Vec<Result<ViewEvent, SourceError>> = match fail_after {
            Some(n) => events
                .into_iter()
                .take(n)
                .map(Ok)
                .chain(std::iter::once(Err(SourceError::Unavailable(
                    "injected failure".to_string(),
                ))))
                .collect(),
            None => events.into_iter().map(Ok).collect(),
        };

        Ok(Box::new(stream.into_iter()))
    }
}

#[derive(Debug, Default)]
struct BoostStore {
    boosts: BTreeMap<String, BoostShareRatio>,
    active: BTreeSet<String>,
    rankings: HashMap<String, BoostRanking>,
    writes: Vec<BoostRanking>,
    failing_writes: HashSet<String>,
    lookups: usize,
    unavailable: bool,
}

/// Boost repository held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryBoostRepository {
    inner: Arc<Mutex<BoostStore>>,
}

impl InMemoryBoostRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BoostStore> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a boost and mark it active
    pub fn upsert_active(&self, boost: BoostShareRatio) {
        let mut store = self.lock();
        store.active.insert(boost.boost_id.clone());
        store.boosts.insert(boost.boost_id.clone(), boost);
    }

    /// Keep the boost resolvable but stop delivering it
    pub fn deactivate(&self, boost_id: &str) {
        self.lock().active.remove(boost_id);
    }

    /// Forget the boost entirely
    pub fn remove(&self, boost_id: &str) {
        let mut store = self.lock();
        store.active.remove(boost_id);
        store.boosts.remove(boost_id);
    }

    pub fn fail_writes_for(&self, boost_id: &str) {
        self.lock().failing_writes.insert(boost_id.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn ranking(&self, boost_id: &str) -> Option<BoostRanking> {
        self.lock().rankings.get(boost_id).cloned()
    }

    /// Every ranking write accepted so far, in order
    pub fn writes(&self) -> Vec<BoostRanking> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Number of by-guid lookups served
    pub fn lookups(&self) -> usize {
        self.lock().lookups
    }
}

impl BoostRepository for InMemoryBoostRepository {
    fn get_active_boost_share_ratios(&self) -> Result<Vec<BoostShareRatio>, RepositoryError> {
        let store = self.lock();
        if store.unavailable {
            return Err(RepositoryError::Unavailable("injected outage".to_string()));
        }
        Ok(store
            .active
            .iter()
            .filter_map(|id| store.boosts.get(id).cloned())
            .collect())
    }

    fn get_boost_share_ratio_by_guid(&self, boost_id: &str) -> Result<Option<BoostShareRatio>, RepositoryError> {
        let mut store = self.lock();
        if store.unavailable {
            return Err(RepositoryError::Unavailable("injected outage".to_string()));
        }
        store.lookups += 1;
        Ok(store.boosts.get(boost_id).cloned())
    }

    fn add_boost_ranking(&self, ranking: &BoostRanking) -> Result<(), RepositoryError> {
        let mut store = self.lock();
        if store.unavailable || store.failing_writes.contains(&ranking.boost_id) {
            return Err(RepositoryError::Unavailable(format!(
                "write rejected for {}",
                ranking.boost_id
            )));
        }
        store.rankings.insert(ranking.boost_id.clone(), ranking.clone());
        store.writes.push(ranking.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::types::{Audience, BoostTargetLocation};

    #[test]
    fn test_query_orders_across_partitions_and_counts_reads() {
        let source = InMemoryEventSource::new();
        let midnight = 1_710_028_800_000;
        source.push(ViewEvent::new(EventCursor::new(midnight + 1, 1), "b"));
        source.push(ViewEvent::new(EventCursor::new(midnight - 1, 1), "a"));

        let got: Vec<String> = source
            .query(CursorRange::after(EventCursor::floor(0)))
            .unwrap()
            .map(|event| event.unwrap().campaign_tag)
            .collect();

        assert_eq!(got, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(source.partition_reads(), 2);
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let source = InMemoryEventSource::new();
        source.extend((1..=3).map(|i| ViewEvent::new(EventCursor::new(i, 1), "t")));
        source.fail_next_query_after(1);

        let first: Vec<_> = source.query(CursorRange::after(EventCursor::floor(0))).unwrap().collect();
        assert_eq!(first.len(), 2);
        assert!(first[0].is_ok());
        assert!(first[1].is_err());

        let second: Vec<_> = source.query(CursorRange::after(EventCursor::floor(0))).unwrap().collect();
        assert_eq!(second.len(), 3);
    }

    #[test]
    fn test_repository_active_set_and_writes() {
        let repo = InMemoryBoostRepository::new();
        repo.upsert_active(BoostShareRatio::new("1", BoostTargetLocation::Newsfeed, false));
        repo.upsert_active(BoostShareRatio::new("2", BoostTargetLocation::Sidebar, true));
        repo.deactivate("2");

        let active = repo.get_active_boost_share_ratios().unwrap();
        assert_eq!(active.len(), 1);
        assert!(repo.get_boost_share_ratio_by_guid("2").unwrap().is_some());

        repo.fail_writes_for("1");
        let mut ranking = BoostRanking::new("1");
        ranking.set_rank(Audience::Open, 2.0);
        assert!(repo.add_boost_ranking(&ranking).is_err());
        assert!(repo.writes().is_empty());
    }
}
