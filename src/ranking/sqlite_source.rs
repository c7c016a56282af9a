//! SQLite-backed views log with partition-spanning keyset scans
//!
//! The `views` table is keyed by `(year, month, day, ts_ms, seq)`. A logical
//! scan is served one day partition at a time, `page_size` rows per query,
//! resuming each page strictly after the last cursor returned. Callers see a
//! single ascending stream regardless of how many partitions it touches.

use super::cursor::EventCursor;
use super::source::{CursorRange, EventStream, PartitionedEventSource, SourceError};
use super::types::{Partition, ViewEvent};
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::VecDeque;
use std::ops::Bound;
use std::path::Path;

pub const DEFAULT_PAGE_SIZE: usize = 2500;

/// SQLite views log reader
pub struct SqliteEventSource {
    conn: Connection,
    page_size: usize,
}

impl SqliteEventSource {
    /// Open the views log at `db_path`
    ///
    /// Does NOT create the schema; run the migrations in `sql/` first.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;

        Ok(Self {
            conn,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Append events to the log in one transaction
    pub fn append_all(&self, events: &[ViewEvent]) -> Result<(), SourceError> {
        let tx = self.conn.unchecked_transaction()?;

        for event in events {
            if event.cursor.is_boundary() {
                return Err(SourceError::InvalidEvent(format!(
                    "cursor {} uses a reserved sequence",
                    event.cursor
                )));
            }

            tx.execute(
                "INSERT INTO views (year, month, day, ts_ms, seq, campaign)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.partition.year,
                    event.partition.month,
                    event.partition.day,
                    event.cursor.timestamp_ms,
                    event.cursor.seq,
                    event.campaign_tag,
                ],
            )?;
        }

        tx.commit()?;
        log::debug!("📥 Appended {} view events", events.len());
        Ok(())
    }

    /// Record a view at `timestamp_ms`, assigning the next free sequence number
    pub fn record_view(&self, timestamp_ms: i64, campaign_tag: &str) -> Result<EventCursor, SourceError> {
        let partition = Partition::from_timestamp_ms(timestamp_ms);
        let last_seq: Option<i64> = self.conn.query_row(
            "SELECT MAX(seq) FROM views WHERE year = ?1 AND month = ?2 AND day = ?3 AND ts_ms = ?4",
            params![partition.year, partition.month, partition.day, timestamp_ms],
            |row| row.get(0),
        )?;

        let seq = u32::try_from(last_seq.unwrap_or(0) + 1)
            .map_err(|_| SourceError::InvalidEvent(format!("sequence overflow at {}", timestamp_ms)))?;
        let cursor = EventCursor::new(timestamp_ms, seq);
        self.append_all(&[ViewEvent::new(cursor, campaign_tag)])?;
        Ok(cursor)
    }

    /// Partitions a range touches, oldest first
    fn partitions_for(&self, range: &CursorRange) -> Result<VecDeque<Partition>, SourceError> {
        let (min_key, max_key): (Option<i64>, Option<i64>) = self
            .conn
            .query_row(
                "SELECT MIN(year * 10000 + month * 100 + day), MAX(year * 10000 + month * 100 + day)
                 FROM views",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .unwrap_or((None, None));

        let first = match range.low {
            Bound::Included(c) | Bound::Excluded(c) => Some(Partition::from_timestamp_ms(c.timestamp_ms)),
            Bound::Unbounded => min_key.and_then(Partition::from_key),
        };
        let last = match range.high {
            Bound::Included(c) | Bound::Excluded(c) => Some(Partition::from_timestamp_ms(c.timestamp_ms)),
            Bound::Unbounded => max_key.and_then(Partition::from_key),
        };

        match (first, last) {
            (Some(first), Some(last)) => Ok(Partition::days_between(first, last).into()),
            _ => Ok(VecDeque::new()),
        }
    }
}

impl PartitionedEventSource for SqliteEventSource {
    fn query(&self, range: CursorRange) -> Result<EventStream<'_>, SourceError> {
        let partitions = if range.is_empty() {
            VecDeque::new()
        } else {
            self.partitions_for(&range)?
        };

        log::debug!(
            "🔎 Scanning {} partition(s) for range {:?}..{:?}",
            partitions.len(),
            range.low,
            range.high
        );

        Ok(Box::new(PartitionScan {
            conn: &self.conn,
            range,
            partitions,
            current: None,
            position: range.low,
            page: VecDeque::new(),
            page_size: self.page_size,
            failed: false,
        }))
    }
}

/// Lazy scan over consecutive day partitions
pub struct PartitionScan<'a> {
    conn: &'a Connection,
    range: CursorRange,
    partitions: VecDeque<Partition>,
    current: Option<Partition>,
    position: Bound<EventCursor>,
    page: VecDeque<ViewEvent>,
    page_size: usize,
    failed: bool,
}

impl PartitionScan<'_> {
    fn fetch_page(&self, partition: Partition) -> Result<Vec<ViewEvent>, SourceError> {
        let mut sql = String::from(
            "SELECT ts_ms, seq, campaign FROM views WHERE year = ? AND month = ? AND day = ?",
        );
        let mut values: Vec<Value> = vec![
            Value::Integer(partition.year as i64),
            Value::Integer(partition.month as i64),
            Value::Integer(partition.day as i64),
        ];

        push_bound(&mut sql, &mut values, self.position, ">=", ">");
        push_bound(&mut sql, &mut values, self.range.high, "<=", "<");

        sql.push_str(" ORDER BY ts_ms ASC, seq ASC LIMIT ?");
        values.push(Value::Integer(self.page_size as i64));

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            let timestamp_ms: i64 = row.get(0)?;
            let seq: u32 = row.get(1)?;
            let campaign_tag: String = row.get(2)?;
            Ok(ViewEvent {
                cursor: EventCursor::new(timestamp_ms, seq),
                campaign_tag,
                partition,
            })
        })?;

        let mut events = Vec::with_capacity(self.page_size);
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}

fn push_bound(
    sql: &mut String,
    values: &mut Vec<Value>,
    bound: Bound<EventCursor>,
    inclusive_op: &str,
    exclusive_op: &str,
) {
    let (op, cursor) = match bound {
        Bound::Included(c) => (inclusive_op, c),
        Bound::Excluded(c) => (exclusive_op, c),
        Bound::Unbounded => return,
    };
    sql.push_str(&format!(" AND (ts_ms, seq) {} (?, ?)", op));
    values.push(Value::Integer(cursor.timestamp_ms));
    values.push(Value::Integer(cursor.seq as i64));
}

impl Iterator for PartitionScan<'_> {
    type Item = Result<ViewEvent, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.page.pop_front() {
                return Some(Ok(event));
            }
            if self.failed {
                return None;
            }

            let partition = match self.current {
                Some(partition) => partition,
                None => {
                    let partition = self.partitions.pop_front()?;
                    self.current = Some(partition);
                    self.position = self.range.low;
                    partition
                }
            };

            match self.fetch_page(partition) {
                Ok(events) => {
                    if events.len() < self.page_size {
                        // Partition drained
                        self.current = None;
                    } else if let Some(last) = events.last() {
                        self.position = Bound::Excluded(last.cursor);
                    }
                    self.page.extend(events);
                }
                Err(e) => {
                    log::warn!("⚠️  View scan failed in partition {}: {}", partition, e);
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::db::run_schema_migrations;
    use tempfile::tempdir;

    const MIDNIGHT: i64 = 1_710_028_800_000; // 2024-03-10T00:00:00Z

    fn setup_source(page_size: usize) -> (tempfile::TempDir, SqliteEventSource) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("views.db");

        let mut conn = Connection::open(&db_path).unwrap();
        run_schema_migrations(&mut conn, concat!(env!("CARGO_MANIFEST_DIR"), "/sql")).unwrap();
        drop(conn);

        let source = SqliteEventSource::new(&db_path).unwrap().with_page_size(page_size);
        (dir, source)
    }

    fn collect(source: &SqliteEventSource, range: CursorRange) -> Vec<EventCursor> {
        source
            .query(range)
            .unwrap()
            .map(|event| event.unwrap().cursor)
            .collect()
    }

    #[test]
    fn test_scan_spans_midnight_across_pages() {
        let (_dir, source) = setup_source(2);

        let mut events = Vec::new();
        for i in 0..5 {
            events.push(ViewEvent::new(EventCursor::new(MIDNIGHT - 5 + i, 1), "urn:boost:newsfeed:1"));
            events.push(ViewEvent::new(EventCursor::new(MIDNIGHT + i, 1), "urn:boost:newsfeed:1"));
        }
        source.append_all(&events).unwrap();

        let got = collect(&source, CursorRange::after(EventCursor::floor(MIDNIGHT - 60_000)));

        assert_eq!(got.len(), 10);
        assert!(got.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(got.first(), Some(&EventCursor::new(MIDNIGHT - 5, 1)));
        assert_eq!(got.last(), Some(&EventCursor::new(MIDNIGHT + 4, 1)));
    }

    #[test]
    fn test_bounds_are_respected() {
        let (_dir, source) = setup_source(100);

        for ts in [1_000, 2_000, 3_000] {
            source.record_view(MIDNIGHT + ts, "tag").unwrap();
        }
        let dup = source.record_view(MIDNIGHT + 2_000, "tag").unwrap();
        assert_eq!(dup, EventCursor::new(MIDNIGHT + 2_000, 2));

        let range = CursorRange::new(
            Bound::Excluded(EventCursor::new(MIDNIGHT + 1_000, 1)),
            Bound::Excluded(EventCursor::floor(MIDNIGHT + 3_000)),
        );
        assert_eq!(
            collect(&source, range),
            vec![
                EventCursor::new(MIDNIGHT + 2_000, 1),
                EventCursor::new(MIDNIGHT + 2_000, 2),
            ]
        );

        let inclusive = CursorRange::new(
            Bound::Unbounded,
            Bound::Included(EventCursor::new(MIDNIGHT + 2_000, 1)),
        );
        assert_eq!(collect(&source, inclusive).len(), 2);
    }

    #[test]
    fn test_gap_days_are_traversed() {
        let (_dir, source) = setup_source(3);
        let day = 86_400_000;

        source.record_view(MIDNIGHT, "a").unwrap();
        source.record_view(MIDNIGHT + 3 * day + 5, "b").unwrap();

        let got = collect(&source, CursorRange::new(Bound::Unbounded, Bound::Unbounded));
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn test_empty_log_and_empty_range() {
        let (_dir, source) = setup_source(10);
        assert!(collect(&source, CursorRange::new(Bound::Unbounded, Bound::Unbounded)).is_empty());

        source.record_view(MIDNIGHT, "a").unwrap();
        let empty = CursorRange::new(
            Bound::Excluded(EventCursor::floor(MIDNIGHT + 10)),
            Bound::Excluded(EventCursor::floor(MIDNIGHT)),
        );
        assert!(collect(&source, empty).is_empty());
    }

    #[test]
    fn test_reserved_sequence_rejected() {
        let (_dir, source) = setup_source(10);
        let result = source.append_all(&[ViewEvent::new(EventCursor::floor(MIDNIGHT), "a")]);
        assert!(matches!(result, Err(SourceError::InvalidEvent(_))));
    }

    #[test]
    fn test_missing_table_surfaces_error() {
        let dir = tempdir().unwrap();
        let source = SqliteEventSource::new(dir.path().join("empty.db")).unwrap();
        assert!(source.query(CursorRange::after(EventCursor::floor(MIDNIGHT))).is_err());
    }
}
