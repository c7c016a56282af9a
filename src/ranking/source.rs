//! Event source abstraction over the day-partitioned views log

use super::cursor::EventCursor;
use super::types::ViewEvent;
use std::ops::Bound;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Event source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

/// Cursor bounds of a scan; either side may be open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorRange {
    pub low: Bound<EventCursor>,
    pub high: Bound<EventCursor>,
}

impl CursorRange {
    pub fn new(low: Bound<EventCursor>, high: Bound<EventCursor>) -> Self {
        Self { low, high }
    }

    /// `cursor > after`, no upper bound
    pub fn after(after: EventCursor) -> Self {
        Self::new(Bound::Excluded(after), Bound::Unbounded)
    }

    pub fn contains(&self, cursor: &EventCursor) -> bool {
        let above = match self.low {
            Bound::Included(low) => *cursor >= low,
            Bound::Excluded(low) => *cursor > low,
            Bound::Unbounded => true,
        };
        let below = match self.high {
            Bound::Included(high) => *cursor <= high,
            Bound::Excluded(high) => *cursor < high,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// True when no cursor can satisfy both bounds
    pub fn is_empty(&self) -> bool {
        match (self.low, self.high) {
            (Bound::Included(low), Bound::Included(high)) => low > high,
            (Bound::Included(low), Bound::Excluded(high))
            | (Bound::Excluded(low), Bound::Included(high))
            | (Bound::Excluded(low), Bound::Excluded(high)) => low >= high,
            _ => false,
        }
    }
}

/// Lazy, ascending stream of view events
pub type EventStream<'a> = Box<dyn Iterator<Item = Result<ViewEvent, SourceError>> + 'a>;

/// Source of view events
///
/// Implementations must yield events in strictly increasing cursor order and
/// traverse every calendar-day partition the range spans. An error item ends
/// the stream; callers must treat everything read so far as unconfirmed.
pub trait PartitionedEventSource {
    fn query(&self, range: CursorRange) -> Result<EventStream<'_>, SourceError>;
}
