//! Resumable scan position over the views log
//!
//! A cursor is the pair `(timestamp_ms, seq)`. Events carry `seq >= 1`, so the
//! boundary cursors built from a bare timestamp (`floor`, `ceiling`) never
//! collide with a real event id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Strictly ordered event identifier (timestamp + tie-breaker)
///
/// Ordering is lexicographic on `(timestamp_ms, seq)`; the derive relies on
/// field declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventCursor {
    pub timestamp_ms: i64,
    pub seq: u32,
}

impl EventCursor {
    pub fn new(timestamp_ms: i64, seq: u32) -> Self {
        Self { timestamp_ms, seq }
    }

    /// Sorts before every event recorded at `timestamp_ms`
    pub fn floor(timestamp_ms: i64) -> Self {
        Self { timestamp_ms, seq: 0 }
    }

    /// Sorts after every event recorded at `timestamp_ms`
    pub fn ceiling(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            seq: u32::MAX,
        }
    }

    /// True for cursors produced by `floor`/`ceiling` rather than by an event
    pub fn is_boundary(&self) -> bool {
        self.seq == 0 || self.seq == u32::MAX
    }
}

impl fmt::Display for EventCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp_ms, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid event cursor: {0}")]
pub struct ParseCursorError(String);

impl FromStr for EventCursor {
    type Err = ParseCursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // rsplit so negative timestamps ("-5-1") still parse
        let (ts, seq) = s
            .rsplit_once('-')
            .ok_or_else(|| ParseCursorError(s.to_string()))?;
        let timestamp_ms = ts
            .parse::<i64>()
            .map_err(|_| ParseCursorError(s.to_string()))?;
        let seq = seq
            .parse::<u32>()
            .map_err(|_| ParseCursorError(s.to_string()))?;
        Ok(Self { timestamp_ms, seq })
    }
}
