//! Core data structures for the boost ranking engine

use super::cursor::EventCursor;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Feed location a boost competes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoostTargetLocation {
    Newsfeed,
    Sidebar,
}

impl BoostTargetLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoostTargetLocation::Newsfeed => "newsfeed",
            BoostTargetLocation::Sidebar => "sidebar",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "newsfeed" => Some(BoostTargetLocation::Newsfeed),
            "sidebar" => Some(BoostTargetLocation::Sidebar),
            _ => None,
        }
    }

    pub fn all() -> [BoostTargetLocation; 2] {
        [BoostTargetLocation::Newsfeed, BoostTargetLocation::Sidebar]
    }
}

/// Audience bucket
///
/// Every boost competes in `Open`; only safe-for-all boosts also compete in `Safe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Open,
    Safe,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Open => "open",
            Audience::Safe => "safe",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Audience::Open),
            "safe" => Some(Audience::Safe),
            _ => None,
        }
    }

    pub fn all() -> [Audience; 2] {
        [Audience::Open, Audience::Safe]
    }
}

/// Bucket of the view totals: `(location, audience)`
pub type TargetKey = (BoostTargetLocation, Audience);

/// UTC calendar day the views log is partitioned by
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl Partition {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }

    pub fn from_timestamp_ms(timestamp_ms: i64) -> Self {
        let date = chrono::DateTime::from_timestamp_millis(timestamp_ms)
            .unwrap_or_default()
            .date_naive();
        Self::from_date(date)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn to_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    /// Packed `yyyymmdd` form, used for min/max lookups in storage
    pub fn key(&self) -> i64 {
        self.year as i64 * 10_000 + self.month as i64 * 100 + self.day as i64
    }

    pub fn from_key(key: i64) -> Option<Self> {
        let year = i32::try_from(key / 10_000).ok()?;
        let month = ((key / 100) % 100) as u32;
        let day = (key % 100) as u32;
        NaiveDate::from_ymd_opt(year, month, day).map(Self::from_date)
    }

    /// Every partition from `from` to `to`, both inclusive, in ascending order
    pub fn days_between(from: Partition, to: Partition) -> Vec<Partition> {
        let (Some(mut date), Some(end)) = (from.to_date(), to.to_date()) else {
            return Vec::new();
        };

        let mut days = Vec::new();
        while date <= end {
            days.push(Self::from_date(date));
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        days
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// A single impression recorded by the tracking system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEvent {
    pub cursor: EventCursor,
    pub campaign_tag: String,
    pub partition: Partition,
}

impl ViewEvent {
    /// Build an event, deriving its partition from the cursor timestamp
    pub fn new(cursor: EventCursor, campaign_tag: impl Into<String>) -> Self {
        Self {
            partition: Partition::from_timestamp_ms(cursor.timestamp_ms),
            cursor,
            campaign_tag: campaign_tag.into(),
        }
    }
}

/// Declared share targets of a boost, per audience bucket
#[derive(Debug, Clone, PartialEq)]
pub struct BoostShareRatio {
    pub boost_id: String,
    pub target_location: BoostTargetLocation,
    pub safe_for_all: bool,
    pub target_audience_share: BTreeMap<Audience, f64>,
}

impl BoostShareRatio {
    pub fn new(boost_id: impl Into<String>, target_location: BoostTargetLocation, safe_for_all: bool) -> Self {
        Self {
            boost_id: boost_id.into(),
            target_location,
            safe_for_all,
            target_audience_share: BTreeMap::new(),
        }
    }

    pub fn with_share(mut self, audience: Audience, share: f64) -> Self {
        self.target_audience_share.insert(audience, share);
        self
    }

    /// Declared share for `audience`, 0 when absent
    pub fn share(&self, audience: Audience) -> f64 {
        self.target_audience_share.get(&audience).copied().unwrap_or(0.0)
    }

    pub fn competes_in(&self, audience: Audience) -> bool {
        match audience {
            Audience::Open => true,
            Audience::Safe => self.safe_for_all,
        }
    }

    /// Audiences this boost legitimately competes in
    pub fn audiences(&self) -> Vec<Audience> {
        Audience::all()
            .into_iter()
            .filter(|audience| self.competes_in(*audience))
            .collect()
    }
}

/// Per-audience rank of a boost for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct BoostRanking {
    pub boost_id: String,
    pub rank_by_audience: BTreeMap<Audience, f64>,
}

impl BoostRanking {
    pub fn new(boost_id: impl Into<String>) -> Self {
        Self {
            boost_id: boost_id.into(),
            rank_by_audience: BTreeMap::new(),
        }
    }

    pub fn set_rank(&mut self, audience: Audience, rank: f64) {
        self.rank_by_audience.insert(audience, rank);
    }

    pub fn rank(&self, audience: Audience) -> Option<f64> {
        self.rank_by_audience.get(&audience).copied()
    }
}
