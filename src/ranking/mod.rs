//! # Boost Delivery Ranking
//!
//! Ranks active boosts by how far each one is behind its entitled share of
//! impressions over a trailing window (one hour by default).
//!
//! ## Architecture
//!
//! ```text
//! views log (day partitions) ──► WindowAggregator ──► WindowState
//!                                      ▲                  │
//!                  boost profiles ─────┘                  ▼
//! BoostRepository ──► ActiveBoostCache ──► RankCalculator ──► boost_rankings
//! ```
//!
//! 1. Each cycle refreshes the active boost set with its share ratios
//! 2. The window ingests new views and prunes expired ones, resuming from two
//!    persistent cursors
//! 3. Every active boost gets `rank = total_views * share / max(actual, 1)`
//!    per audience it competes in
//!
//! Cycles are strictly sequential; `scheduler` owns the timing.
//!
//! ## Schema Reference
//!
//! See `/sql/`:
//! - `views` → `ViewEvent`
//! - `boosts` → `BoostShareRatio`
//! - `boost_rankings` → `BoostRanking`
//!
//! ## Module Organization
//!
//! - `cursor` / `types` / `campaign` - data model
//! - `source` / `sqlite_source` - partitioned views log
//! - `repository` / `db` - boost repository and migrations
//! - `memory` - in-memory collaborators
//! - `window` - sliding-window counters
//! - `cache` / `rank` / `engine` - ranking cycle
//! - `persistence` / `config` / `scheduler` - runtime plumbing

pub mod cache;
pub mod campaign;
pub mod config;
pub mod cursor;
pub mod db;
pub mod engine;
pub mod memory;
pub mod persistence;
pub mod rank;
pub mod repository;
pub mod scheduler;
pub mod source;
pub mod sqlite_source;
pub mod types;
pub mod window;

pub use cursor::EventCursor;
pub use engine::{CycleReport, RankingEngine, RankingError};
pub use repository::{BoostRepository, RepositoryError};
pub use source::{CursorRange, PartitionedEventSource, SourceError};
pub use types::{Audience, BoostRanking, BoostShareRatio, BoostTargetLocation, Partition, TargetKey, ViewEvent};
pub use window::{WindowAggregator, WindowError, WindowState};
