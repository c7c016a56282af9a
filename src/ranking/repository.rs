//! Repository contract: boost share ratios in, rankings out

use super::types::{BoostRanking, BoostShareRatio};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid boost row: {0}")]
    InvalidRow(String),

    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

/// Source of truth for boost share ratios and sink for computed rankings
///
/// Tables (see `sql/`):
/// - `boosts` - read-only for the engine
/// - `boost_rankings` - one row per boost, replaced every cycle
pub trait BoostRepository {
    /// Boosts currently scheduled for delivery
    fn get_active_boost_share_ratios(&self) -> Result<Vec<BoostShareRatio>, RepositoryError>;

    /// Look up any boost by guid, active or not
    fn get_boost_share_ratio_by_guid(&self, boost_id: &str) -> Result<Option<BoostShareRatio>, RepositoryError>;

    /// Store `ranking`, replacing any previous ranking for the same boost
    fn add_boost_ranking(&self, ranking: &BoostRanking) -> Result<(), RepositoryError>;
}
