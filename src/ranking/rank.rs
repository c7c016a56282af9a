//! Deficit rank of a boost against its entitled share of views

use super::types::{Audience, BoostRanking, BoostShareRatio, TargetKey};
use super::window::WindowState;

/// Inputs and result of one audience's rank, kept for logging
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudienceRank {
    pub audience: Audience,
    pub total_views: u64,
    pub share_of_bids: f64,
    pub views_target: f64,
    pub views_actual: u64,
    pub rank: f64,
}

/// Stateless rank formula
///
/// `rank = total_views * share / max(views_actual, 1)`. Values above 1 mean
/// the boost is behind its share and should be delivered first.
#[derive(Debug, Clone, Copy, Default)]
pub struct RankCalculator;

impl RankCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn audience_rank(&self, boost: &BoostShareRatio, audience: Audience, state: &WindowState) -> AudienceRank {
        let target_key: TargetKey = (boost.target_location, audience);
        let total_views = state.total_views(target_key);
        let share_of_bids = boost.share(audience);
        let views_target = total_views as f64 * share_of_bids;
        let views_actual = state.views_for(&boost.boost_id);
        let rank = views_target / views_actual.max(1) as f64;

        AudienceRank {
            audience,
            total_views,
            share_of_bids,
            views_target,
            views_actual,
            rank,
        }
    }

    /// Rank a boost in every audience it competes in
    pub fn compute(&self, boost: &BoostShareRatio, state: &WindowState) -> (BoostRanking, Vec<AudienceRank>) {
        let mut ranking = BoostRanking::new(boost.boost_id.clone());
        let mut breakdown = Vec::with_capacity(2);

        for audience in boost.audiences() {
            let result = self.audience_rank(boost, audience, state);
            ranking.set_rank(audience, result.rank);
            breakdown.push(result);
        }

        (ranking, breakdown)
    }
}
