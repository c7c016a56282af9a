//! Per-cycle snapshot of deliverable boosts

use super::repository::{BoostRepository, RepositoryError};
use super::types::BoostShareRatio;
use std::collections::BTreeMap;

/// Active boosts keyed by guid, valid for one cycle
#[derive(Debug, Default)]
pub struct ActiveBoostCache {
    boosts: BTreeMap<String, BoostShareRatio>,
}

impl ActiveBoostCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot with the repository's current active set
    ///
    /// On failure the cache is left empty rather than stale.
    pub fn refresh(&mut self, repository: &dyn BoostRepository) -> Result<usize, RepositoryError> {
        self.boosts.clear();

        for boost in repository.get_active_boost_share_ratios()? {
            self.boosts.insert(boost.boost_id.clone(), boost);
        }

        log::debug!("🗂️  Active boost cache refreshed: {} boosts", self.boosts.len());
        Ok(self.boosts.len())
    }

    pub fn get(&self, boost_id: &str) -> Option<&BoostShareRatio> {
        self.boosts.get(boost_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoostShareRatio> {
        self.boosts.values()
    }

    pub fn len(&self) -> usize {
        self.boosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boosts.is_empty()
    }
}
