//! Downline aggregates.

use crate::deadline::Deadline;
use crate::error::{PlacementError, Result};
use std::sync::Arc;
use tracing::debug;
use trellis_cache::PositionCache;
use trellis_tree::{DownlineStats, Node, Side, TreeStore};

/// Computes [`DownlineStats`], reading through the stats snapshot cache.
pub struct StatsCalculator<S> {
    store: Arc<S>,
    cache: Arc<PositionCache>,
}

impl<S: TreeStore> StatsCalculator<S> {
    pub fn new(store: Arc<S>, cache: Arc<PositionCache>) -> Self {
        Self { store, cache }
    }

    /// Stats for a member, served from a fresh snapshot when one exists.
    pub fn stats(&self, user_id: &str) -> Result<DownlineStats> {
        self.stats_within(user_id, Deadline::none())
    }

    /// Like [`stats`](Self::stats), failing with `TraversalTimeout` once
    /// `deadline` passes mid-walk.
    pub fn stats_within(&self, user_id: &str, deadline: Deadline) -> Result<DownlineStats> {
        if let Some(snapshot) = self.cache.stats_snapshot(user_id) {
            return Ok(snapshot.stats);
        }
        let generation = self.cache.generation();
        let stats = self.compute(user_id, deadline)?;
        self.cache.store_stats_since(user_id, stats, generation);
        Ok(stats)
    }

    /// Full traversal, bypassing the cache in both directions.
    pub fn recompute(&self, user_id: &str) -> Result<DownlineStats> {
        self.compute(user_id, Deadline::none())
    }

    fn compute(&self, user_id: &str, deadline: Deadline) -> Result<DownlineStats> {
        let node = self.store.get_by_user(user_id)?;
        let mut stats = DownlineStats {
            direct_referrals: node.child_count(),
            ..Default::default()
        };
        let mut deepest = node.level;

        for side in Side::BOTH {
            let Some(child_id) = node.child_id(side) else {
                continue;
            };
            let (count, level) = self.walk(&self.store.get(child_id)?, deadline)?;
            deepest = deepest.max(level);
            match side {
                Side::Left => stats.left_side_count = count,
                Side::Right => stats.right_side_count = count,
            }
        }

        stats.total_downline = stats.left_side_count + stats.right_side_count;
        stats.max_depth = deepest - node.level;
        debug!("Computed stats for {}: {:?}", user_id, stats);
        Ok(stats)
    }

    /// Size of the subtree rooted at `top` and its deepest level.
    fn walk(&self, top: &Node, deadline: Deadline) -> Result<(u64, u32)> {
        let mut count = 1;
        let mut deepest = top.level;
        for node in self.store.descendants(top.id) {
            deadline.check_or(PlacementError::TraversalTimeout)?;
            let node = node?;
            count += 1;
            deepest = deepest.max(node.level);
        }
        Ok((count, deepest))
    }
}
