//! Cache-layer projections: open slots and timestamped snapshots.

use serde::{Deserialize, Serialize};
use trellis_tree::{DownlineStats, Node, NodeId, Side};

/// A publicly known empty child position.
///
/// Advisory only: consumers must re-check the parent's side in the tree
/// store before committing a placement to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub parent_node_id: NodeId,
    pub parent_user_id: String,
    pub side: Side,
    /// Level a node placed here would receive
    pub level: u32,
    /// Referral code of the search origin this slot belongs to
    pub sponsor_code: String,
}

impl AvailableSlot {
    /// The slot on `side` of `parent`.
    pub fn under(parent: &Node, side: Side, sponsor_code: &str) -> Self {
        Self {
            parent_node_id: parent.id,
            parent_user_id: parent.user_id.clone(),
            side,
            level: parent.level + 1,
            sponsor_code: sponsor_code.to_string(),
        }
    }

    /// Both child slots of `node`, left first.
    pub fn children_of(node: &Node, sponsor_code: &str) -> [Self; 2] {
        [
            Self::under(node, Side::Left, sponsor_code),
            Self::under(node, Side::Right, sponsor_code),
        ]
    }
}

/// Which available-slot queue an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueScope {
    /// Searches that start at the tree root
    Global,
    /// Searches that start at the node owning this referral code
    Sponsor(String),
}

impl QueueScope {
    /// Tag carried by slots in this queue (empty for the global queue).
    pub fn code(&self) -> &str {
        match self {
            QueueScope::Global => "",
            QueueScope::Sponsor(code) => code,
        }
    }

    /// The queue for breadth-first searches seeded at `sponsor`.
    pub fn for_sponsor(sponsor: &Node) -> Self {
        if sponsor.is_root() {
            QueueScope::Global
        } else {
            QueueScope::Sponsor(sponsor.referral_code.clone())
        }
    }
}

/// Time-boxed copy of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node: Node,
    /// Unix millis when written
    pub cached_at: u64,
}

/// Time-boxed copy of a member's downline statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub user_id: String,
    pub stats: DownlineStats,
    /// Unix millis when written
    pub cached_at: u64,
}
