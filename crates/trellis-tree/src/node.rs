//! Node model: one member's position in the binary placement tree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Slot identity of a node, assigned at insertion and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Create from raw id.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[inline]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One of the two child positions under a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Both sides in placement priority order.
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// The other side.
    pub const fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a node hangs relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeSide {
    Root,
    Left,
    Right,
}

impl NodeSide {
    /// The parent-relative side, `None` for the root.
    pub const fn side(self) -> Option<Side> {
        match self {
            NodeSide::Root => None,
            NodeSide::Left => Some(Side::Left),
            NodeSide::Right => Some(Side::Right),
        }
    }
}

impl From<Side> for NodeSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => NodeSide::Left,
            Side::Right => NodeSide::Right,
        }
    }
}

impl fmt::Display for NodeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSide::Root => f.write_str("root"),
            NodeSide::Left => f.write_str("left"),
            NodeSide::Right => f.write_str("right"),
        }
    }
}

/// A member's node in the tree.
///
/// Linkage fields (`parent_id`, `left_child_id`, `right_child_id`) are owned
/// by the [`TreeStore`](crate::TreeStore); callers build a detached node with
/// [`Node::root`] or [`Node::child`] and hand it to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,

    /// Owning member
    pub user_id: String,

    /// Human-readable name for tree projections
    pub display_name: String,

    /// `None` only for the root
    pub parent_id: Option<NodeId>,

    pub left_child_id: Option<NodeId>,

    pub right_child_id: Option<NodeId>,

    /// Root is level 0
    pub level: u32,

    pub side: NodeSide,

    /// Referral code this node was placed through (empty for the root)
    pub sponsor_code: String,

    /// Code this node hands out to its own recruits
    pub referral_code: String,

    pub active: bool,
}

impl Node {
    /// Build the root node.
    pub fn root(id: NodeId, user_id: impl Into<String>, referral_code: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            id,
            display_name: user_id.clone(),
            user_id,
            parent_id: None,
            left_child_id: None,
            right_child_id: None,
            level: 0,
            side: NodeSide::Root,
            sponsor_code: String::new(),
            referral_code: referral_code.into(),
            active: true,
        }
    }

    /// Build a detached child of `parent` on `side`.
    pub fn child(
        id: NodeId,
        user_id: impl Into<String>,
        parent: &Node,
        side: Side,
        sponsor_code: impl Into<String>,
        referral_code: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            id,
            display_name: user_id.clone(),
            user_id,
            parent_id: Some(parent.id),
            left_child_id: None,
            right_child_id: None,
            level: parent.level + 1,
            side: side.into(),
            sponsor_code: sponsor_code.into(),
            referral_code: referral_code.into(),
            active: true,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Child id on the given side.
    pub fn child_id(&self, side: Side) -> Option<NodeId> {
        match side {
            Side::Left => self.left_child_id,
            Side::Right => self.right_child_id,
        }
    }

    pub(crate) fn child_slot_mut(&mut self, side: Side) -> &mut Option<NodeId> {
        match side {
            Side::Left => &mut self.left_child_id,
            Side::Right => &mut self.right_child_id,
        }
    }

    /// First empty side in placement order.
    pub fn first_open_side(&self) -> Option<Side> {
        Side::BOTH.into_iter().find(|s| self.child_id(*s).is_none())
    }

    /// Number of filled child slots (0, 1 or 2).
    pub fn child_count(&self) -> u32 {
        self.left_child_id.is_some() as u32 + self.right_child_id.is_some() as u32
    }

    pub fn is_full(&self) -> bool {
        self.child_count() == 2
    }
}

/// Immediate children of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Children {
    pub left: Option<Node>,
    pub right: Option<Node>,
}

impl Children {
    pub fn get(&self, side: Side) -> Option<&Node> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    pub fn is_empty(&self, side: Side) -> bool {
        self.get(side).is_none()
    }
}

/// Aggregate downline statistics for one member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownlineStats {
    /// All descendants, both sides, all depths
    pub total_downline: u64,
    /// Left child plus its downline (0 if no left child)
    pub left_side_count: u64,
    /// Right child plus its downline (0 if no right child)
    pub right_side_count: u64,
    /// Filled immediate slots
    pub direct_referrals: u32,
    /// Levels from this node to its deepest descendant
    pub max_depth: u32,
}
