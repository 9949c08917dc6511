//! Error types for tree storage.

use crate::node::{NodeId, Side};
use thiserror::Error;

/// Result type for tree store operations.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Structural errors raised by a [`TreeStore`](crate::TreeStore).
///
/// These are always surfaced to callers; only [`TreeError::SlotOccupied`]
/// is treated as a retryable race by the placement engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// No node with this id
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// No node owned by this user
    #[error("no node for user {0:?}")]
    UserNotFound(String),

    /// No node owns this referral code
    #[error("no node with referral code {0:?}")]
    CodeNotFound(String),

    /// A node with this id already exists
    #[error("duplicate node id {0}")]
    DuplicateId(NodeId),

    /// The user already owns a node
    #[error("user {0:?} already has a node")]
    DuplicateUser(String),

    /// The referral code is already owned by another node
    #[error("referral code {0:?} already in use")]
    DuplicateReferralCode(String),

    /// The parent referenced by a node does not exist, or does not match
    #[error("invalid parent for node {node}: {reason}")]
    InvalidParent { node: NodeId, reason: String },

    /// A root node already exists
    #[error("tree already has a root node {0}")]
    RootExists(NodeId),

    /// The requested side of the parent is already filled
    #[error("slot {side} of node {parent} is already occupied")]
    SlotOccupied { parent: NodeId, side: Side },

    /// Durable backend fault
    #[error("storage error: {0}")]
    Storage(String),
}

impl TreeError {
    /// Whether this error is a lost placement race.
    pub fn is_slot_occupied(&self) -> bool {
        matches!(self, TreeError::SlotOccupied { .. })
    }
}
