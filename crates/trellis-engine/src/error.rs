//! Placement error taxonomy.
//!
//! Cache faults never appear here; they are absorbed inside the cache.
//! Tree store errors are mapped onto the caller-facing variants below.

use thiserror::Error;
use trellis_tree::{NodeId, TreeError};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, PlacementError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlacementError {
    /// No node owns the sponsor code
    #[error("sponsor code {0:?} not found")]
    SponsorNotFound(String),

    /// Breadth-first search drained without finding an open side
    #[error("no available slot under sponsor {0:?}")]
    NoAvailableSlot(String),

    /// Every attempt lost its slot to a concurrent placement
    #[error("placement conflict after {attempts} attempts")]
    PlacementConflict { attempts: u32 },

    /// The placement deadline passed before commit
    #[error("placement timed out")]
    PlacementTimeout,

    /// A read traversal ran past its deadline
    #[error("traversal timed out")]
    TraversalTimeout,

    #[error("user {0:?} not found")]
    UserNotFound(String),

    #[error("user {0:?} is already placed")]
    UserAlreadyPlaced(String),

    #[error("tree already has a root node {0}")]
    RootExists(NodeId),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("duplicate node id {0}")]
    DuplicateId(NodeId),

    #[error("referral code {0:?} already in use")]
    DuplicateReferralCode(String),

    #[error("invalid parent for node {node}: {reason}")]
    InvalidParent { node: NodeId, reason: String },

    /// Durable backend fault
    #[error("storage error: {0}")]
    Storage(String),
}

impl PlacementError {
    /// Stable taxonomy name, for wire responses.
    pub fn code(&self) -> &'static str {
        match self {
            PlacementError::SponsorNotFound(_) => "SponsorNotFound",
            PlacementError::NoAvailableSlot(_) => "NoAvailableSlot",
            PlacementError::PlacementConflict { .. } => "PlacementConflict",
            PlacementError::PlacementTimeout => "PlacementTimeout",
            PlacementError::TraversalTimeout => "TraversalTimeout",
            PlacementError::UserNotFound(_) => "UserNotFound",
            PlacementError::UserAlreadyPlaced(_) => "UserAlreadyPlaced",
            PlacementError::RootExists(_) => "RootExists",
            PlacementError::NodeNotFound(_) => "NodeNotFound",
            PlacementError::DuplicateId(_) => "DuplicateId",
            PlacementError::DuplicateReferralCode(_) => "DuplicateReferralCode",
            PlacementError::InvalidParent { .. } => "InvalidParent",
            PlacementError::Storage(_) => "Storage",
        }
    }
}

impl From<TreeError> for PlacementError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::NodeNotFound(id) => PlacementError::NodeNotFound(id),
            TreeError::UserNotFound(user) => PlacementError::UserNotFound(user),
            TreeError::CodeNotFound(code) => PlacementError::SponsorNotFound(code),
            TreeError::DuplicateId(id) => PlacementError::DuplicateId(id),
            TreeError::DuplicateUser(user) => PlacementError::UserAlreadyPlaced(user),
            TreeError::DuplicateReferralCode(code) => PlacementError::DuplicateReferralCode(code),
            TreeError::InvalidParent { node, reason } => {
                PlacementError::InvalidParent { node, reason }
            }
            TreeError::RootExists(id) => PlacementError::RootExists(id),
            // Only reachable if a race escapes the retry loop.
            TreeError::SlotOccupied { .. } => PlacementError::PlacementConflict { attempts: 1 },
            TreeError::Storage(msg) => PlacementError::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_tree::Side;

    #[test]
    fn tree_errors_map_to_taxonomy() {
        let e: PlacementError = TreeError::CodeNotFound("X".into()).into();
        assert_eq!(e.code(), "SponsorNotFound");

        let e: PlacementError = TreeError::DuplicateUser("bob".into()).into();
        assert_eq!(e, PlacementError::UserAlreadyPlaced("bob".into()));

        let e: PlacementError = TreeError::SlotOccupied {
            parent: NodeId(1),
            side: Side::Left,
        }
        .into();
        assert_eq!(e.code(), "PlacementConflict");
    }
}
