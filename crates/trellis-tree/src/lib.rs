//! Trellis Placement Tree
//!
//! Authoritative model of a binary referral tree: every member owns exactly
//! one node, every node has at most two children (left and right), and the
//! tree only ever grows. Nodes are never deleted or re-parented.
//!
//! # Store Contract
//!
//! [`TreeStore`] is the narrow interface the rest of the system builds on.
//! Its one contended write, [`TreeStore::set_child`], is an atomic
//! compare-and-set on `(parent, side)`: of two concurrent attempts to fill
//! the same slot exactly one succeeds and the other receives
//! [`TreeError::SlotOccupied`]. [`TreeStore::attach`] pairs the insert with
//! that link so a failed placement never leaves an orphan behind.
//!
//! # Invariants
//!
//! - Every non-root node has exactly one parent, whose matching side points back
//! - `level` is the parent's level plus one; the root is level 0
//! - One node per user, one node per referral code
//!
//! [`check_integrity`] audits all of these over a full scan.

mod error;
mod integrity;
mod memory;
mod node;
mod store;
mod view;

pub use error::{Result, TreeError};
pub use integrity::{check_integrity, IntegrityReport};
pub use memory::MemoryTreeStore;
pub use node::{Children, DownlineStats, Node, NodeId, NodeSide, Side};
pub use store::{Ancestors, Descendants, TreeStore};
pub use view::{build_tree_view, TreeViewNode, DEFAULT_VIEW_DEPTH};
