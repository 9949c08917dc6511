//! Read-only nested projection of a subtree, for visualization collaborators.
//!
//! Built with an explicit stack and a depth cap so very deep trees can
//! never exhaust the call stack.

use crate::error::{Result, TreeError};
use crate::node::{Node, NodeId, NodeSide};
use crate::store::TreeStore;
use serde::{Deserialize, Serialize};

/// Default number of levels below the requested root to include.
pub const DEFAULT_VIEW_DEPTH: u32 = 16;

/// One node of the nested projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeViewNode {
    pub id: NodeId,
    pub user_id: String,
    pub display_name: String,
    pub sponsor_code: String,
    pub level: u32,
    pub side: NodeSide,
    pub active: bool,
    /// Left child first, then right
    pub children: Vec<TreeViewNode>,
    /// Set when children exist below the depth cap
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl TreeViewNode {
    fn leaf(node: &Node, truncated: bool) -> Self {
        Self {
            id: node.id,
            user_id: node.user_id.clone(),
            display_name: node.display_name.clone(),
            sponsor_code: node.sponsor_code.clone(),
            level: node.level,
            side: node.side,
            active: node.active,
            children: Vec::new(),
            truncated,
        }
    }

    /// Number of nodes in this projection, including itself.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

/// Build the nested view rooted at `root_user_id`, at most `max_depth`
/// levels below it.
pub fn build_tree_view<S: TreeStore + ?Sized>(
    store: &S,
    root_user_id: &str,
    max_depth: u32,
) -> Result<TreeViewNode> {
    let root = store.get_by_user(root_user_id)?;

    // Pre-order arena: each entry remembers its parent's arena index.
    let mut arena: Vec<(Option<usize>, TreeViewNode)> = Vec::new();
    let mut stack: Vec<(Node, Option<usize>, u32)> = vec![(root, None, 0)];

    while let Some((node, parent, depth)) = stack.pop() {
        let has_children = node.child_count() > 0;
        let expand = depth < max_depth;
        let index = arena.len();
        arena.push((parent, TreeViewNode::leaf(&node, has_children && !expand)));

        if expand {
            // Push right first so left is popped (and ordered) first.
            for child_id in [node.right_child_id, node.left_child_id].into_iter().flatten() {
                let child = store.get(child_id)?;
                stack.push((child, Some(index), depth + 1));
            }
        }
    }

    // Children always follow their parent in pre-order, so folding from the
    // back attaches every subtree before its parent is itself attached.
    let mut slots: Vec<Option<TreeViewNode>> = Vec::with_capacity(arena.len());
    let mut parents = Vec::with_capacity(arena.len());
    for (parent, view) in arena {
        parents.push(parent);
        slots.push(Some(view));
    }

    for index in (1..slots.len()).rev() {
        let Some(view) = slots[index].take() else { continue };
        if let Some(parent) = parents[index] {
            if let Some(parent_view) = slots[parent].as_mut() {
                parent_view.children.insert(0, view);
            }
        }
    }

    slots
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| TreeError::UserNotFound(root_user_id.to_string()))
}
