//! In-memory tree store.
//!
//! All maps live behind one `RwLock`: traversals take the read side and run
//! concurrently, while `set_child` and `attach` take the write side, which
//! makes the slot check and the pointer update a single atomic step.

use crate::error::{Result, TreeError};
use crate::node::{Node, NodeId, Side};
use crate::store::TreeStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<NodeId, Node>,
    by_user: HashMap<String, NodeId>,
    by_code: HashMap<String, NodeId>,
    root: Option<NodeId>,
}

impl Inner {
    fn insert(&mut self, node: Node) -> Result<Node> {
        if self.nodes.contains_key(&node.id) {
            return Err(TreeError::DuplicateId(node.id));
        }
        if self.by_user.contains_key(&node.user_id) {
            return Err(TreeError::DuplicateUser(node.user_id));
        }
        if self.by_code.contains_key(&node.referral_code) {
            return Err(TreeError::DuplicateReferralCode(node.referral_code));
        }
        match node.parent_id {
            Some(parent_id) => {
                let parent = self.nodes.get(&parent_id).ok_or_else(|| TreeError::InvalidParent {
                    node: node.id,
                    reason: format!("parent {} does not exist", parent_id),
                })?;
                if node.level != parent.level + 1 {
                    return Err(TreeError::InvalidParent {
                        node: node.id,
                        reason: format!(
                            "level {} does not follow parent level {}",
                            node.level, parent.level
                        ),
                    });
                }
            }
            None => {
                if let Some(root) = self.root {
                    return Err(TreeError::RootExists(root));
                }
                self.root = Some(node.id);
            }
        }

        let mut stored = node;
        stored.left_child_id = None;
        stored.right_child_id = None;
        self.by_user.insert(stored.user_id.clone(), stored.id);
        self.by_code.insert(stored.referral_code.clone(), stored.id);
        self.nodes.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn remove(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            self.by_user.remove(&node.user_id);
            self.by_code.remove(&node.referral_code);
            if self.root == Some(id) {
                self.root = None;
            }
        }
    }

    fn set_child(&mut self, parent_id: NodeId, side: Side, child_id: NodeId) -> Result<()> {
        let child_parent = self
            .nodes
            .get(&child_id)
            .ok_or(TreeError::NodeNotFound(child_id))?
            .parent_id;
        if child_parent != Some(parent_id) {
            return Err(TreeError::InvalidParent {
                node: child_id,
                reason: format!("child does not reference parent {}", parent_id),
            });
        }

        let parent = self
            .nodes
            .get_mut(&parent_id)
            .ok_or(TreeError::NodeNotFound(parent_id))?;
        let slot = parent.child_slot_mut(side);
        if slot.is_some() {
            return Err(TreeError::SlotOccupied {
                parent: parent_id,
                side,
            });
        }
        *slot = Some(child_id);
        Ok(())
    }
}

/// A `TreeStore` held entirely in process memory.
#[derive(Debug)]
pub struct MemoryTreeStore {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
}

impl Default for MemoryTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTreeStore {
    /// Create an empty store. The first allocated id is 1.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl TreeStore for MemoryTreeStore {
    fn allocate_id(&self) -> Result<NodeId> {
        Ok(NodeId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn get(&self, id: NodeId) -> Result<Node> {
        self.inner
            .read()
            .nodes
            .get(&id)
            .cloned()
            .ok_or(TreeError::NodeNotFound(id))
    }

    fn get_by_user(&self, user_id: &str) -> Result<Node> {
        let inner = self.inner.read();
        inner
            .by_user
            .get(user_id)
            .and_then(|id| inner.nodes.get(id))
            .cloned()
            .ok_or_else(|| TreeError::UserNotFound(user_id.to_string()))
    }

    fn get_by_sponsor_code(&self, code: &str) -> Result<Node> {
        let inner = self.inner.read();
        inner
            .by_code
            .get(code)
            .and_then(|id| inner.nodes.get(id))
            .cloned()
            .ok_or_else(|| TreeError::CodeNotFound(code.to_string()))
    }

    fn root(&self) -> Result<Option<Node>> {
        let inner = self.inner.read();
        Ok(inner.root.and_then(|id| inner.nodes.get(&id)).cloned())
    }

    fn insert(&self, node: Node) -> Result<Node> {
        let id = node.id.value();
        let stored = self.inner.write().insert(node)?;
        // Keep allocation ahead of explicitly chosen ids.
        self.next_id.fetch_max(id + 1, Ordering::Relaxed);
        Ok(stored)
    }

    fn set_child(&self, parent_id: NodeId, side: Side, child_id: NodeId) -> Result<()> {
        self.inner.write().set_child(parent_id, side, child_id)
    }

    fn attach(&self, node: Node) -> Result<Node> {
        let side = node.side.side();
        let id = node.id;
        let mut inner = self.inner.write();
        let stored = inner.insert(node)?;

        if let (Some(parent_id), Some(side)) = (stored.parent_id, side) {
            if let Err(e) = inner.set_child(parent_id, side, id) {
                tracing::debug!("Rolling back insert of {} under {}: {}", id, parent_id, e);
                inner.remove(id);
                return Err(e);
            }
        }
        drop(inner);

        self.next_id.fetch_max(id.value() + 1, Ordering::Relaxed);
        Ok(stored)
    }

    fn set_active(&self, id: NodeId, active: bool) -> Result<Node> {
        let mut inner = self.inner.write();
        let node = inner.nodes.get_mut(&id).ok_or(TreeError::NodeNotFound(id))?;
        node.active = active;
        Ok(node.clone())
    }

    fn scan(&self) -> Result<Vec<Node>> {
        Ok(self.inner.read().nodes.values().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.inner.read().nodes.len())
    }
}
