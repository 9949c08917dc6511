//! The store contract every tree backend implements.
//!
//! A store exclusively owns node identity and parent/child linkage. The only
//! write that can race is [`TreeStore::set_child`]: it must behave as an
//! atomic compare-and-set on `(parent, side)` so two concurrent placers
//! targeting the same slot yield exactly one winner.

use crate::error::Result;
use crate::node::{Children, Node, NodeId, Side};
use std::collections::{HashSet, VecDeque};

/// Read/write primitives over the authoritative tree.
pub trait TreeStore: Send + Sync {
    /// Reserve a fresh node id. Ids are never reused.
    fn allocate_id(&self) -> Result<NodeId>;

    /// Look up a node by id.
    fn get(&self, id: NodeId) -> Result<Node>;

    /// Look up the node owned by a user.
    fn get_by_user(&self, user_id: &str) -> Result<Node>;

    /// Look up the node that owns a referral code.
    fn get_by_sponsor_code(&self, code: &str) -> Result<Node>;

    /// The root node, if the tree has been seeded.
    fn root(&self) -> Result<Option<Node>>;

    /// Store a detached node without linking it into its parent.
    ///
    /// Fails with `DuplicateId`, `DuplicateUser`, `DuplicateReferralCode`,
    /// `InvalidParent` (missing parent) or `RootExists`.
    fn insert(&self, node: Node) -> Result<Node>;

    /// Point `parent`'s `side` at `child`.
    ///
    /// Fails with `SlotOccupied` if that side is already filled.
    fn set_child(&self, parent_id: NodeId, side: Side, child_id: NodeId) -> Result<()>;

    /// Insert `node` and link it into its parent as one transaction.
    ///
    /// If the link fails the insert is rolled back, so a failed attach never
    /// leaves an orphan behind.
    fn attach(&self, node: Node) -> Result<Node>;

    /// Toggle a node's `active` flag without moving it.
    fn set_active(&self, id: NodeId, active: bool) -> Result<Node>;

    /// Every node in the store, in no particular order.
    fn scan(&self) -> Result<Vec<Node>>;

    /// Number of nodes.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Immediate children of a node.
    fn children(&self, id: NodeId) -> Result<Children> {
        let node = self.get(id)?;
        let left = node.left_child_id.map(|c| self.get(c)).transpose()?;
        let right = node.right_child_id.map(|c| self.get(c)).transpose()?;
        Ok(Children { left, right })
    }

    /// Ancestors of a node, nearest first. Restartable: each call walks anew.
    fn ancestors(&self, id: NodeId) -> Ancestors<'_, Self>
    where
        Self: Sized,
    {
        Ancestors::new(self, id)
    }

    /// Lazy breadth-first walk of a node's downline, excluding the node itself.
    fn descendants(&self, id: NodeId) -> Descendants<'_, Self>
    where
        Self: Sized,
    {
        Descendants::new(self, id)
    }
}

/// Iterator over a node's ancestor chain.
///
/// Stops after an error or if a node id repeats (a stray cycle).
pub struct Ancestors<'a, S: ?Sized> {
    store: &'a S,
    start: Option<NodeId>,
    next: Option<NodeId>,
    seen: HashSet<NodeId>,
}

impl<'a, S: TreeStore + ?Sized> Ancestors<'a, S> {
    fn new(store: &'a S, id: NodeId) -> Self {
        let mut seen = HashSet::new();
        seen.insert(id);
        Self {
            store,
            start: Some(id),
            next: None,
            seen,
        }
    }
}

impl<S: TreeStore + ?Sized> Iterator for Ancestors<'_, S> {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(start) = self.start.take() {
            match self.store.get(start) {
                Ok(node) => self.next = node.parent_id,
                Err(e) => return Some(Err(e)),
            }
        }

        let id = self.next.take()?;
        if !self.seen.insert(id) {
            return None;
        }
        match self.store.get(id) {
            Ok(node) => {
                self.next = node.parent_id;
                Some(Ok(node))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Breadth-first iterator over a node's downline.
///
/// Children are visited left before right, shallower before deeper.
pub struct Descendants<'a, S: ?Sized> {
    store: &'a S,
    start: Option<NodeId>,
    queue: VecDeque<NodeId>,
    seen: HashSet<NodeId>,
}

impl<'a, S: TreeStore + ?Sized> Descendants<'a, S> {
    fn new(store: &'a S, id: NodeId) -> Self {
        let mut seen = HashSet::new();
        seen.insert(id);
        Self {
            store,
            start: Some(id),
            queue: VecDeque::new(),
            seen,
        }
    }

    fn enqueue_children(&mut self, node: &Node) {
        for child in [node.left_child_id, node.right_child_id].into_iter().flatten() {
            if self.seen.insert(child) {
                self.queue.push_back(child);
            }
        }
    }
}

impl<S: TreeStore + ?Sized> Iterator for Descendants<'_, S> {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(start) = self.start.take() {
            match self.store.get(start) {
                Ok(node) => self.enqueue_children(&node),
                Err(e) => {
                    self.queue.clear();
                    return Some(Err(e));
                }
            }
        }

        let id = self.queue.pop_front()?;
        match self.store.get(id) {
            Ok(node) => {
                self.enqueue_children(&node);
                Some(Ok(node))
            }
            Err(e) => {
                self.queue.clear();
                Some(Err(e))
            }
        }
    }
}
