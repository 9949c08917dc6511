//! Breadth-first placement.
//!
//! # Slot selection
//!
//! A new member lands on the shallowest, left-most empty child position in
//! the sponsor's subtree. The slow path is a breadth-first search from the
//! sponsor's node. The fast path pops the next position from the sponsor's
//! available-slot queue and re-reads the parent from the tree store:
//!
//! - side still empty: the position is the answer
//! - side occupied: the occupant's two child positions are appended and
//!   the next entry is tried
//!
//! Nodes are never removed or moved, so a queue holding a complete,
//! rank-ordered frontier stays complete under both rules. A queue is only
//! ever created from a full search; everything else appends to an existing
//! queue or drops it.
//!
//! # Commit
//!
//! The chosen position is committed with [`TreeStore::attach`], which links
//! the node atomically or not at all. Losing the race for the side
//! (`SlotOccupied`) restarts the search, up to `max_retries` times.

use crate::config::EngineConfig;
use crate::deadline::Deadline;
use crate::error::{PlacementError, Result};
use crate::referral::referral_code_for;
use crate::stats::StatsCalculator;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use trellis_cache::{AvailableSlot, PositionCache, QueueScope};
use trellis_tree::{
    build_tree_view, check_integrity, DownlineStats, IntegrityReport, Node, NodeId, NodeSide,
    Side, TreeError, TreeStore, TreeViewNode,
};

/// A request to place a new member under a sponsor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRequest {
    /// Referral code of the sponsoring member
    pub sponsor_code: String,

    pub user_id: String,

    /// Defaults to the user id
    #[serde(default)]
    pub display_name: Option<String>,

    /// Code the new member hands out; derived from the user id when absent
    #[serde(default)]
    pub referral_code: Option<String>,

    /// Overrides the engine's default timeout
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl PlacementRequest {
    pub fn new(sponsor_code: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            sponsor_code: sponsor_code.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_referral_code(mut self, code: impl Into<String>) -> Self {
        self.referral_code = Some(code.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A request to create the root member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRequest {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
}

impl RootRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

/// Where the committed position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotSource {
    /// Popped from an available-slot queue and re-validated
    Cache,
    /// Found by a breadth-first search
    Search,
}

/// Result of a successful placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementOutcome {
    pub node: Node,
    pub source: SlotSource,
    /// Commit attempts, including the successful one
    pub attempts: u32,
}

impl PlacementOutcome {
    pub fn cache_used(&self) -> bool {
        self.source == SlotSource::Cache
    }

    pub fn receipt(&self) -> PlacementReceipt {
        PlacementReceipt::from(&self.node)
    }
}

/// Caller-facing summary of a placed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementReceipt {
    pub node_id: NodeId,
    pub parent_id: Option<NodeId>,
    pub side: NodeSide,
    pub level: u32,
    pub referral_code: String,
}

impl From<&Node> for PlacementReceipt {
    fn from(node: &Node) -> Self {
        Self {
            node_id: node.id,
            parent_id: node.parent_id,
            side: node.side,
            level: node.level,
            referral_code: node.referral_code.clone(),
        }
    }
}

// --- Internal search state ---

struct Candidate {
    parent: Node,
    side: Side,
    route: Route,
}

enum Route {
    Cache,
    /// Unexamined frontier behind the chosen position, `None` when it
    /// exceeded the seed limit
    Search(Option<Vec<AvailableSlot>>),
}

enum Probe {
    Open(Candidate),
    Expanded,
    Stale,
}

/// Places members into the binary tree.
pub struct PlacementEngine<S> {
    store: Arc<S>,
    cache: Arc<PositionCache>,
    stats: StatsCalculator<S>,
    config: EngineConfig,
}

impl<S: TreeStore> PlacementEngine<S> {
    pub fn new(store: Arc<S>, cache: Arc<PositionCache>, config: EngineConfig) -> Self {
        let stats = StatsCalculator::new(store.clone(), cache.clone());
        Self {
            store,
            cache,
            stats,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<PositionCache> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats_calculator(&self) -> &StatsCalculator<S> {
        &self.stats
    }

    // --- Root ---

    /// Create the root member with a derived referral code.
    pub fn seed_root(&self, user_id: &str) -> Result<Node> {
        self.seed_root_request(&RootRequest::new(user_id))
    }

    /// Create the root member. Fails with `RootExists` on a non-empty tree.
    pub fn seed_root_request(&self, req: &RootRequest) -> Result<Node> {
        if let Some(root) = self.store.root()? {
            return Err(PlacementError::RootExists(root.id));
        }

        let id = self.store.allocate_id()?;
        let code = req
            .referral_code
            .clone()
            .unwrap_or_else(|| referral_code_for(&req.user_id));
        let mut node = Node::root(id, &req.user_id, code);
        if let Some(name) = &req.display_name {
            node = node.with_display_name(name);
        }

        let generation = self.cache.generation();
        let root = self.store.insert(node)?;
        self.cache.seed_queue(
            &QueueScope::Global,
            &AvailableSlot::children_of(&root, QueueScope::Global.code()),
        );
        self.cache.store_node_since(&root, generation);

        info!(
            "Seeded root {} for user {} (code {})",
            root.id, root.user_id, root.referral_code
        );
        Ok(root)
    }

    // --- Placement ---

    /// Place `user_id` under the member owning `sponsor_code`.
    pub fn place(&self, sponsor_code: &str, user_id: &str) -> Result<Node> {
        self.place_request(&PlacementRequest::new(sponsor_code, user_id))
            .map(|outcome| outcome.node)
    }

    pub fn place_request(&self, req: &PlacementRequest) -> Result<PlacementOutcome> {
        let deadline = Deadline::from_timeout(req.timeout.or(self.config.default_timeout));

        match self.store.get_by_user(&req.user_id) {
            Ok(_) => return Err(PlacementError::UserAlreadyPlaced(req.user_id.clone())),
            Err(TreeError::UserNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let sponsor = self.store.get_by_sponsor_code(&req.sponsor_code)?;
        let scope = QueueScope::for_sponsor(&sponsor);
        let referral_code = req
            .referral_code
            .clone()
            .unwrap_or_else(|| referral_code_for(&req.user_id));
        let id = self.store.allocate_id()?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let candidate = self.find_slot(&sponsor, &scope, deadline)?;

            if let Err(e) = deadline.check() {
                self.release(&scope, &candidate);
                return Err(e);
            }

            let node = self.build_node(id, req, &candidate, &referral_code);
            let generation = self.cache.generation();
            match self.store.attach(node) {
                Ok(node) => {
                    let source = match candidate.route {
                        Route::Cache => SlotSource::Cache,
                        Route::Search(_) => SlotSource::Search,
                    };
                    self.after_commit(&scope, &node, candidate.route, generation);
                    info!(
                        "Placed {} as {} under {} at level {} (sponsor {}, {:?})",
                        node.user_id, node.id, candidate.parent.id, node.level, req.sponsor_code, source
                    );
                    return Ok(PlacementOutcome {
                        node,
                        source,
                        attempts,
                    });
                }
                Err(e) => {
                    self.release(&scope, &candidate);
                    if !e.is_slot_occupied() {
                        return Err(e.into());
                    }
                    warn!(
                        "Lost {} slot of {} to a concurrent placement (attempt {})",
                        candidate.side, candidate.parent.id, attempts
                    );
                    if attempts > self.config.max_retries {
                        return Err(PlacementError::PlacementConflict { attempts });
                    }
                }
            }
        }
    }

    fn build_node(
        &self,
        id: NodeId,
        req: &PlacementRequest,
        candidate: &Candidate,
        referral_code: &str,
    ) -> Node {
        let node = Node::child(
            id,
            &req.user_id,
            &candidate.parent,
            candidate.side,
            &req.sponsor_code,
            referral_code,
        );
        match &req.display_name {
            Some(name) => node.with_display_name(name),
            None => node,
        }
    }

    /// A popped queue entry that was not committed is gone from the queue,
    /// so the queue no longer covers the frontier.
    fn release(&self, scope: &QueueScope, candidate: &Candidate) {
        if matches!(candidate.route, Route::Cache) {
            self.cache.invalidate_queue(scope);
        }
    }

    fn find_slot(
        &self,
        sponsor: &Node,
        scope: &QueueScope,
        deadline: Deadline,
    ) -> Result<Candidate> {
        if let Some(candidate) = self.probe_cache(scope, deadline)? {
            return Ok(candidate);
        }
        self.search(sponsor.id, scope, deadline)
    }

    // --- Fast path ---

    fn probe_cache(&self, scope: &QueueScope, deadline: Deadline) -> Result<Option<Candidate>> {
        if !self.cache.is_enabled() {
            return Ok(None);
        }

        for _ in 0..self.config.cache_probe_limit {
            if deadline.is_expired() {
                return Ok(None);
            }
            let Some(slot) = self.cache.next_slot(scope) else {
                return Ok(None);
            };
            match self.revalidate(scope, slot) {
                Ok(Probe::Open(candidate)) => return Ok(Some(candidate)),
                Ok(Probe::Expanded) => continue,
                Ok(Probe::Stale) => {
                    self.cache.invalidate_queue(scope);
                    return Ok(None);
                }
                Err(e) => {
                    self.cache.invalidate_queue(scope);
                    return Err(e);
                }
            }
        }

        debug!("Probe limit reached on {:?} queue, falling back to search", scope);
        self.cache.invalidate_queue(scope);
        Ok(None)
    }

    fn revalidate(&self, scope: &QueueScope, slot: AvailableSlot) -> Result<Probe> {
        let children = match self.store.children(slot.parent_node_id) {
            Ok(children) => children,
            Err(TreeError::NodeNotFound(id)) => {
                warn!("Queued slot references missing node {}", id);
                return Ok(Probe::Stale);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(occupant) = children.get(slot.side) {
            debug!(
                "Queued {} slot of {} is taken by {}, expanding",
                slot.side, slot.parent_node_id, occupant.id
            );
            self.cache
                .push_slots(scope, &AvailableSlot::children_of(occupant, scope.code()));
            return Ok(Probe::Expanded);
        }

        let parent = self.store.get(slot.parent_node_id)?;
        if parent.level + 1 != slot.level {
            warn!(
                "Queued slot under {} claims level {}, parent is at {}",
                parent.id, slot.level, parent.level
            );
            return Ok(Probe::Stale);
        }

        Ok(Probe::Open(Candidate {
            parent,
            side: slot.side,
            route: Route::Cache,
        }))
    }

    // --- Slow path ---

    fn search(&self, sponsor_id: NodeId, scope: &QueueScope, deadline: Deadline) -> Result<Candidate> {
        // Re-read the sponsor: a retry must see the links the last attempt lost to.
        let sponsor = self.store.get(sponsor_id)?;
        let code = sponsor.referral_code.clone();

        let mut visited = HashSet::from([sponsor.id]);
        let mut queue = VecDeque::from([sponsor]);

        while let Some(node) = queue.pop_front() {
            deadline.check()?;

            if let Some(side) = node.first_open_side() {
                debug!("Search found {} slot of {} ({} queued)", side, node.id, queue.len());
                let frontier = self.frontier_after(&node, side, &queue, scope)?;
                return Ok(Candidate {
                    parent: node,
                    side,
                    route: Route::Search(frontier),
                });
            }

            for child_id in [node.left_child_id, node.right_child_id].into_iter().flatten() {
                if visited.insert(child_id) {
                    queue.push_back(self.store.get(child_id)?);
                } else {
                    warn!("Node {} revisited during search, skipping", child_id);
                }
            }
        }

        Err(PlacementError::NoAvailableSlot(code))
    }

    /// Positions the search had not yet examined, in breadth-first order.
    fn frontier_after(
        &self,
        parent: &Node,
        side: Side,
        pending: &VecDeque<Node>,
        scope: &QueueScope,
    ) -> Result<Option<Vec<AvailableSlot>>> {
        if !self.cache.is_enabled() || pending.len() * 2 + 2 > self.config.seed_limit {
            return Ok(None);
        }

        let code = scope.code();
        let mut frontier = Vec::with_capacity(pending.len() * 2 + 4);
        if side == Side::Left {
            frontier.push(AvailableSlot::under(parent, Side::Right, code));
        }
        for node in pending {
            frontier.extend(AvailableSlot::children_of(node, code));
        }
        // A filled left sibling queues behind every pending node.
        if let Some(left_id) = parent.left_child_id.filter(|_| side == Side::Right) {
            frontier.extend(AvailableSlot::children_of(&self.store.get(left_id)?, code));
        }
        Ok(Some(frontier))
    }

    // --- Post-commit ---

    /// `generation` is the cache generation read before the commit.
    fn after_commit(&self, scope: &QueueScope, node: &Node, route: Route, generation: u64) {
        match route {
            Route::Cache => self.cache.publish(scope, node),
            Route::Search(Some(mut frontier)) => {
                frontier.extend(AvailableSlot::children_of(node, scope.code()));
                self.cache.seed_queue(scope, &frontier);
            }
            Route::Search(None) => self.cache.invalidate_queue(scope),
        }

        // The new node can gain children as soon as it is committed.
        self.cache.store_node_since(node, generation);
        if let Some(parent_id) = node.parent_id {
            self.cache.invalidate_node(parent_id);
        }

        for ancestor in self.store.ancestors(node.id) {
            match ancestor {
                Ok(ancestor) => self.cache.invalidate_stats(&ancestor.user_id),
                Err(e) => {
                    warn!("Ancestor walk from {} stopped early: {}", node.id, e);
                    break;
                }
            }
        }
    }

    // --- Members ---

    /// Toggle a member's active flag without moving it.
    pub fn set_active(&self, user_id: &str, active: bool) -> Result<Node> {
        let node = self.store.get_by_user(user_id)?;
        let node = self.store.set_active(node.id, active)?;
        self.cache.invalidate_node(node.id);
        info!("Member {} active={}", user_id, active);
        Ok(node)
    }

    /// Node lookup through the snapshot cache.
    pub fn node(&self, id: NodeId) -> Result<Node> {
        if let Some(snapshot) = self.cache.node_snapshot(id) {
            return Ok(snapshot.node);
        }
        let generation = self.cache.generation();
        let node = self.store.get(id)?;
        self.cache.store_node_since(&node, generation);
        Ok(node)
    }

    pub fn member(&self, user_id: &str) -> Result<Node> {
        Ok(self.store.get_by_user(user_id)?)
    }

    // --- Reads ---

    pub fn stats(&self, user_id: &str) -> Result<DownlineStats> {
        self.stats.stats(user_id)
    }

    pub fn tree(&self, user_id: &str, max_depth: u32) -> Result<TreeViewNode> {
        Ok(build_tree_view(self.store.as_ref(), user_id, max_depth)?)
    }

    pub fn integrity(&self) -> Result<IntegrityReport> {
        Ok(check_integrity(self.store.as_ref())?)
    }
}
