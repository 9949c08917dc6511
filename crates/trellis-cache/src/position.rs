//! The fail-soft position cache facade.
//!
//! Every operation here is infallible from the caller's point of view: a
//! backend error, an undecodable value, or a call that overruns its time
//! budget reads as a miss, and a failed write is logged and dropped. The tree
//! store stays the single source of truth.
//!
//! Snapshots computed from the tree race with placements that invalidate
//! them. Every invalidation bumps a generation counter; a reader captures
//! [`PositionCache::generation`] before reading the tree and writes back with
//! [`PositionCache::store_node_since`] or [`PositionCache::store_stats_since`],
//! which drop the value again if an invalidation happened in between.

use crate::backend::{CacheBackend, MemoryBackend, NoopBackend};
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, Result};
use crate::keys::CacheKeys;
use crate::slot::{AvailableSlot, NodeSnapshot, QueueScope, StatsSnapshot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use trellis_tree::{DownlineStats, Node, NodeId};

/// Freshness windows and key layout.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Per-sponsor queue lifetime after its last write
    pub sponsor_queue_ttl: Duration,
    /// Global queue lifetime after its last write
    pub global_queue_ttl: Duration,
    pub node_ttl: Duration,
    pub stats_ttl: Duration,
    /// Backend reads slower than this are discarded as misses.
    ///
    /// Advisory: elapsed time is checked after the call returns, so it does
    /// not interrupt a stuck backend. Queue pops are exempt, since the entry
    /// is already gone from the backend by then.
    pub call_budget: Option<Duration>,
    pub key_prefix: String,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            sponsor_queue_ttl: Duration::from_secs(24 * 60 * 60),
            global_queue_ttl: Duration::from_secs(24 * 60 * 60),
            node_ttl: Duration::from_secs(60 * 60),
            stats_ttl: Duration::from_secs(30 * 60),
            call_budget: None,
            key_prefix: crate::keys::DEFAULT_PREFIX.to_string(),
        }
    }
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    /// Backend errors and decode failures absorbed as misses or no-ops
    pub faults: u64,
    /// Calls discarded for exceeding the call budget
    pub timeouts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    faults: AtomicU64,
    timeouts: AtomicU64,
}

/// Queue, node-snapshot and stats-snapshot cache over a pluggable backend.
pub struct PositionCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
    keys: CacheKeys,
    counters: Counters,
    /// Bumped by every snapshot invalidation
    generation: AtomicU64,
}

impl PositionCache {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>, policy: CachePolicy) -> Self {
        let keys = CacheKeys::new(policy.key_prefix.clone());
        Self {
            backend,
            clock,
            policy,
            keys,
            counters: Counters::default(),
            generation: AtomicU64::new(0),
        }
    }

    /// In-process cache on the system clock.
    pub fn in_memory(policy: CachePolicy) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::in_memory_with_clock(policy, clock)
    }

    /// In-process cache on the given clock.
    pub fn in_memory_with_clock(policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        let backend = Arc::new(MemoryBackend::new(Arc::clone(&clock)));
        Self::new(backend, clock, policy)
    }

    /// A cache that never hits.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopBackend), Arc::new(SystemClock), CachePolicy::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.enabled()
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn counters(&self) -> CacheCounters {
        CacheCounters {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            faults: self.counters.faults.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Current invalidation generation. Capture it before reading the tree
    /// for a snapshot write-back.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    // --- Available-slot queues ---

    fn queue_key(&self, scope: &QueueScope) -> String {
        match scope {
            QueueScope::Global => self.keys.global_positions(),
            QueueScope::Sponsor(code) => self.keys.sponsor_positions(code),
        }
    }

    fn queue_ttl(&self, scope: &QueueScope) -> Duration {
        match scope {
            QueueScope::Global => self.policy.global_queue_ttl,
            QueueScope::Sponsor(_) => self.policy.sponsor_queue_ttl,
        }
    }

    /// Pop the next slot from a queue.
    pub fn next_slot(&self, scope: &QueueScope) -> Option<AvailableSlot> {
        let key = self.queue_key(scope);
        let raw = match self.run(&key, false, |b| b.pop_front(&key)) {
            Some(Some(raw)) => raw,
            _ => return self.miss(&key),
        };
        let slot = self.decode::<AvailableSlot>(&key, &raw)?;
        self.hit(&key);
        Some(slot)
    }

    /// Replace a queue with a freshly computed frontier.
    pub fn seed_queue(&self, scope: &QueueScope, slots: &[AvailableSlot]) {
        let key = self.queue_key(scope);
        let Some(values) = self.encode_all(&key, slots) else {
            return;
        };
        let ttl = Some(self.queue_ttl(scope));
        self.write(&key, |b| b.replace_list(&key, values, ttl));
    }

    /// Append slots to a queue that already exists.
    ///
    /// A missing queue is left missing: a partial frontier would offer deep
    /// slots ahead of shallower ones nobody recorded.
    pub fn push_slots(&self, scope: &QueueScope, slots: &[AvailableSlot]) {
        let key = self.queue_key(scope);
        let Some(values) = self.encode_all(&key, slots) else {
            return;
        };
        let ttl = Some(self.queue_ttl(scope));
        self.write(&key, |b| b.push_back_existing(&key, values, ttl).map(|_| ()));
    }

    /// Publish the two empty child slots of a freshly placed node.
    pub fn publish(&self, scope: &QueueScope, node: &Node) {
        self.push_slots(scope, &AvailableSlot::children_of(node, scope.code()));
    }

    /// Drop a queue entirely.
    pub fn invalidate_queue(&self, scope: &QueueScope) {
        let key = self.queue_key(scope);
        self.write(&key, |b| b.delete(&key));
    }

    /// Queue length, 0 on any failure.
    pub fn queue_len(&self, scope: &QueueScope) -> usize {
        let key = self.queue_key(scope);
        self.call(&key, |b| b.list_len(&key)).unwrap_or(0)
    }

    // --- Node snapshots ---

    /// A node snapshot younger than the node window.
    pub fn node_snapshot(&self, id: NodeId) -> Option<NodeSnapshot> {
        let key = self.keys.node(id);
        let snapshot = self
            .read(&key, |b| b.get(&key))
            .and_then(|raw| self.decode::<NodeSnapshot>(&key, &raw))?;
        if self.fresh(snapshot.cached_at, self.policy.node_ttl) {
            self.hit(&key);
            Some(snapshot)
        } else {
            self.miss(&key)
        }
    }

    /// Store a node snapshot unconditionally.
    pub fn store_node(&self, node: &Node) {
        let key = self.keys.node(node.id);
        let snapshot = NodeSnapshot {
            node: node.clone(),
            cached_at: self.clock.now_millis(),
        };
        self.put(&key, &snapshot, self.policy.node_ttl);
    }

    /// Store a node snapshot read from the tree at `generation`, unless an
    /// invalidation has happened since.
    pub fn store_node_since(&self, node: &Node, generation: u64) {
        self.store_node(node);
        let key = self.keys.node(node.id);
        self.retract_if_invalidated(&key, generation);
    }

    pub fn invalidate_node(&self, id: NodeId) {
        let key = self.keys.node(id);
        self.bump_generation();
        self.write(&key, |b| b.delete(&key));
    }

    // --- Stats snapshots ---

    /// A stats snapshot younger than the stats window.
    pub fn stats_snapshot(&self, user_id: &str) -> Option<StatsSnapshot> {
        let key = self.keys.stats(user_id);
        let snapshot = self
            .read(&key, |b| b.get(&key))
            .and_then(|raw| self.decode::<StatsSnapshot>(&key, &raw))?;
        if self.fresh(snapshot.cached_at, self.policy.stats_ttl) {
            self.hit(&key);
            Some(snapshot)
        } else {
            self.miss(&key)
        }
    }

    pub fn store_stats(&self, user_id: &str, stats: DownlineStats) {
        let key = self.keys.stats(user_id);
        let snapshot = StatsSnapshot {
            user_id: user_id.to_string(),
            stats,
            cached_at: self.clock.now_millis(),
        };
        self.put(&key, &snapshot, self.policy.stats_ttl);
    }

    /// Store stats computed from the tree at `generation`, unless an
    /// invalidation has happened since.
    pub fn store_stats_since(&self, user_id: &str, stats: DownlineStats, generation: u64) {
        self.store_stats(user_id, stats);
        let key = self.keys.stats(user_id);
        self.retract_if_invalidated(&key, generation);
    }

    pub fn invalidate_stats(&self, user_id: &str) {
        let key = self.keys.stats(user_id);
        self.bump_generation();
        self.write(&key, |b| b.delete(&key));
    }

    /// The write has landed; if an invalidation raced it, the invalidator may
    /// have deleted before we wrote, so delete again.
    fn retract_if_invalidated(&self, key: &str, generation: u64) {
        if self.generation() != generation {
            debug!("Snapshot at {} raced an invalidation, dropping it", key);
            self.write(key, |b| b.delete(key));
        }
    }

    // --- Fail-soft plumbing ---

    fn fresh(&self, cached_at: u64, ttl: Duration) -> bool {
        let age = self.clock.now_millis().saturating_sub(cached_at);
        age < ttl.as_millis() as u64
    }

    fn hit(&self, key: &str) {
        debug!("Cache hit: {}", key);
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss<T>(&self, key: &str) -> Option<T> {
        debug!("Cache miss: {}", key);
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Run a backend call under the call budget. Errors and overruns are `None`.
    fn call<T>(&self, key: &str, f: impl FnOnce(&dyn CacheBackend) -> Result<T>) -> Option<T> {
        self.run(key, true, f)
    }

    fn run<T>(
        &self,
        key: &str,
        budgeted: bool,
        f: impl FnOnce(&dyn CacheBackend) -> Result<T>,
    ) -> Option<T> {
        let started = Instant::now();
        let result = f(self.backend.as_ref());

        if let Some(budget) = self.policy.call_budget.filter(|_| budgeted) {
            if started.elapsed() > budget {
                warn!("Cache call for {} exceeded {:?}, treating as miss", key, budget);
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        result.map_err(|e| self.fault(key, e)).ok()
    }

    fn fault(&self, key: &str, e: CacheError) {
        warn!("Cache fault on {}: {}", key, e);
        self.counters.faults.fetch_add(1, Ordering::Relaxed);
    }

    fn read(&self, key: &str, f: impl FnOnce(&dyn CacheBackend) -> Result<Option<String>>) -> Option<String> {
        match self.call(key, f) {
            Some(Some(raw)) => Some(raw),
            _ => self.miss(key),
        }
    }

    fn write(&self, key: &str, f: impl FnOnce(&dyn CacheBackend) -> Result<()>) {
        let _ = self.call(key, f);
    }

    fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value).map_err(CacheError::from) {
            Ok(raw) => self.write(key, |b| b.set(key, raw, Some(ttl))),
            Err(e) => self.fault(key, e),
        }
    }

    fn encode_all(&self, key: &str, slots: &[AvailableSlot]) -> Option<Vec<String>> {
        slots
            .iter()
            .map(|slot| serde_json::to_string(slot).map_err(CacheError::from))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| self.fault(key, e))
            .ok()
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, raw: &str) -> Option<T> {
        match serde_json::from_str(raw).map_err(CacheError::from) {
            Ok(value) => Some(value),
            Err(e) => {
                self.fault(key, e);
                self.miss(key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::CacheError;
    use trellis_tree::Side;

    fn cache() -> (Arc<ManualClock>, PositionCache) {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let cache = PositionCache::in_memory_with_clock(CachePolicy::default(), clock.clone());
        (clock, cache)
    }

    fn root() -> Node {
        Node::root(NodeId(1), "root", "ROOT")
    }

    /// A backend that fails every call.
    struct Broken;

    impl CacheBackend for Broken {
        fn get(&self, _: &str) -> Result<Option<String>> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn set(&self, _: &str, _: String, _: Option<Duration>) -> Result<()> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn delete(&self, _: &str) -> Result<()> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn pop_front(&self, _: &str) -> Result<Option<String>> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn push_back_existing(&self, _: &str, _: Vec<String>, _: Option<Duration>) -> Result<bool> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn replace_list(&self, _: &str, _: Vec<String>, _: Option<Duration>) -> Result<()> {
            Err(CacheError::Unavailable("down".into()))
        }
        fn list_len(&self, _: &str) -> Result<usize> {
            Err(CacheError::Unavailable("down".into()))
        }
    }

    #[test]
    fn seeded_queue_pops_in_order_then_publish_appends() {
        let (_clock, cache) = cache();
        let root = root();
        let scope = QueueScope::Global;

        cache.seed_queue(&scope, &AvailableSlot::children_of(&root, ""));
        let child = Node::child(NodeId(2), "a", &root, Side::Left, "ROOT", "A");
        cache.publish(&scope, &child);
        assert_eq!(cache.queue_len(&scope), 4);

        let order: Vec<_> = std::iter::from_fn(|| cache.next_slot(&scope))
            .map(|s| (s.parent_node_id, s.side))
            .collect();
        assert_eq!(
            order,
            vec![
                (NodeId(1), Side::Left),
                (NodeId(1), Side::Right),
                (NodeId(2), Side::Left),
                (NodeId(2), Side::Right),
            ]
        );
    }

    #[test]
    fn publish_without_seed_is_dropped() {
        let (_clock, cache) = cache();
        let scope = QueueScope::Sponsor("A".into());
        cache.publish(&scope, &root());
        assert_eq!(cache.queue_len(&scope), 0);
        assert!(cache.next_slot(&scope).is_none());
    }

    #[test]
    fn sponsor_queue_expires_a_day_after_last_write() {
        let (clock, cache) = cache();
        let scope = QueueScope::Sponsor("A".into());
        cache.seed_queue(&scope, &AvailableSlot::children_of(&root(), "A"));

        clock.advance(Duration::from_secs(23 * 60 * 60));
        assert_eq!(cache.queue_len(&scope), 2);

        clock.advance(Duration::from_secs(60 * 60));
        assert!(cache.next_slot(&scope).is_none());
    }

    #[test]
    fn stats_snapshot_expires_at_thirty_minutes() {
        let (clock, cache) = cache();
        let stats = DownlineStats {
            total_downline: 3,
            ..Default::default()
        };
        cache.store_stats("alice", stats);

        clock.advance(Duration::from_secs(29 * 60 + 59));
        assert_eq!(cache.stats_snapshot("alice").unwrap().stats, stats);

        clock.advance(Duration::from_secs(1));
        assert!(cache.stats_snapshot("alice").is_none());
    }

    #[test]
    fn node_snapshot_lifecycle() {
        let (clock, cache) = cache();
        let node = root();
        cache.store_node(&node);
        assert_eq!(cache.node_snapshot(node.id).unwrap().node, node);

        cache.invalidate_node(node.id);
        assert!(cache.node_snapshot(node.id).is_none());

        cache.store_node(&node);
        clock.advance(Duration::from_secs(60 * 60));
        assert!(cache.node_snapshot(node.id).is_none());
    }

    #[test]
    fn invalidate_stats_forces_miss() {
        let (_clock, cache) = cache();
        cache.store_stats("bob", DownlineStats::default());
        cache.invalidate_stats("bob");
        assert!(cache.stats_snapshot("bob").is_none());
        assert!(cache.counters().misses >= 1);
    }

    #[test]
    fn broken_backend_degrades_to_misses() {
        let cache = PositionCache::new(Arc::new(Broken), Arc::new(SystemClock), CachePolicy::default());
        let scope = QueueScope::Global;

        cache.seed_queue(&scope, &AvailableSlot::children_of(&root(), ""));
        cache.publish(&scope, &root());
        cache.store_stats("alice", DownlineStats::default());
        cache.store_node(&root());
        cache.invalidate_queue(&scope);

        assert!(cache.next_slot(&scope).is_none());
        assert!(cache.stats_snapshot("alice").is_none());
        assert!(cache.node_snapshot(NodeId(1)).is_none());
        assert_eq!(cache.queue_len(&scope), 0);

        let counters = cache.counters();
        assert!(counters.faults >= 8);
        assert_eq!(counters.hits, 0);
    }

    #[test]
    fn garbage_values_read_as_misses() {
        let clock = Arc::new(ManualClock::new(0));
        let backend = Arc::new(MemoryBackend::new(clock.clone()));
        let cache = PositionCache::new(backend.clone(), clock, CachePolicy::default());

        backend
            .set(&cache.keys().stats("alice"), "{not json".into(), None)
            .unwrap();
        assert!(cache.stats_snapshot("alice").is_none());
        assert_eq!(cache.counters().faults, 1);
    }

    /// Wraps a backend and stalls every call.
    struct Slow(MemoryBackend);

    impl Slow {
        fn stall(&self) {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    impl CacheBackend for Slow {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.stall();
            self.0.get(key)
        }
        fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
            self.0.set(key, value, ttl)
        }
        fn delete(&self, key: &str) -> Result<()> {
            self.0.delete(key)
        }
        fn pop_front(&self, key: &str) -> Result<Option<String>> {
            self.stall();
            self.0.pop_front(key)
        }
        fn push_back_existing(&self, key: &str, values: Vec<String>, ttl: Option<Duration>) -> Result<bool> {
            self.0.push_back_existing(key, values, ttl)
        }
        fn replace_list(&self, key: &str, values: Vec<String>, ttl: Option<Duration>) -> Result<()> {
            self.0.replace_list(key, values, ttl)
        }
        fn list_len(&self, key: &str) -> Result<usize> {
            self.0.list_len(key)
        }
    }

    #[test]
    fn slow_reads_past_budget_are_misses_but_pops_are_kept() {
        let clock = Arc::new(ManualClock::new(0));
        let policy = CachePolicy {
            call_budget: Some(Duration::from_millis(5)),
            ..Default::default()
        };
        let backend = Arc::new(Slow(MemoryBackend::new(clock.clone())));
        let cache = PositionCache::new(backend, clock, policy);

        cache.store_stats("alice", DownlineStats::default());
        cache.seed_queue(&QueueScope::Global, &AvailableSlot::children_of(&root(), ""));

        assert!(cache.stats_snapshot("alice").is_none());
        assert_eq!(cache.counters().timeouts, 1);

        // A slow pop has already removed the entry, so it is still returned.
        let slot = cache.next_slot(&QueueScope::Global).unwrap();
        assert_eq!((slot.parent_node_id, slot.side), (NodeId(1), Side::Left));
        assert_eq!(cache.queue_len(&QueueScope::Global), 1);
        assert_eq!(cache.counters().timeouts, 1);
    }

    #[test]
    fn write_back_is_dropped_after_an_invalidation() {
        let (_clock, cache) = cache();
        let stale = DownlineStats {
            total_downline: 3,
            ..Default::default()
        };

        let generation = cache.generation();
        cache.store_stats_since("alice", stale, generation);
        assert_eq!(cache.stats_snapshot("alice").unwrap().stats, stale);

        // A placement invalidated while the value was being computed.
        let generation = cache.generation();
        cache.invalidate_stats("alice");
        cache.store_stats_since("alice", stale, generation);
        assert!(cache.stats_snapshot("alice").is_none());

        let node = root();
        let generation = cache.generation();
        cache.invalidate_node(node.id);
        cache.store_node_since(&node, generation);
        assert!(cache.node_snapshot(node.id).is_none());

        cache.store_node_since(&node, cache.generation());
        assert!(cache.node_snapshot(node.id).is_some());
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = PositionCache::disabled();
        assert!(!cache.is_enabled());
        cache.seed_queue(&QueueScope::Global, &AvailableSlot::children_of(&root(), ""));
        assert!(cache.next_slot(&QueueScope::Global).is_none());
    }
}
