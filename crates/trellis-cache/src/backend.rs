//! Key/value cache backends.
//!
//! A backend is a small networked-cache-shaped contract: string values and
//! string lists under string keys, each key with an optional expiry that is
//! refreshed on every write. Backends are allowed to fail; the fail-soft
//! policy lives one layer up in [`PositionCache`](crate::PositionCache).

use crate::clock::Clock;
use crate::error::{CacheError, Result};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Minimum spacing between write-path sweeps of expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Storage primitives the position cache is built on.
///
/// List operations are atomic per key: two concurrent `pop_front` calls
/// never return the same element.
pub trait CacheBackend: Send + Sync {
    /// Whether this backend can ever hold data.
    fn enabled(&self) -> bool {
        true
    }

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Remove and return the first list element. An emptied list is deleted.
    fn pop_front(&self, key: &str) -> Result<Option<String>>;

    /// Append to a list only if it already exists. Returns whether it did.
    fn push_back_existing(
        &self,
        key: &str,
        values: Vec<String>,
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Replace the whole list at `key`.
    fn replace_list(&self, key: &str, values: Vec<String>, ttl: Option<Duration>) -> Result<()>;

    /// Length of the list at `key` (0 when absent).
    fn list_len(&self, key: &str) -> Result<usize>;
}

/// Always-miss backend, used when no cache is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

impl CacheBackend for NoopBackend {
    fn enabled(&self) -> bool {
        false
    }

    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn pop_front(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn push_back_existing(
        &self,
        _key: &str,
        _values: Vec<String>,
        _ttl: Option<Duration>,
    ) -> Result<bool> {
        Ok(false)
    }

    fn replace_list(&self, _key: &str, _values: Vec<String>, _ttl: Option<Duration>) -> Result<()> {
        Ok(())
    }

    fn list_len(&self, _key: &str) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Debug)]
enum Value {
    Scalar(String),
    List(VecDeque<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    /// Unix millis after which the entry is gone
    expires_at: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process backend with per-key expiry.
///
/// Reads evict the expired entry they touch. Writes also sweep the whole map
/// once per [`SWEEP_INTERVAL`], so keys that are never read again do not
/// accumulate.
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    /// Unix millis of the last sweep
    last_sweep: AtomicU64,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            last_sweep: AtomicU64::new(now),
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        self.last_sweep.store(now, Ordering::Relaxed);
        Self::sweep(&mut entries, now)
    }

    /// Keys held in memory, expired or not.
    pub fn resident(&self) -> usize {
        self.entries.lock().len()
    }

    fn sweep(entries: &mut HashMap<String, Entry>, now: u64) -> usize {
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Lock the map for a write, sweeping it first if the interval has passed.
    fn lock_for_write(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= SWEEP_INTERVAL.as_millis() as u64 {
            self.last_sweep.store(now, Ordering::Relaxed);
            let removed = Self::sweep(&mut entries, now);
            if removed > 0 {
                debug!("Swept {} expired cache entries", removed);
            }
        }
        entries
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<u64> {
        ttl.map(|t| self.clock.now_millis().saturating_add(t.as_millis() as u64))
    }

    /// Run `f` on the live entry at `key`, evicting it first if expired.
    fn with_live<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> Result<T>,
    ) -> Result<T> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        f(&mut entries)
    }

    /// [`with_live`](Self::with_live) for writes: may sweep first.
    fn with_live_write<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> Result<T>,
    ) -> Result<T> {
        let now = self.clock.now_millis();
        let mut entries = self.lock_for_write();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        f(&mut entries)
    }
}

impl CacheBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_live(key, |entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Scalar(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        })
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = self.expiry(ttl);
        self.lock_for_write().insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value),
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn pop_front(&self, key: &str) -> Result<Option<String>> {
        self.with_live(key, |entries| {
            let Some(entry) = entries.get_mut(key) else {
                return Ok(None);
            };
            let Value::List(list) = &mut entry.value else {
                return Err(CacheError::WrongType(key.to_string()));
            };
            let item = list.pop_front();
            if list.is_empty() {
                entries.remove(key);
            }
            Ok(item)
        })
    }

    fn push_back_existing(
        &self,
        key: &str,
        values: Vec<String>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let expires_at = self.expiry(ttl);
        self.with_live_write(key, |entries| {
            let Some(entry) = entries.get_mut(key) else {
                return Ok(false);
            };
            let Value::List(list) = &mut entry.value else {
                return Err(CacheError::WrongType(key.to_string()));
            };
            list.extend(values);
            entry.expires_at = expires_at;
            Ok(true)
        })
    }

    fn replace_list(&self, key: &str, values: Vec<String>, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.lock_for_write();
        if values.is_empty() {
            entries.remove(key);
            return Ok(());
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::List(values.into()),
                expires_at: self.expiry(ttl),
            },
        );
        Ok(())
    }

    fn list_len(&self, key: &str) -> Result<usize> {
        self.with_live(key, |entries| match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn backend() -> (Arc<ManualClock>, MemoryBackend) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let backend = MemoryBackend::new(clock.clone());
        (clock, backend)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn scalar_expires_after_ttl() {
        let (clock, backend) = backend();
        backend
            .set("k", "v".into(), Some(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("v"));

        clock.advance(Duration::from_secs(59));
        assert!(backend.get("k").unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(backend.get("k").unwrap().is_none());
    }

    #[test]
    fn list_is_fifo_and_vanishes_when_drained() {
        let (_clock, backend) = backend();
        backend.replace_list("q", strings(&["a", "b"]), None).unwrap();

        assert!(backend.push_back_existing("q", strings(&["c"]), None).unwrap());
        assert_eq!(backend.list_len("q").unwrap(), 3);
        assert_eq!(backend.pop_front("q").unwrap().as_deref(), Some("a"));
        assert_eq!(backend.pop_front("q").unwrap().as_deref(), Some("b"));
        assert_eq!(backend.pop_front("q").unwrap().as_deref(), Some("c"));
        assert_eq!(backend.pop_front("q").unwrap(), None);

        // Gone: appends to a missing list are refused.
        assert!(!backend.push_back_existing("q", strings(&["d"]), None).unwrap());
        assert_eq!(backend.list_len("q").unwrap(), 0);
    }

    #[test]
    fn writes_refresh_list_expiry() {
        let (clock, backend) = backend();
        let ttl = Some(Duration::from_secs(100));
        backend.replace_list("q", strings(&["a"]), ttl).unwrap();

        clock.advance(Duration::from_secs(90));
        assert!(backend.push_back_existing("q", strings(&["b"]), ttl).unwrap());

        clock.advance(Duration::from_secs(90));
        assert_eq!(backend.list_len("q").unwrap(), 2);

        clock.advance(Duration::from_secs(10));
        assert_eq!(backend.pop_front("q").unwrap(), None);
    }

    #[test]
    fn wrong_type_is_an_error() {
        let (_clock, backend) = backend();
        backend.set("k", "v".into(), None).unwrap();
        assert!(matches!(backend.pop_front("k"), Err(CacheError::WrongType(_))));
        backend.replace_list("q", strings(&["a"]), None).unwrap();
        assert!(matches!(backend.get("q"), Err(CacheError::WrongType(_))));
    }

    #[test]
    fn purge_drops_expired_keys() {
        let (clock, backend) = backend();
        backend
            .set("short", "1".into(), Some(Duration::from_secs(1)))
            .unwrap();
        backend.set("forever", "2".into(), None).unwrap();
        clock.advance(Duration::from_secs(5));

        assert_eq!(backend.len(), 1);
        assert_eq!(backend.purge_expired(), 1);
        assert!(!backend.is_empty());
    }

    #[test]
    fn writes_sweep_keys_nobody_reads_again() {
        let (clock, backend) = backend();
        let ttl = Some(Duration::from_secs(60));
        for i in 0..100 {
            backend.set(&format!("node:{i}"), "v".into(), ttl).unwrap();
        }
        backend.replace_list("q", strings(&["a"]), ttl).unwrap();
        assert_eq!(backend.resident(), 101);

        // Everything has expired, but nothing reads those keys again.
        clock.advance(Duration::from_secs(48 * 60 * 60));
        backend.set("fresh", "v".into(), ttl).unwrap();
        assert_eq!(backend.resident(), 1);
        assert_eq!(backend.get("fresh").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn sweeps_are_spaced_by_the_interval() {
        let (clock, backend) = backend();
        backend
            .set("short", "1".into(), Some(Duration::from_secs(1)))
            .unwrap();
        clock.advance(Duration::from_secs(2));

        // Expired, but the last sweep was too recent.
        backend.set("other", "2".into(), None).unwrap();
        assert_eq!(backend.resident(), 2);

        clock.advance(SWEEP_INTERVAL);
        backend.set("third", "3".into(), None).unwrap();
        assert_eq!(backend.resident(), 2);
        assert!(backend.get("short").unwrap().is_none());
    }

    #[test]
    fn concurrent_pops_never_share_an_item() {
        let (_clock, backend) = backend();
        let backend = Arc::new(backend);
        let items: Vec<String> = (0..1_000).map(|i| i.to_string()).collect();
        backend.replace_list("q", items, None).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(item) = backend.pop_front("q").unwrap() {
                        got.push(item);
                    }
                    got
                })
            })
            .collect();

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 1_000);
    }

    #[test]
    fn noop_backend_always_misses() {
        let backend = NoopBackend;
        backend.set("k", "v".into(), None).unwrap();
        assert!(!backend.enabled());
        assert_eq!(backend.get("k").unwrap(), None);
        assert!(!backend.push_back_existing("q", strings(&["a"]), None).unwrap());
        assert_eq!(backend.pop_front("q").unwrap(), None);
    }
}
