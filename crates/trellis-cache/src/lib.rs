//! Trellis Position Cache
//!
//! A perishable fast path in front of the tree store. It remembers open
//! placement slots in FIFO queues, and keeps short-lived snapshots of nodes
//! and of per-member downline statistics.
//!
//! # Consistency
//!
//! The cache is a derived index, never a second source of truth. Slots read
//! from it must be re-validated against the tree before a placement commits,
//! and snapshots are advisory: a missing or stale entry costs latency, never
//! correctness.
//!
//! # Failure Model
//!
//! [`CacheBackend`] implementations may fail. [`PositionCache`] absorbs every
//! failure: lookups degrade to misses and writes degrade to logged no-ops.
//! Running without a cache is just [`NoopBackend`].
//!
//! # Freshness Windows
//!
//! | Entry            | Window                       |
//! |------------------|------------------------------|
//! | Sponsor queue    | 24h after last write         |
//! | Global queue     | 24h after last write         |
//! | Node snapshot    | 1h after write               |
//! | Stats snapshot   | 30min after write            |

mod backend;
mod clock;
mod error;
mod keys;
mod position;
mod slot;

pub use backend::{CacheBackend, MemoryBackend, NoopBackend, SWEEP_INTERVAL};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, Result};
pub use keys::{CacheKeys, DEFAULT_PREFIX};
pub use position::{CacheCounters, CachePolicy, PositionCache};
pub use slot::{AvailableSlot, NodeSnapshot, QueueScope, StatsSnapshot};
