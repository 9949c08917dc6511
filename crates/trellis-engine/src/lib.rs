//! Trellis Placement Engine
//!
//! Places new members into the binary tree at the shallowest, left-most
//! open position under their sponsor, and answers downline statistics.
//!
//! # Correctness
//!
//! The tree store decides every placement. The position cache only
//! suggests candidates: each suggestion is re-read from the store before
//! use, and the commit itself is the store's atomic attach. Running with
//! the cache disabled produces the same tree, only slower.
//!
//! # Concurrency
//!
//! Placements may run on many threads at once. Two placements racing for
//! the same side are resolved by the store; the loser searches again. Under
//! contention the final tree is always structurally valid, though members
//! may not land in strict request order.

mod config;
mod deadline;
mod error;
mod placement;
mod referral;
mod stats;

pub use config::EngineConfig;
pub use deadline::Deadline;
pub use error::{PlacementError, Result};
pub use placement::{
    PlacementEngine, PlacementOutcome, PlacementReceipt, PlacementRequest, RootRequest, SlotSource,
};
pub use referral::{referral_code_for, REFERRAL_CODE_LEN};
pub use stats::StatsCalculator;
