//! Engine configuration.

use std::time::Duration;

/// Tunables for [`PlacementEngine`](crate::PlacementEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Automatic retries after losing a slot race, before `PlacementConflict`
    pub max_retries: u32,

    /// Queue entries examined per placement before falling back to a search
    pub cache_probe_limit: usize,

    /// Largest frontier written back to a queue after a full search
    pub seed_limit: usize,

    /// Applied when a request carries no timeout of its own
    pub default_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            cache_probe_limit: 64,
            seed_limit: 4096,
            default_timeout: None,
        }
    }
}
