//! Cache key namespace.

use trellis_tree::NodeId;

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "trellis";

/// Builds the per-entity key templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    prefix: String,
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}:positions:global`
    pub fn global_positions(&self) -> String {
        format!("{}:positions:global", self.prefix)
    }

    /// `{prefix}:positions:sponsor:{code}`
    pub fn sponsor_positions(&self, code: &str) -> String {
        format!("{}:positions:sponsor:{}", self.prefix, code)
    }

    /// `{prefix}:node:{id}`
    pub fn node(&self, id: NodeId) -> String {
        format!("{}:node:{}", self.prefix, id.value())
    }

    /// `{prefix}:stats:{user_id}`
    pub fn stats(&self, user_id: &str) -> String {
        format!("{}:stats:{}", self.prefix, user_id)
    }
}
