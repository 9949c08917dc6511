//! Node configuration.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use trellis_cache::CachePolicy;
use trellis_engine::EngineConfig;
use trellis_tree::DEFAULT_VIEW_DEPTH;

/// Which position cache backend the node runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// In-process cache with expiry
    Memory,
    /// No cache; every placement searches
    None,
}

impl FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheMode::Memory),
            "none" | "off" | "disabled" => Ok(CacheMode::None),
            other => Err(Error::Config(format!("unknown cache mode {:?}", other))),
        }
    }
}

/// Configuration for a Trellis node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Data directory for the RocksDB tree
    pub data_dir: PathBuf,

    /// HTTP API listen address
    pub api_addr: SocketAddr,

    pub cache: CacheMode,

    pub cache_policy: CachePolicy,

    pub engine: EngineConfig,

    /// Deepest tree view a client may request
    pub tree_depth_cap: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./trellis-data"),
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            cache: CacheMode::Memory,
            cache_policy: CachePolicy::default(),
            engine: EngineConfig::default(),
            tree_depth_cap: DEFAULT_VIEW_DEPTH,
        }
    }
}

impl NodeConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup("TRELLIS_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup("TRELLIS_API_ADDR") {
            config.api_addr = parse("TRELLIS_API_ADDR", &addr)?;
        }
        if let Some(mode) = lookup("TRELLIS_CACHE") {
            config.cache = mode.parse()?;
        }
        if let Some(retries) = lookup("TRELLIS_MAX_RETRIES") {
            config.engine.max_retries = parse("TRELLIS_MAX_RETRIES", &retries)?;
        }
        if let Some(ms) = lookup("TRELLIS_REQUEST_TIMEOUT_MS") {
            let ms: u64 = parse("TRELLIS_REQUEST_TIMEOUT_MS", &ms)?;
            config.engine.default_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(cap) = lookup("TRELLIS_TREE_DEPTH_CAP") {
            config.tree_depth_cap = parse("TRELLIS_TREE_DEPTH_CAP", &cap)?;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid {}={:?}: {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.cache, CacheMode::Memory);
        assert_eq!(config.api_addr.port(), 8080);
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.engine.default_timeout, None);
    }

    #[test]
    fn reads_overrides() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("TRELLIS_DATA_DIR", "/tmp/t"),
            ("TRELLIS_API_ADDR", "127.0.0.1:9999"),
            ("TRELLIS_CACHE", "none"),
            ("TRELLIS_MAX_RETRIES", "7"),
            ("TRELLIS_REQUEST_TIMEOUT_MS", "250"),
            ("TRELLIS_TREE_DEPTH_CAP", "4"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/t"));
        assert_eq!(config.api_addr.port(), 9999);
        assert_eq!(config.cache, CacheMode::None);
        assert_eq!(config.engine.max_retries, 7);
        assert_eq!(config.engine.default_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.tree_depth_cap, 4);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(NodeConfig::from_lookup(lookup(&[("TRELLIS_API_ADDR", "nowhere")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("TRELLIS_CACHE", "redis")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("TRELLIS_MAX_RETRIES", "-1")])).is_err());
    }
}
