//! Trellis Node - the main application entry point.
//!
//! Architecture:
//! - Single daemon process with one RocksDB tree store
//! - Placement engine with an in-process position cache (or none)
//! - HTTP API for clients (placements, stats, tree views, audits)

use crate::api::{self, AppState};
use crate::config::{CacheMode, NodeConfig};
use crate::error::Result;
use crate::storage::RocksTreeStore;
use std::sync::Arc;
use trellis_cache::PositionCache;
use trellis_engine::PlacementEngine;
use trellis_tree::TreeStore;

/// A Trellis node instance.
pub struct TrellisNode {
    engine: Arc<PlacementEngine<RocksTreeStore>>,
    config: NodeConfig,
}

impl TrellisNode {
    /// Open storage and build the engine.
    pub fn new(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(RocksTreeStore::open(&config.data_dir)?);

        let cache = match config.cache {
            CacheMode::Memory => PositionCache::in_memory(config.cache_policy.clone()),
            CacheMode::None => PositionCache::disabled(),
        };

        let engine = PlacementEngine::new(store, Arc::new(cache), config.engine.clone());
        Ok(Self {
            engine: Arc::new(engine),
            config,
        })
    }

    /// Get the shared engine.
    pub fn engine(&self) -> Arc<PlacementEngine<RocksTreeStore>> {
        Arc::clone(&self.engine)
    }

    /// Run the HTTP server until it stops.
    pub async fn run(self) -> Result<()> {
        let store = self.engine.store();
        tracing::info!("Trellis node starting");
        tracing::info!("  API: http://{}", self.config.api_addr);
        tracing::info!("  Data: {:?}", self.config.data_dir);
        tracing::info!("  Cache: {:?}", self.config.cache);
        tracing::info!("  Members: {}", store.len()?);
        if store.root()?.is_none() {
            tracing::warn!("Tree is empty; POST /api/v1/root to seed it");
        }

        let app = api::build_router(AppState {
            engine: self.engine(),
            tree_depth_cap: self.config.tree_depth_cap,
        });

        let listener = tokio::net::TcpListener::bind(self.config.api_addr).await?;
        tracing::info!("HTTP server listening on {}", self.config.api_addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}
