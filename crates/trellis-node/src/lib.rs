//! Trellis Node - Binary Placement Service
//!
//! Serves the placement engine over HTTP, persisting the tree in RocksDB.
//!
//! # Architecture
//!
//! - **Storage**: RocksDB-backed [`TreeStore`](trellis_tree::TreeStore)
//! - **Engine**: breadth-first placement with an advisory position cache
//! - **API**: HTTP endpoints for placements, stats, tree views, and audits
//!
//! # Example
//!
//! ```no_run
//! use trellis_node::{NodeConfig, TrellisNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let node = TrellisNode::new(config)?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod node;
pub mod storage;

pub use api::{build_router, AppState};
pub use config::{CacheMode, NodeConfig};
pub use error::{Error, Result};
pub use node::TrellisNode;
pub use storage::RocksTreeStore;
