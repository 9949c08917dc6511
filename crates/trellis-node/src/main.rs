//! Trellis Node binary
//!
//! Binary placement service over HTTP.

use trellis_node::{NodeConfig, TrellisNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trellis_node=info,trellis=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Trellis Node");

    let config = NodeConfig::from_env()?;

    // Blocking open: RocksDB is synchronous.
    let node = tokio::task::spawn_blocking(move || TrellisNode::new(config)).await??;
    node.run().await?;

    Ok(())
}
