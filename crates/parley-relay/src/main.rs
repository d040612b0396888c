//! # parley-relay
//!
//! Always-on replica for the Parley graph. It keeps every operation it sees
//! on the graph topic and answers sync requests, so clients that were
//! offline when a message or announce was written can still catch up.

mod config;

use libp2p::identity::Keypair;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_net::GossipStore;

use crate::config::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_relay=debug,parley_net=debug")),
        )
        .init();

    info!("Starting Parley relay v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::from_env();
    info!(?config, "Loaded configuration");

    let store = GossipStore::spawn(Keypair::generate_ed25519(), config.swarm_config()).await?;
    info!(peer_id = %store.local_peer_id(), port = config.listen_port, "Relay running");

    let stats_store = store.clone();
    let stats_interval = config.stats_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(stats_interval);
        loop {
            interval.tick().await;
            let stats = stats_store.stats();
            match stats_store.peers().await {
                Ok(peers) => info!(
                    peers = peers.connected,
                    relayed = peers.relayed,
                    paths = stats.paths,
                    children = stats.children,
                    "Replica stats"
                ),
                Err(e) => {
                    warn!(error = %e, "Swarm gone, stopping stats");
                    break;
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");
    if let Err(e) = store.shutdown().await {
        warn!(error = %e, "Swarm already stopped");
    }

    Ok(())
}
