//! Connected peer bookkeeping for the swarm task.

use std::collections::HashMap;

use libp2p::{Multiaddr, PeerId};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Direct,
    Relayed,
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer_id: PeerId,
    pub address: Multiaddr,
    pub mode: ConnectionMode,
    /// Unix epoch millis
    pub connected_at: i64,
}

/// Connection counts reported to the relay's stats log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeerStats {
    pub connected: usize,
    pub relayed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PeerTracker {
    peers: HashMap<PeerId, ConnectionInfo>,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection. A direct connection replaces a relayed one, never
    /// the other way round.
    pub fn on_connected(&mut self, peer_id: PeerId, address: Multiaddr, is_relayed: bool) {
        let mode = if is_relayed {
            ConnectionMode::Relayed
        } else {
            ConnectionMode::Direct
        };

        if let Some(existing) = self.peers.get_mut(&peer_id) {
            if existing.mode == ConnectionMode::Relayed && mode == ConnectionMode::Direct {
                debug!(peer = %peer_id, addr = %address, "Upgraded peer connection to direct");
                existing.mode = mode;
                existing.address = address;
            }
            return;
        }

        debug!(peer = %peer_id, addr = %address, mode = ?mode, "Tracking new peer connection");
        self.peers.insert(
            peer_id,
            ConnectionInfo {
                peer_id,
                address,
                mode,
                connected_at: chrono::Utc::now().timestamp_millis(),
            },
        );
    }

    /// Remove a peer whose last connection closed.
    pub fn on_disconnected(&mut self, peer_id: &PeerId) {
        if self.peers.remove(peer_id).is_some() {
            debug!(peer = %peer_id, "Removed peer from tracker");
        }
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn relayed_count(&self) -> usize {
        self.peers
            .values()
            .filter(|info| info.mode == ConnectionMode::Relayed)
            .count()
    }

    pub fn stats(&self) -> PeerStats {
        PeerStats {
            connected: self.peer_count(),
            relayed: self.relayed_count(),
        }
    }
}
