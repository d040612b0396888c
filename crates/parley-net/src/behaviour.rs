//! Composed libp2p `NetworkBehaviour` for Parley replicas.
//!
//! Combines GossipSub (graph operation fan-out), Identify (protocol
//! negotiation), Relay client (NAT traversal via relays) and DCUtR (direct
//! connection upgrade through relay).

use libp2p::{dcutr, gossipsub, identify, relay, swarm::NetworkBehaviour};

/// All sub-behaviours are driven by the single swarm event loop.
/// Construction is handled by [`super::transport::build_swarm`].
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "ParleyEvent")]
pub struct ParleyBehaviour {
    /// Carries every graph operation
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    /// Circuit relay v2 client for NAT traversal
    pub relay_client: relay::client::Behaviour,
    pub dcutr: dcutr::Behaviour,
}

#[derive(Debug)]
pub enum ParleyEvent {
    Gossipsub(gossipsub::Event),
    Identify(identify::Event),
    RelayClient(relay::client::Event),
    Dcutr(dcutr::Event),
}

impl From<gossipsub::Event> for ParleyEvent {
    fn from(event: gossipsub::Event) -> Self {
        ParleyEvent::Gossipsub(event)
    }
}

impl From<identify::Event> for ParleyEvent {
    fn from(event: identify::Event) -> Self {
        ParleyEvent::Identify(event)
    }
}

impl From<relay::client::Event> for ParleyEvent {
    fn from(event: relay::client::Event) -> Self {
        ParleyEvent::RelayClient(event)
    }
}

impl From<dcutr::Event> for ParleyEvent {
    fn from(event: dcutr::Event) -> Self {
        ParleyEvent::Dcutr(event)
    }
}
