//! Swarm orchestration with the tokio mpsc command/notification pattern.
//!
//! The swarm event loop runs in a dedicated tokio task and owns the libp2p
//! `Swarm`. Callers talk to it through typed command and notification
//! channels. Every graph operation travels on one gossipsub topic.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, identity::Keypair, multiaddr::Protocol, relay, swarm::SwarmEvent,
    Multiaddr, PeerId,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use parley_shared::constants::{DEFAULT_NAMESPACE, DEFAULT_QUIC_PORT, PROTOCOL_VERSION};

use crate::behaviour::ParleyEvent;
use crate::discovery::load_bootstrap_peers;
use crate::ops::GraphOp;
use crate::peers::{PeerStats, PeerTracker};
use crate::transport::build_swarm;

/// Commands sent *into* the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    Dial(Multiaddr),
    /// Publish an encoded [`GraphOp`] on the graph topic.
    Publish { data: Vec<u8> },
    /// Counts of currently connected peers.
    GetPeers(oneshot::Sender<PeerStats>),
    Shutdown,
}

/// Notifications sent *from* the swarm task.
#[derive(Debug, Clone)]
pub enum SwarmNotification {
    PeerConnected { peer_id: PeerId, address: Multiaddr },
    PeerDisconnected { peer_id: PeerId },
    /// A peer joined the graph topic and can now receive our publishes.
    PeerSubscribed { peer_id: PeerId },
    /// A well-formed graph operation from another replica.
    OpReceived {
        source: Option<PeerId>,
        op: GraphOp,
    },
}

#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// File with one bootstrap multiaddr per line.
    pub bootstrap_peers_path: Option<PathBuf>,
    pub listen_port: u16,
    /// Dialled on startup in addition to the bootstrap file.
    pub extra_dials: Vec<Multiaddr>,
    /// Namespace and version of the graph topic. Replicas only see each
    /// other when both match.
    pub namespace: String,
    pub protocol_version: u32,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            bootstrap_peers_path: None,
            listen_port: DEFAULT_QUIC_PORT,
            extra_dials: Vec::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl SwarmConfig {
    pub fn topic(&self) -> String {
        format!("{}/graph/{}", self.namespace, self.protocol_version)
    }
}

/// Spawn the libp2p swarm in a background tokio task.
///
/// Returns `(command_tx, notification_rx, local_peer_id)`.
pub async fn spawn_swarm(
    keypair: Keypair,
    config: SwarmConfig,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    let listen_v4 = Multiaddr::empty()
        .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
        .with(Protocol::Udp(config.listen_port))
        .with(Protocol::QuicV1);
    let listen_v6 = Multiaddr::empty()
        .with(Protocol::Ip6(Ipv6Addr::UNSPECIFIED))
        .with(Protocol::Udp(config.listen_port))
        .with(Protocol::QuicV1);
    swarm.listen_on(listen_v4)?;
    swarm.listen_on(listen_v6)?;

    let topic = gossipsub::IdentTopic::new(config.topic());
    swarm.behaviour_mut().gossipsub.subscribe(&topic)?;

    info!(peer_id = %local_peer_id, port = config.listen_port, topic = %topic, "Swarm listening");

    let mut dials = config
        .bootstrap_peers_path
        .as_deref()
        .map(load_bootstrap_peers)
        .unwrap_or_default();
    dials.extend(config.extra_dials.iter().cloned());
    for addr in dials {
        match swarm.dial(addr.clone()) {
            Ok(()) => debug!(addr = %addr, "Dialing bootstrap peer"),
            Err(e) => warn!(addr = %addr, error = %e, "Failed to dial bootstrap peer"),
        }
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<SwarmNotification>(256);

    tokio::spawn(async move {
        let mut peer_tracker = PeerTracker::new();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SwarmCommand::Dial(addr)) => {
                            if let Err(e) = swarm.dial(addr.clone()) {
                                warn!(addr = %addr, error = %e, "Dial failed");
                            }
                        }
                        Some(SwarmCommand::Publish { data }) => {
                            let len = data.len();
                            match swarm.behaviour_mut().gossipsub.publish(topic.clone(), data) {
                                Ok(_) => {}
                                // Nobody to hear it yet; peers catch up with a sync request
                                Err(gossipsub::PublishError::InsufficientPeers) => {
                                    debug!(len, "No peers subscribed, op kept locally");
                                }
                                Err(gossipsub::PublishError::Duplicate) => {
                                    warn!(len, "Op dropped as a duplicate message");
                                }
                                Err(e) => warn!(len, error = %e, "Publish failed"),
                            }
                        }
                        Some(SwarmCommand::GetPeers(reply)) => {
                            let _ = reply.send(peer_tracker.stats());
                        }
                        Some(SwarmCommand::Shutdown) => {
                            info!("Swarm shutdown requested");
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down swarm");
                            break;
                        }
                    }
                }

                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(ParleyEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            match GraphOp::from_bytes(&message.data) {
                                Ok(op) => {
                                    debug!(source = ?message.source, op = op.label(), path = %op.path(), "Graph op received");
                                    let notification = SwarmNotification::OpReceived {
                                        source: message.source,
                                        op,
                                    };
                                    if notif_tx.send(notification).await.is_err() {
                                        info!("Notification receiver dropped, shutting down swarm");
                                        break;
                                    }
                                }
                                Err(e) => {
                                    debug!(source = ?message.source, error = %e, "Dropping malformed graph op");
                                }
                            }
                        }

                        SwarmEvent::Behaviour(ParleyEvent::Gossipsub(
                            gossipsub::Event::Subscribed { peer_id, topic: subscribed },
                        )) => {
                            if subscribed == topic.hash() {
                                debug!(peer = %peer_id, "Peer joined graph topic");
                                if notif_tx
                                    .send(SwarmNotification::PeerSubscribed { peer_id })
                                    .await
                                    .is_err()
                                {
                                    info!("Notification receiver dropped, shutting down swarm");
                                    break;
                                }
                            }
                        }

                        SwarmEvent::Behaviour(ParleyEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            debug!(peer = %peer_id, protocol = %info.protocol_version, "Identify: received info from peer");
                        }

                        SwarmEvent::Behaviour(ParleyEvent::RelayClient(
                            relay::client::Event::ReservationReqAccepted { relay_peer_id, .. },
                        )) => {
                            info!(relay = %relay_peer_id, "Relay reservation accepted");
                        }

                        SwarmEvent::Behaviour(ParleyEvent::Dcutr(event)) => {
                            debug!(event = ?event, "DCUtR event");
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                            let addr = endpoint.get_remote_address().clone();
                            let is_relayed = addr.iter().any(|p| matches!(p, Protocol::P2pCircuit));
                            let known = peer_tracker.is_connected(&peer_id);
                            peer_tracker.on_connected(peer_id, addr.clone(), is_relayed);

                            if !known {
                                info!(peer = %peer_id, addr = %addr, relayed = is_relayed, "Peer connected");
                                let _ = notif_tx
                                    .send(SwarmNotification::PeerConnected { peer_id, address: addr })
                                    .await;
                            }
                        }

                        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                            if num_established == 0 {
                                peer_tracker.on_disconnected(&peer_id);
                                info!(peer = %peer_id, "Peer disconnected");
                                let _ = notif_tx
                                    .send(SwarmNotification::PeerDisconnected { peer_id })
                                    .await;
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "Listening on new address");
                        }

                        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                            warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
                        }

                        SwarmEvent::IncomingConnectionError { error, .. } => {
                            warn!(error = %error, "Incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }

        info!("Swarm event loop terminated");
    });

    Ok((cmd_tx, notif_rx, local_peer_id))
}
