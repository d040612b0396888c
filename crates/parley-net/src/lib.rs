// Replicated graph transport built on libp2p gossipsub over QUIC.

pub mod behaviour;
pub mod discovery;
pub mod ops;
pub mod peers;
pub mod store;
pub mod swarm;
pub mod transport;

pub use behaviour::{ParleyBehaviour, ParleyEvent};
pub use discovery::{load_bootstrap_peers, parse_multiaddrs};
pub use ops::GraphOp;
pub use peers::{ConnectionInfo, ConnectionMode, PeerStats, PeerTracker};
pub use store::{GossipStore, ReplicaStats};
pub use swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};
pub use transport::build_swarm;
