//! `SyncStore` replicated over the gossipsub graph topic.
//!
//! A write is encoded and given a slot in the swarm's command queue before it
//! touches the local replica, so a write that cannot be published leaves no
//! trace. Once queued it is merged locally, so local subscribers see it at
//! once. Operations from other replicas are merged with the same rules (last
//! write wins for slots, node-id idempotence for logs). A new subscription
//! asks the network for the path's history with a `SyncRequest`, and so does
//! every peer that joins the topic; any replica holding entries for the path
//! answers by republishing them.

use std::sync::{Arc, Mutex, MutexGuard};

use libp2p::identity::Keypair;
use libp2p::PeerId;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use parley_shared::constants::MAX_OP_SIZE;
use parley_shared::types::NodeId;
use parley_store::store::validate_path;
use parley_store::{EventSink, LocalReplica, Result, StoreError, SubscriptionId, SyncStore};

use crate::ops::GraphOp;
use crate::peers::PeerStats;
use crate::swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplicaStats {
    pub paths: usize,
    pub children: usize,
    pub subscribers: usize,
}

#[derive(Clone)]
pub struct GossipStore {
    replica: Arc<Mutex<LocalReplica>>,
    cmd_tx: mpsc::Sender<SwarmCommand>,
    local_peer_id: PeerId,
}

impl GossipStore {
    /// Start the swarm and the task that merges incoming operations.
    pub async fn spawn(keypair: Keypair, config: SwarmConfig) -> anyhow::Result<Self> {
        let (cmd_tx, notif_rx, local_peer_id) = spawn_swarm(keypair, config).await?;
        let replica = Arc::new(Mutex::new(LocalReplica::new(local_peer_id.to_string())));

        tokio::spawn(run_replication(
            replica.clone(),
            cmd_tx.clone(),
            notif_rx,
        ));

        info!(peer_id = %local_peer_id, "Gossip store started");
        Ok(Self {
            replica,
            cmd_tx,
            local_peer_id,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub async fn peers(&self) -> anyhow::Result<PeerStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SwarmCommand::GetPeers(reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("Swarm command channel closed"))?;
        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("Swarm dropped the peers request"))
    }

    pub fn stats(&self) -> ReplicaStats {
        match self.lock() {
            Ok(replica) => ReplicaStats {
                paths: replica.graph().path_count(),
                children: replica.graph().child_count(),
                subscribers: replica.subscriber_count(),
            },
            Err(_) => ReplicaStats {
                paths: 0,
                children: 0,
                subscribers: 0,
            },
        }
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.cmd_tx
            .send(SwarmCommand::Shutdown)
            .await
            .map_err(|_| anyhow::anyhow!("Swarm command channel closed"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, LocalReplica>> {
        self.replica.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn publish(&self, op: &GraphOp) -> Result<()> {
        publish_bytes(&self.cmd_tx, encode(op)?)
    }
}

impl SyncStore for GossipStore {
    fn get(&self, path: &str) -> Result<Option<Value>> {
        validate_path(path)?;
        Ok(self.lock()?.get(path))
    }

    fn put(&self, path: &str, value: Value) -> Result<()> {
        validate_path(path)?;
        let mut replica = self.lock()?;
        let stamp = replica.next_stamp(chrono::Utc::now().timestamp_millis());
        let data = encode(&GraphOp::Put {
            path: path.to_string(),
            value: value.clone(),
            stamp: stamp.clone(),
        })?;
        let permit = reserve(&self.cmd_tx)?;

        replica.apply_put(path, value, stamp);
        permit.send(SwarmCommand::Publish { data });
        Ok(())
    }

    fn append(&self, path: &str, value: Value) -> Result<NodeId> {
        validate_path(path)?;
        let node = NodeId::generate();
        let data = encode(&GraphOp::Append {
            path: path.to_string(),
            node: node.clone(),
            value: value.clone(),
        })?;
        let permit = reserve(&self.cmd_tx)?;

        self.lock()?.apply_append(path, node.clone(), value);
        permit.send(SwarmCommand::Publish { data });
        Ok(node)
    }

    fn subscribe(&self, path: &str, sink: EventSink) -> Result<SubscriptionId> {
        validate_path(path)?;
        let id = self.lock()?.subscribe(path, sink);
        // History from other replicas arrives as ordinary ops
        if let Err(e) = self.publish(&GraphOp::SyncRequest {
            path: path.to_string(),
        }) {
            warn!(path = %path, error = %e, "Failed to request history");
        }
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut replica) = self.lock() {
            replica.unsubscribe(id);
        }
    }
}

fn encode(op: &GraphOp) -> Result<Vec<u8>> {
    let data = serde_json::to_vec(op)?;
    if data.len() > MAX_OP_SIZE {
        return Err(StoreError::TooLarge(data.len()));
    }
    Ok(data)
}

/// A slot in the swarm's command queue, without waiting.
fn reserve(cmd_tx: &mpsc::Sender<SwarmCommand>) -> Result<mpsc::Permit<'_, SwarmCommand>> {
    cmd_tx.try_reserve().map_err(|e| match e {
        mpsc::error::TrySendError::Full(()) => StoreError::Backpressure,
        mpsc::error::TrySendError::Closed(()) => StoreError::Closed,
    })
}

fn publish_bytes(cmd_tx: &mpsc::Sender<SwarmCommand>, data: Vec<u8>) -> Result<()> {
    reserve(cmd_tx)?.send(SwarmCommand::Publish { data });
    Ok(())
}

/// Merge one operation from another replica. Returns the operations to
/// publish in reply.
pub(crate) fn handle_remote(replica: &mut LocalReplica, op: GraphOp) -> Vec<GraphOp> {
    match op {
        GraphOp::Put { path, value, stamp } => {
            if validate_path(&path).is_ok() {
                replica.apply_put(&path, value, stamp);
            }
            Vec::new()
        }
        GraphOp::Append { path, node, value } => {
            if validate_path(&path).is_ok() {
                replica.apply_append(&path, node, value);
            }
            Vec::new()
        }
        GraphOp::SyncRequest { path } => replica
            .graph()
            .entries(&path)
            .into_iter()
            .map(|entry| GraphOp::from_entry(&path, entry))
            .collect(),
    }
}

/// Ops to publish in response to one notification, `None` once the
/// replica is unusable.
fn respond(replica: &Mutex<LocalReplica>, notification: SwarmNotification) -> Option<Vec<GraphOp>> {
    let mut guard = match replica.lock() {
        Ok(guard) => guard,
        Err(_) => {
            warn!("Replica lock poisoned, stopping replication");
            return None;
        }
    };

    let replies = match notification {
        SwarmNotification::OpReceived { source, op } => {
            let label = op.label();
            let replies = handle_remote(&mut guard, op);
            if !replies.is_empty() {
                debug!(source = ?source, op = label, count = replies.len(), "Answering sync request");
            }
            replies
        }
        // A peer on the topic may hold history for what we watch. Asking on
        // connect alone is too early: gossipsub drops the request until the
        // peer's subscription is known.
        SwarmNotification::PeerSubscribed { peer_id } => {
            let paths = guard.watched_paths();
            debug!(peer = %peer_id, paths = paths.len(), "Requesting history from new topic peer");
            paths
                .into_iter()
                .map(|path| GraphOp::SyncRequest { path })
                .collect()
        }
        SwarmNotification::PeerConnected { .. } | SwarmNotification::PeerDisconnected { .. } => {
            Vec::new()
        }
    };
    Some(replies)
}

async fn run_replication(
    replica: Arc<Mutex<LocalReplica>>,
    cmd_tx: mpsc::Sender<SwarmCommand>,
    mut notif_rx: mpsc::Receiver<SwarmNotification>,
) {
    while let Some(notification) = notif_rx.recv().await {
        let Some(replies) = respond(&replica, notification) else {
            break;
        };

        for op in replies {
            match op.to_bytes() {
                Ok(data) => {
                    if cmd_tx.send(SwarmCommand::Publish { data }).await.is_err() {
                        debug!("Swarm gone, stopping replication");
                        return;
                    }
                }
                Err(e) => warn!(path = %op.path(), error = %e, "Cannot republish entry"),
            }
        }
    }

    info!("Replication task terminated");
}
