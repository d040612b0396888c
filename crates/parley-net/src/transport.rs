use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use libp2p::gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode};
use libp2p::identity::Keypair;
use libp2p::{dcutr, identify, noise, yamux, Swarm, SwarmBuilder};
use tracing::info;

use parley_shared::constants::{GOSSIPSUB_HEARTBEAT_SECS, MAX_OP_SIZE, PROTOCOL_VERSION};

use crate::behaviour::ParleyBehaviour;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Source peer plus publish sequence number.
///
/// Sync answers republish ops that were already sent, so two publishes of
/// the same bytes must still get distinct ids. Merging makes the repeats
/// harmless.
pub(crate) fn message_id(message: &gossipsub::Message) -> MessageId {
    match (message.source, message.sequence_number) {
        (Some(source), Some(seq)) => MessageId::from(format!("{source}/{seq}")),
        _ => {
            let mut hasher = DefaultHasher::new();
            message.data.hash(&mut hasher);
            message.sequence_number.hash(&mut hasher);
            MessageId::from(hasher.finish().to_string())
        }
    }
}

/// QUIC transport with a relay client, and the composed behaviour.
pub fn build_swarm(keypair: Keypair) -> anyhow::Result<Swarm<ParleyBehaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_relay_client(noise::Config::new, yamux::Config::default)?
        .with_behaviour(|key, relay_client| -> Result<ParleyBehaviour, BoxError> {
            let local_peer_id = key.public().to_peer_id();

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
                .validation_mode(ValidationMode::Strict)
                .max_transmit_size(MAX_OP_SIZE)
                .message_id_fn(message_id)
                .build()
                .map_err(|e| -> BoxError { format!("GossipSub config: {e}").into() })?;

            let gossipsub =
                gossipsub::Behaviour::new(MessageAuthenticity::Signed(key.clone()), gossipsub_config)
                    .map_err(|e| -> BoxError { format!("GossipSub init: {e}").into() })?;

            let identify = identify::Behaviour::new(
                identify::Config::new(format!("/parley/{PROTOCOL_VERSION}"), key.public())
                    .with_push_listen_addr_updates(true)
                    .with_interval(Duration::from_secs(60)),
            );

            Ok(ParleyBehaviour {
                gossipsub,
                identify,
                relay_client,
                dcutr: dcutr::Behaviour::new(local_peer_id),
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    info!(peer_id = %swarm.local_peer_id(), "Built Parley swarm with QUIC + Relay transport");

    Ok(swarm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::gossipsub::TopicHash;
    use libp2p::PeerId;

    fn message(source: Option<PeerId>, seq: Option<u64>, data: &[u8]) -> gossipsub::Message {
        gossipsub::Message {
            source,
            data: data.to_vec(),
            sequence_number: seq,
            topic: TopicHash::from_raw("parley/graph/1"),
        }
    }

    #[test]
    fn test_republished_op_gets_a_new_id() {
        let peer = PeerId::random();
        let op = br#"{"op":"sync_request","path":"room"}"#;

        let first = message_id(&message(Some(peer), Some(1), op));
        let again = message_id(&message(Some(peer), Some(2), op));
        assert_ne!(first, again);
        assert_eq!(first, message_id(&message(Some(peer), Some(1), op)));
    }

    #[test]
    fn test_other_source_same_sequence_differs() {
        let op = b"{}";
        assert_ne!(
            message_id(&message(Some(PeerId::random()), Some(7), op)),
            message_id(&message(Some(PeerId::random()), Some(7), op)),
        );
    }
}
