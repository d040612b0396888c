//! Two-party message logs.
//!
//! Each pair shares one append-only log. Deliveries may repeat and arrive
//! in any order, so every room keeps the set of node ids it has seen and a
//! sequence sorted by `(timestamp, node_id)`. Whatever the delivery order,
//! two replicas holding the same records show the same sequence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use parley_shared::{ChatMessage, Identity, KeySpace, MessageRecord, NodeId, OutgoingMessage, Record};
use parley_store::{EventSink, StoreEvent, SubscriptionManager, SyncStore};

use crate::error::Result;

/// What changed in a room after one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUpdate {
    pub room: String,
    pub peer: Identity,
    pub inserted: Vec<ChatMessage>,
    /// Full sorted sequence after the insert
    pub messages: Vec<ChatMessage>,
}

struct Room {
    peer: Identity,
    seen: HashSet<NodeId>,
    messages: Vec<ChatMessage>,
}

impl Room {
    fn new(peer: Identity) -> Self {
        Self {
            peer,
            seen: HashSet::new(),
            messages: Vec::new(),
        }
    }

    /// Returns `false` for a node already in the room.
    fn insert(&mut self, msg: ChatMessage) -> bool {
        if !self.seen.insert(msg.node_id.clone()) {
            return false;
        }
        let pos = self
            .messages
            .partition_point(|m| m.sort_key() <= msg.sort_key());
        self.messages.insert(pos, msg);
        true
    }
}

pub struct MessageChannel {
    local: Identity,
    keys: KeySpace,
    subs: SubscriptionManager,
    rooms: HashMap<String, Room>,
}

impl MessageChannel {
    pub fn new(local: Identity, keys: KeySpace, store: Arc<dyn SyncStore>, sink: EventSink) -> Self {
        Self {
            local,
            keys,
            subs: SubscriptionManager::new(store, sink),
            rooms: HashMap::new(),
        }
    }

    pub fn room_key(&self, peer: &Identity) -> String {
        self.keys.message_room(&self.local, peer)
    }

    /// Append a message from the local identity to the room shared with `peer`.
    pub fn send(&self, peer: &Identity, message: OutgoingMessage, now: i64) -> Result<NodeId> {
        let room = self.room_key(peer);
        let record = message.into_record(self.local.clone(), now);
        let node = self.subs.store().append(&room, record.to_value()?)?;
        debug!(room = %room, node = %node, "Message sent");
        Ok(node)
    }

    /// Start receiving the room shared with `peer`. Returns `false` if it
    /// was already subscribed.
    pub fn subscribe(&mut self, peer: &Identity) -> Result<bool> {
        let room = self.room_key(peer);
        self.rooms
            .entry(room.clone())
            .or_insert_with(|| Room::new(peer.clone()));
        Ok(self.subs.add(&room, &room)?)
    }

    /// Stop receiving. Safe at any time and more than once; messages already
    /// received stay cached.
    pub fn unsubscribe(&mut self, peer: &Identity) -> bool {
        let room = self.room_key(peer);
        self.subs.remove(&room)
    }

    pub fn is_subscribed(&self, peer: &Identity) -> bool {
        self.subs.contains(&self.room_key(peer))
    }

    pub fn owns(&self, event: &StoreEvent) -> bool {
        self.subs.route(event).is_some()
    }

    /// Merge one delivery. `None` if the event is not ours, malformed, or a
    /// redelivery.
    pub fn on_event(&mut self, event: &StoreEvent) -> Option<MessageUpdate> {
        let room_key = self.subs.route(event)?.to_string();
        let Some(node) = event.node.clone() else {
            debug!(room = %room_key, "Ignoring slot write on a message log");
            return None;
        };

        let msg = match MessageRecord::from_value(&event.value)
            .and_then(|record| ChatMessage::from_record(node.clone(), record))
        {
            Ok(m) => m,
            Err(e) => {
                debug!(room = %room_key, node = %node, error = %e, "Dropping malformed message");
                return None;
            }
        };

        let room = self.rooms.get_mut(&room_key)?;
        if !room.insert(msg.clone()) {
            return None;
        }

        Some(MessageUpdate {
            room: room_key,
            peer: room.peer.clone(),
            inserted: vec![msg],
            messages: room.messages.clone(),
        })
    }

    pub fn messages(&self, peer: &Identity) -> &[ChatMessage] {
        self.rooms
            .get(&self.room_key(peer))
            .map(|r| r.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.subs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store::MemoryStore;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn channel(store: &MemoryStore, who: &str) -> (MessageChannel, mpsc::UnboundedReceiver<StoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MessageChannel::new(id(who), KeySpace::default(), Arc::new(store.clone()), tx),
            rx,
        )
    }

    fn drain(ch: &mut MessageChannel, rx: &mut mpsc::UnboundedReceiver<StoreEvent>) -> usize {
        let mut n = 0;
        while let Ok(ev) = rx.try_recv() {
            if ch.on_event(&ev).is_some() {
                n += 1;
            }
        }
        n
    }

    fn record(ts: i64, text: &str) -> serde_json::Value {
        json!({ "timestamp": ts, "sender": "bob@y", "text": text })
    }

    #[test]
    fn test_send_and_receive() {
        let store = MemoryStore::new();
        let (a, _) = channel(&store, "alice@x");
        let (mut b, mut rx) = channel(&store, "bob@y");
        b.subscribe(&id("alice@x")).unwrap();

        a.send(&id("bob@y"), OutgoingMessage::text("hello"), 1_000).unwrap();
        assert_eq!(drain(&mut b, &mut rx), 1);
        let msgs = b.messages(&id("alice@x"));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].body.text(), "hello");
        assert_eq!(msgs[0].sender, id("alice@x"));
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let store = MemoryStore::new();
        let (mut b, mut rx) = channel(&store, "bob@y");
        b.subscribe(&id("alice@x")).unwrap();
        let room = b.room_key(&id("alice@x"));
        store.inject_append(&room, NodeId::from("n1"), record(1, "x")).unwrap();
        let ev = rx.try_recv().unwrap();

        assert!(b.on_event(&ev).is_some());
        assert!(b.on_event(&ev).is_none());
        assert!(b.on_event(&ev).is_none());
        assert_eq!(b.messages(&id("alice@x")).len(), 1);
    }

    #[test]
    fn test_order_converges_under_any_permutation() {
        let recs = [("x", 5), ("y", 2), ("z", 5)];
        let perms: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        for perm in perms {
            let store = MemoryStore::new();
            let (mut b, mut rx) = channel(&store, "bob@y");
            b.subscribe(&id("alice@x")).unwrap();
            let room = b.room_key(&id("alice@x"));

            for i in perm {
                let (node, ts) = recs[i];
                store.inject_append(&room, NodeId::from(node), record(ts, node)).unwrap();
            }
            drain(&mut b, &mut rx);

            let order: Vec<_> = b
                .messages(&id("alice@x"))
                .iter()
                .map(|m| m.node_id.as_str().to_string())
                .collect();
            assert_eq!(order, vec!["y", "x", "z"], "permutation {perm:?}");
        }
    }

    #[test]
    fn test_malformed_and_partial_records_dropped() {
        let store = MemoryStore::new();
        let (mut b, mut rx) = channel(&store, "bob@y");
        b.subscribe(&id("alice@x")).unwrap();
        let room = b.room_key(&id("alice@x"));

        store.inject_append(&room, NodeId::from("a"), json!({"sender": "bob@y", "text": "no ts"})).unwrap();
        store.inject_append(&room, NodeId::from("b"), json!("garbage")).unwrap();
        store.inject_append(&room, NodeId::from("c"), json!({"timestamp": 1, "sender": ""})).unwrap();
        assert_eq!(drain(&mut b, &mut rx), 0);
        assert!(b.messages(&id("alice@x")).is_empty());
    }

    #[test]
    fn test_late_events_after_unsubscribe_ignored() {
        let store = MemoryStore::new();
        let (mut b, mut rx) = channel(&store, "bob@y");
        b.subscribe(&id("alice@x")).unwrap();
        let room = b.room_key(&id("alice@x"));
        store.inject_append(&room, NodeId::from("n"), record(1, "x")).unwrap();

        assert!(b.unsubscribe(&id("alice@x")));
        assert!(!b.unsubscribe(&id("alice@x")));
        assert_eq!(drain(&mut b, &mut rx), 0);
    }

    #[test]
    fn test_subscribe_replays_history() {
        let store = MemoryStore::new();
        let (a, _) = channel(&store, "alice@x");
        a.send(&id("bob@y"), OutgoingMessage::text("one"), 1).unwrap();
        a.send(&id("bob@y"), OutgoingMessage::system("two"), 2).unwrap();

        let (mut b, mut rx) = channel(&store, "bob@y");
        assert!(b.subscribe(&id("alice@x")).unwrap());
        assert!(!b.subscribe(&id("alice@x")).unwrap());
        assert_eq!(drain(&mut b, &mut rx), 2);
        let msgs = b.messages(&id("alice@x"));
        assert_eq!(msgs[0].body.text(), "one");
        assert!(msgs[1].body.is_system());
    }
}
