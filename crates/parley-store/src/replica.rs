//! A graph plus the subscribers interested in it.
//!
//! `LocalReplica` is the piece shared by every store implementation: it
//! merges writes into the [`Graph`] and fans changes out to subscriber sinks.
//! It does no I/O and is not thread-safe by itself; stores wrap it in a
//! mutex.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, trace};

use parley_shared::types::NodeId;

use crate::graph::{Graph, GraphEntry};
use crate::store::{EventSink, Stamp, StoreEvent, SubscriptionId};

struct Subscriber {
    path: String,
    sink: EventSink,
}

pub struct LocalReplica {
    writer: String,
    seq: u64,
    next_subscription: u64,
    graph: Graph,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

impl LocalReplica {
    /// `writer` identifies this replica in put stamps and must be unique
    /// among replicas that exchange operations.
    pub fn new(writer: impl Into<String>) -> Self {
        Self {
            writer: writer.into(),
            seq: 0,
            next_subscription: 1,
            graph: Graph::new(),
            subscribers: HashMap::new(),
        }
    }

    pub fn writer(&self) -> &str {
        &self.writer
    }

    /// Stamp for a local put issued at `now_ms`.
    pub fn next_stamp(&mut self, now_ms: i64) -> Stamp {
        self.seq += 1;
        Stamp {
            millis: now_ms,
            seq: self.seq,
            writer: self.writer.clone(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.graph.get(path).cloned()
    }

    /// Merge a slot write and notify subscribers if it won.
    pub fn apply_put(&mut self, path: &str, value: Value, stamp: Stamp) -> bool {
        if !self.graph.put(path, value.clone(), stamp) {
            trace!(path = %path, "Put lost to a newer stamp");
            return false;
        }
        self.deliver(path, None, value);
        true
    }

    /// Merge a log append and notify subscribers if the child was new.
    pub fn apply_append(&mut self, path: &str, node: NodeId, value: Value) -> bool {
        if !self.graph.append(path, node.clone(), value.clone()) {
            trace!(path = %path, node = %node, "Duplicate append ignored");
            return false;
        }
        self.deliver(path, Some(node), value);
        true
    }

    /// Merge a replayed entry received from another replica.
    pub fn apply_entry(&mut self, path: &str, entry: GraphEntry) -> bool {
        match entry {
            GraphEntry::Slot { value, stamp } => self.apply_put(path, value, stamp),
            GraphEntry::Child { node, value } => self.apply_append(path, node, value),
        }
    }

    /// Register `sink` for `path` and replay what is already known.
    pub fn subscribe(&mut self, path: &str, sink: EventSink) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;

        let mut replayed = 0usize;
        for entry in self.graph.entries(path) {
            let (node, value) = match entry {
                GraphEntry::Slot { value, .. } => (None, value),
                GraphEntry::Child { node, value } => (Some(node), value),
            };
            let event = StoreEvent {
                subscription: id,
                path: path.to_string(),
                node,
                value,
            };
            if sink.send(event).is_err() {
                break;
            }
            replayed += 1;
        }

        debug!(path = %path, subscription = %id, replayed, "Subscribed");

        self.subscribers.insert(
            id,
            Subscriber {
                path: path.to_string(),
                sink,
            },
        );
        id
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "Unsubscribed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Paths that currently have at least one local subscriber.
    pub fn watched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.subscribers.values().map(|s| s.path.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }

    fn deliver(&mut self, path: &str, node: Option<NodeId>, value: Value) {
        let mut closed = Vec::new();

        for (id, sub) in &self.subscribers {
            if sub.path != path {
                continue;
            }
            let event = StoreEvent {
                subscription: *id,
                path: path.to_string(),
                node: node.clone(),
                value: value.clone(),
            };
            if sub.sink.send(event).is_err() {
                closed.push(*id);
            }
        }

        // Receivers that went away without unsubscribing
        for id in closed {
            debug!(subscription = %id, "Dropping subscriber with closed sink");
            self.subscribers.remove(&id);
        }
    }
}
