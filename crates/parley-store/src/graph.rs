//! Local copy of the shared graph.
//!
//! Merging is order-independent: a slot keeps the write with the greatest
//! [`Stamp`], and a log child, once present, is never replaced. Applying the
//! same set of operations in any order yields the same graph.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_shared::types::NodeId;

use crate::store::Stamp;

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    value: Value,
    stamp: Stamp,
}

#[derive(Debug, Clone, Default)]
struct Node {
    slot: Option<Slot>,
    children: BTreeMap<NodeId, Value>,
}

/// Everything known about one path, in replayable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphEntry {
    Slot { value: Value, stamp: Stamp },
    Child { node: NodeId, value: Value },
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashMap<String, Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a slot write. Returns `true` if it replaced the current value.
    pub fn put(&mut self, path: &str, value: Value, stamp: Stamp) -> bool {
        let node = self.nodes.entry(path.to_string()).or_default();
        match &node.slot {
            Some(existing) if existing.stamp >= stamp => false,
            _ => {
                node.slot = Some(Slot { value, stamp });
                true
            }
        }
    }

    /// Apply a log append. Returns `true` if the child was new.
    pub fn append(&mut self, path: &str, node_id: NodeId, value: Value) -> bool {
        let node = self.nodes.entry(path.to_string()).or_default();
        if node.children.contains_key(&node_id) {
            return false;
        }
        node.children.insert(node_id, value);
        true
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.nodes
            .get(path)
            .and_then(|n| n.slot.as_ref())
            .map(|s| &s.value)
    }

    pub fn stamp(&self, path: &str) -> Option<&Stamp> {
        self.nodes
            .get(path)
            .and_then(|n| n.slot.as_ref())
            .map(|s| &s.stamp)
    }

    pub fn child(&self, path: &str, node_id: &NodeId) -> Option<&Value> {
        self.nodes.get(path).and_then(|n| n.children.get(node_id))
    }

    /// Slot first (if any), then children in node-id order.
    pub fn entries(&self, path: &str) -> Vec<GraphEntry> {
        let Some(node) = self.nodes.get(path) else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(node.children.len() + 1);
        if let Some(slot) = &node.slot {
            out.push(GraphEntry::Slot {
                value: slot.value.clone(),
                stamp: slot.stamp.clone(),
            });
        }
        out.extend(node.children.iter().map(|(id, v)| GraphEntry::Child {
            node: id.clone(),
            value: v.clone(),
        }));
        out
    }

    pub fn path_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn child_count(&self) -> usize {
        self.nodes.values().map(|n| n.children.len()).sum()
    }
}
