//! In-process store.
//!
//! All clones of a [`MemoryStore`] share one replica, so two sessions
//! holding clones behave like two clients behind a relay that never drops
//! anything. Used by tests and for running both ends of a conversation in
//! one process.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use parley_shared::types::NodeId;

use crate::error::{Result, StoreError};
use crate::replica::LocalReplica;
use crate::store::{validate_path, EventSink, SubscriptionId, SyncStore};

#[derive(Clone)]
pub struct MemoryStore {
    replica: Arc<Mutex<LocalReplica>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let writer = format!("mem-{}", Uuid::new_v4().simple());
        Self {
            replica: Arc::new(Mutex::new(LocalReplica::new(writer))),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LocalReplica>> {
        self.replica.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Number of live subscriptions across all clones.
    pub fn subscriber_count(&self) -> usize {
        self.lock().map(|r| r.subscriber_count()).unwrap_or(0)
    }

    /// Write a child with a caller-chosen id, bypassing id generation.
    ///
    /// Lets tests reproduce redelivery and foreign or partial writes.
    pub fn inject_append(&self, path: &str, node: NodeId, value: Value) -> Result<bool> {
        validate_path(path)?;
        Ok(self.lock()?.apply_append(path, node, value))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStore for MemoryStore {
    fn get(&self, path: &str) -> Result<Option<Value>> {
        validate_path(path)?;
        Ok(self.lock()?.get(path))
    }

    fn put(&self, path: &str, value: Value) -> Result<()> {
        validate_path(path)?;
        let mut replica = self.lock()?;
        let stamp = replica.next_stamp(chrono::Utc::now().timestamp_millis());
        replica.apply_put(path, value, stamp);
        Ok(())
    }

    fn append(&self, path: &str, value: Value) -> Result<NodeId> {
        validate_path(path)?;
        let node = NodeId::generate();
        self.lock()?.apply_append(path, node.clone(), value);
        debug!(path = %path, node = %node, "Appended");
        Ok(node)
    }

    fn subscribe(&self, path: &str, sink: EventSink) -> Result<SubscriptionId> {
        validate_path(path)?;
        Ok(self.lock()?.subscribe(path, sink))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut replica) = self.lock() {
            replica.unsubscribe(id);
        }
    }
}
