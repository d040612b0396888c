//! Keyed subscription bookkeeping.
//!
//! Each component (message log, inbox, signal slot, call exchange) owns one
//! `SubscriptionManager`. Subscriptions are added and removed one key at a
//! time, so a growing conversation list never forces a resubscribe of
//! everything, and events for released subscriptions route to nothing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::store::{EventSink, StoreEvent, SubscriptionId, SyncStore};

pub struct SubscriptionManager {
    store: Arc<dyn SyncStore>,
    sink: EventSink,
    by_key: HashMap<String, SubscriptionId>,
    by_id: HashMap<SubscriptionId, String>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn SyncStore>, sink: EventSink) -> Self {
        Self {
            store,
            sink,
            by_key: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    /// Subscribe `path` under `key`. Returns `false` if `key` is already held.
    pub fn add(&mut self, key: &str, path: &str) -> Result<bool> {
        if self.by_key.contains_key(key) {
            return Ok(false);
        }
        let id = self.store.subscribe(path, self.sink.clone())?;
        self.by_key.insert(key.to_string(), id);
        self.by_id.insert(id, key.to_string());
        debug!(key = %key, path = %path, subscription = %id, "Channel subscribed");
        Ok(true)
    }

    /// Release `key`. Returns `false` if it was not held.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.by_key.remove(key) {
            Some(id) => {
                self.by_id.remove(&id);
                self.store.unsubscribe(id);
                debug!(key = %key, subscription = %id, "Channel unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Key of the subscription that produced `event`, if still held.
    pub fn route(&self, event: &StoreEvent) -> Option<&str> {
        self.by_id.get(&event.subscription).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Release everything.
    pub fn clear(&mut self) {
        for (_, id) in self.by_key.drain() {
            self.store.unsubscribe(id);
        }
        self.by_id.clear();
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn test_add_is_incremental_and_idempotent() {
        let store = MemoryStore::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut subs = SubscriptionManager::new(Arc::new(store.clone()), tx);

        assert!(subs.add("a", "path-a").unwrap());
        assert!(!subs.add("a", "path-a").unwrap());
        assert!(subs.add("b", "path-b").unwrap());
        assert_eq!(subs.len(), 2);
        assert_eq!(store.subscriber_count(), 2);
    }

    #[test]
    fn test_route_and_late_events() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subs = SubscriptionManager::new(Arc::new(store.clone()), tx);
        subs.add("room-1", "path-1").unwrap();

        store.append("path-1", json!(1)).unwrap();
        let ev = rx.try_recv().unwrap();
        assert_eq!(subs.route(&ev), Some("room-1"));

        // Queued before release, routed after: must be ignored
        store.append("path-1", json!(2)).unwrap();
        assert!(subs.remove("room-1"));
        assert!(!subs.remove("room-1"));
        let late = rx.try_recv().unwrap();
        assert_eq!(subs.route(&late), None);
    }

    #[test]
    fn test_drop_releases_store_subscriptions() {
        let store = MemoryStore::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        {
            let mut subs = SubscriptionManager::new(Arc::new(store.clone()), tx);
            subs.add("a", "pa").unwrap();
            subs.add("b", "pb").unwrap();
        }
        assert_eq!(store.subscriber_count(), 0);
    }
}
