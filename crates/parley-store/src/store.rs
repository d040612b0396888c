//! The `SyncStore` contract.
//!
//! A store is a replicated key/value graph with two kinds of paths:
//! last-write-wins slots written with [`SyncStore::put`], and append-only
//! logs whose children are created with [`SyncStore::append`]. Delivery is
//! best-effort and unordered; consumers must be idempotent and re-sort.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use parley_shared::types::NodeId;

use crate::error::{Result, StoreError};

/// Handle returned by `subscribe`, used to release the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// One delivery to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    pub subscription: SubscriptionId,
    pub path: String,
    /// `Some` for a child of an append log, `None` for the slot value.
    pub node: Option<NodeId>,
    pub value: Value,
}

/// Where a subscription delivers. Several subscriptions may share one sink,
/// which is how a session folds all its channels into one event stream.
pub type EventSink = mpsc::UnboundedSender<StoreEvent>;

/// Last-write-wins ordering for `put`. Compared field by field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub millis: i64,
    pub seq: u64,
    pub writer: String,
}

/// Replicated graph operations used by every Parley channel.
///
/// Implementations must be cheap to share behind `Arc<dyn SyncStore>`.
pub trait SyncStore: Send + Sync {
    /// Current value of a put slot, as known by the local replica.
    fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Overwrite the slot at `path`. Replicated asynchronously, no delivery
    /// guarantee.
    fn put(&self, path: &str, value: Value) -> Result<()>;

    /// Create a new uniquely keyed child under `path`. Never overwrites
    /// siblings.
    fn append(&self, path: &str, value: Value) -> Result<NodeId>;

    /// Deliver every existing value/child at `path` to `sink`, then every
    /// future write, until unsubscribed.
    fn subscribe(&self, path: &str, sink: EventSink) -> Result<SubscriptionId>;

    /// Stop deliveries. Safe to call repeatedly; events already queued in the
    /// sink may still arrive.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Reject paths that cannot be replicated.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.chars().any(char::is_control) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_ordering() {
        let a = Stamp { millis: 10, seq: 5, writer: "z".into() };
        let b = Stamp { millis: 11, seq: 0, writer: "a".into() };
        let c = Stamp { millis: 11, seq: 1, writer: "a".into() };
        let d = Stamp { millis: 11, seq: 1, writer: "b".into() };
        assert!(a < b && b < c && c < d);
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("parley_inbox_v1_a_x").is_ok());
        assert!(validate_path("room/123").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("a\nb").is_err());
    }
}
