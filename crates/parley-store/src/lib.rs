//! # parley-store
//!
//! The replicated key/value graph every Parley channel is built on.
//!
//! The crate defines the [`SyncStore`] contract (put / append / subscribe /
//! unsubscribe), the order-independent [`Graph`] merge rules, the
//! [`LocalReplica`] that fans writes out to subscribers, an in-process
//! [`MemoryStore`], and the keyed [`SubscriptionManager`] that components use
//! to add and release subscriptions one channel at a time.

pub mod graph;
pub mod memory;
pub mod replica;
pub mod store;
pub mod subscriptions;

mod error;

pub use error::{Result, StoreError};
pub use graph::{Graph, GraphEntry};
pub use memory::MemoryStore;
pub use replica::LocalReplica;
pub use store::{EventSink, Stamp, StoreEvent, SubscriptionId, SyncStore};
pub use subscriptions::SubscriptionManager;
