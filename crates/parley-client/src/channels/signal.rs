//! Call signal slot.
//!
//! A caller overwrites the callee's slot with a [`SignalEnvelope`]. The slot
//! keeps only the latest write, and old values are replayed on subscribe,
//! so the reader filters by age and suppresses repeats of a call it has
//! already surfaced.

use std::sync::Arc;

use tracing::debug;

use parley_shared::{CallId, Identity, KeySpace, Record, SignalEnvelope};
use parley_store::{EventSink, StoreEvent, SubscriptionManager, SyncStore};

use crate::error::Result;

const SIGNAL_KEY: &str = "signal";

pub struct SignalChannel {
    local: Identity,
    keys: KeySpace,
    subs: SubscriptionManager,
    freshness_window_ms: i64,
    last_surfaced: Option<CallId>,
}

impl SignalChannel {
    pub fn new(
        local: Identity,
        keys: KeySpace,
        store: Arc<dyn SyncStore>,
        sink: EventSink,
        freshness_window_ms: i64,
    ) -> Self {
        Self {
            local,
            keys,
            subs: SubscriptionManager::new(store, sink),
            freshness_window_ms,
            last_surfaced: None,
        }
    }

    /// Overwrite `to`'s signal slot.
    pub fn signal(&self, to: &Identity, envelope: &SignalEnvelope) -> Result<()> {
        self.subs
            .store()
            .put(&self.keys.signal(to), envelope.to_value()?)?;
        debug!(to = %to, call = %envelope.call_id, kind = %envelope.kind, "Signal sent");
        Ok(())
    }

    pub fn subscribe(&mut self) -> Result<bool> {
        let path = self.keys.signal(&self.local);
        Ok(self.subs.add(SIGNAL_KEY, &path)?)
    }

    pub fn unsubscribe(&mut self) -> bool {
        self.subs.remove(SIGNAL_KEY)
    }

    pub fn owns(&self, event: &StoreEvent) -> bool {
        self.subs.route(event).is_some()
    }

    /// A fresh incoming call, or `None`.
    pub fn on_event(&mut self, event: &StoreEvent, now: i64) -> Option<SignalEnvelope> {
        self.subs.route(event)?;

        let envelope = match SignalEnvelope::from_value(&event.value) {
            Ok(e) => e,
            Err(e) => {
                debug!(path = %event.path, error = %e, "Dropping malformed signal");
                return None;
            }
        };

        if envelope.from == self.local {
            return None;
        }
        if !envelope.is_fresh(now, self.freshness_window_ms) {
            debug!(
                from = %envelope.from,
                age_ms = ?envelope.age_ms(now),
                "Dropping stale signal"
            );
            return None;
        }
        if self.last_surfaced == Some(envelope.call_id) {
            return None;
        }

        self.last_surfaced = Some(envelope.call_id);
        Some(envelope)
    }
}
