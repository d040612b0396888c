//! Discovery inbox.
//!
//! Writing to someone appends an announce to their inbox; reading your own
//! inbox is how you learn that a new peer wants to talk.

use std::sync::Arc;

use tracing::debug;

use parley_shared::constants::DISCOVERED_PREVIEW;
use parley_shared::{AnnounceRecord, ConversationSummary, Identity, KeySpace, NodeId, Record};
use parley_store::{EventSink, StoreEvent, SubscriptionManager, SyncStore};

use crate::conversations::ConversationBook;
use crate::error::Result;

const INBOX_KEY: &str = "inbox";

pub struct InboxChannel {
    local: Identity,
    keys: KeySpace,
    subs: SubscriptionManager,
}

impl InboxChannel {
    pub fn new(local: Identity, keys: KeySpace, store: Arc<dyn SyncStore>, sink: EventSink) -> Self {
        Self {
            local,
            keys,
            subs: SubscriptionManager::new(store, sink),
        }
    }

    /// Tell `to` that the local identity wrote to them.
    pub fn announce(&self, to: &Identity, display_name: Option<String>, now: i64) -> Result<NodeId> {
        let record = AnnounceRecord {
            from: self.local.clone(),
            from_display_name: display_name,
            announced_at: now,
        };
        let node = self
            .subs
            .store()
            .append(&self.keys.inbox(to), record.to_value()?)?;
        debug!(to = %to, "Announced");
        Ok(node)
    }

    pub fn subscribe(&mut self) -> Result<bool> {
        let path = self.keys.inbox(&self.local);
        Ok(self.subs.add(INBOX_KEY, &path)?)
    }

    pub fn unsubscribe(&mut self) -> bool {
        self.subs.remove(INBOX_KEY)
    }

    pub fn owns(&self, event: &StoreEvent) -> bool {
        self.subs.route(event).is_some()
    }

    /// A new conversation if the event announces a peer `book` does not
    /// know yet.
    pub fn on_event(&self, event: &StoreEvent, book: &ConversationBook) -> Option<ConversationSummary> {
        self.subs.route(event)?;

        let record = match AnnounceRecord::from_value(&event.value) {
            Ok(r) => r,
            Err(e) => {
                debug!(path = %event.path, error = %e, "Dropping malformed announce");
                return None;
            }
        };
        if record.from == self.local || book.contains(&record.from) {
            return None;
        }

        debug!(from = %record.from, "Discovered peer");
        Some(ConversationSummary::new(
            record.from,
            record.from_display_name,
            DISCOVERED_PREVIEW,
        ))
    }
}
