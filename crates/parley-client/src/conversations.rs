//! The local list of conversations.
//!
//! Newly created conversations go to the front; updates keep their place.
//! Entries are keyed by normalised identity and never removed.

use std::collections::HashMap;

use parley_shared::{ConversationSummary, Identity};

#[derive(Debug, Clone, Default)]
pub struct ConversationBook {
    // Oldest first; `list` reverses
    entries: Vec<ConversationSummary>,
    index: HashMap<String, usize>,
}

impl ConversationBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list in display order (newest first). Later duplicates
    /// are dropped.
    pub fn from_summaries(summaries: Vec<ConversationSummary>) -> Self {
        let mut book = Self::new();
        for summary in summaries.into_iter().rev() {
            book.insert(summary);
        }
        book
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.index.contains_key(&identity.normalized())
    }

    pub fn get(&self, identity: &Identity) -> Option<&ConversationSummary> {
        self.index
            .get(&identity.normalized())
            .map(|&i| &self.entries[i])
    }

    /// Returns `false` if a conversation with the same id already exists.
    pub fn insert(&mut self, summary: ConversationSummary) -> bool {
        if self.index.contains_key(&summary.id) {
            return false;
        }
        self.index.insert(summary.id.clone(), self.entries.len());
        self.entries.push(summary);
        true
    }

    /// Get or create the conversation for `identity`. Returns `true` if it
    /// was created.
    pub fn ensure(&mut self, identity: &Identity, display_name: Option<String>, preview: &str) -> bool {
        if self.contains(identity) {
            return false;
        }
        self.insert(ConversationSummary::new(identity.clone(), display_name, preview))
    }

    /// Update preview and activity label. Returns `false` for unknown peers.
    pub fn touch(&mut self, identity: &Identity, preview: &str, label: &str) -> bool {
        match self.index.get(&identity.normalized()) {
            Some(&i) => {
                self.entries[i].touch(preview, label);
                true
            }
            None => false,
        }
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.entries.iter().map(|s| &s.identity)
    }

    /// Display order, newest conversation first.
    pub fn list(&self) -> Vec<ConversationSummary> {
        self.entries.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
