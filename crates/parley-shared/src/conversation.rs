use serde::{Deserialize, Serialize};

use crate::constants::LABEL_NOW;
use crate::types::Identity;

/// Locally cached projection of one two-party conversation.
///
/// Created on discovery, explicit add, an accepted call or a message from an
/// unknown peer. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    /// Normalised identity of the peer
    pub id: String,
    pub identity: Identity,
    pub display_name: String,
    /// Opaque avatar reference resolved by the presentation layer
    pub avatar_ref: String,
    pub last_message_preview: String,
    pub last_activity_label: String,
}

impl ConversationSummary {
    pub fn new(identity: Identity, display_name: Option<String>, preview: &str) -> Self {
        let id = identity.normalized();
        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| identity.default_display_name());
        Self {
            avatar_ref: id.clone(),
            id,
            identity,
            display_name,
            last_message_preview: preview.to_string(),
            last_activity_label: LABEL_NOW.to_string(),
        }
    }

    pub fn touch(&mut self, preview: &str, label: &str) {
        self.last_message_preview = preview.to_string();
        self.last_activity_label = label.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_summary_defaults() {
        let s = ConversationSummary::new(Identity::parse("dr.who@clinic.org").unwrap(), None, "x");
        assert_eq!(s.id, "dr_who_clinic_org");
        assert_eq!(s.display_name, "dr.who");
        assert_eq!(s.avatar_ref, s.id);
        assert_eq!(s.last_activity_label, LABEL_NOW);
    }

    #[test]
    fn test_blank_display_name_falls_back() {
        let s = ConversationSummary::new(Identity::parse("a@x").unwrap(), Some("  ".into()), "x");
        assert_eq!(s.display_name, "a");
    }
}
