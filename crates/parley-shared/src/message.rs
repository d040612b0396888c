//! Typed message model built from [`MessageRecord`]s.

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::protocol::{AttachmentRecord, MessageRecord};
use crate::types::{Identity, NodeId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub payload: String,
}

impl From<AttachmentRecord> for Attachment {
    fn from(r: AttachmentRecord) -> Self {
        Self {
            name: r.name,
            mime_type: r.mime_type,
            payload: r.payload,
        }
    }
}

impl From<Attachment> for AttachmentRecord {
    fn from(a: Attachment) -> Self {
        Self {
            name: a.name,
            mime_type: a.mime_type,
            payload: a.payload,
        }
    }
}

/// What a message carries. Each variant only has the fields it needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    SystemNotice { text: String },
    Attachment { caption: String, attachment: Attachment },
}

impl MessageBody {
    pub fn text(&self) -> &str {
        match self {
            MessageBody::Text { text } | MessageBody::SystemNotice { text } => text,
            MessageBody::Attachment { caption, .. } => caption,
        }
    }

    /// One-line summary for conversation lists.
    pub fn preview(&self) -> String {
        match self {
            MessageBody::Attachment { caption, attachment } if caption.is_empty() => {
                format!("Attachment: {}", attachment.name)
            }
            other => other.text().to_string(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, MessageBody::SystemNotice { .. })
    }
}

/// A message accepted into a log: it has a store-assigned id and a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub node_id: NodeId,
    pub timestamp: i64,
    pub sender: Identity,
    pub body: MessageBody,
}

impl ChatMessage {
    /// Build from a decoded record. Records without a timestamp are partial
    /// writes and are rejected.
    pub fn from_record(node_id: NodeId, record: MessageRecord) -> Result<Self, RecordError> {
        let timestamp = record.timestamp.ok_or(RecordError::MissingField("timestamp"))?;

        let body = match (record.attachment, record.is_system) {
            (Some(att), _) => MessageBody::Attachment {
                caption: record.text,
                attachment: att.into(),
            },
            (None, true) => MessageBody::SystemNotice { text: record.text },
            (None, false) => MessageBody::Text { text: record.text },
        };

        Ok(Self {
            node_id,
            timestamp,
            sender: record.sender,
            body,
        })
    }

    /// Total order within a log.
    pub fn sort_key(&self) -> (i64, &NodeId) {
        (self.timestamp, &self.node_id)
    }

    pub fn side(&self, viewer: &Identity) -> Side {
        if &self.sender == viewer {
            Side::Me
        } else {
            Side::Them
        }
    }

    pub fn view(&self, viewer: &Identity) -> MessageView {
        let attachment = match &self.body {
            MessageBody::Attachment { attachment, .. } => Some(attachment.clone()),
            _ => None,
        };
        MessageView {
            node_id: self.node_id.clone(),
            text: self.body.text().to_string(),
            side: self.side(viewer),
            timestamp: self.timestamp,
            time_label: time_label(self.timestamp),
            is_system: self.body.is_system(),
            attachment,
        }
    }
}

/// A message the local user wants to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: MessageBody,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            body: MessageBody::Text { text: text.into() },
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            body: MessageBody::SystemNotice { text: text.into() },
        }
    }

    pub fn attachment(caption: impl Into<String>, attachment: Attachment) -> Self {
        Self {
            body: MessageBody::Attachment {
                caption: caption.into(),
                attachment,
            },
        }
    }

    pub fn into_record(self, sender: Identity, now: i64) -> MessageRecord {
        let (text, is_system, attachment) = match self.body {
            MessageBody::Text { text } => (text, false, None),
            MessageBody::SystemNotice { text } => (text, true, None),
            MessageBody::Attachment { caption, attachment } => {
                (caption, false, Some(attachment.into()))
            }
        };
        MessageRecord {
            timestamp: Some(now),
            sender,
            text,
            is_system,
            attachment,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Me,
    Them,
}

/// Viewer-relative projection of a message, handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageView {
    pub node_id: NodeId,
    pub text: String,
    pub side: Side,
    pub timestamp: i64,
    pub time_label: String,
    pub is_system: bool,
    pub attachment: Option<Attachment>,
}

/// `HH:MM` in local time, empty if the timestamp is out of range.
pub fn time_label(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(dt) => dt.format("%H:%M").to_string(),
        _ => String::new(),
    }
}
