//! Records written into the shared graph.
//!
//! Every record travels as a JSON value so that partial or foreign writes
//! can be inspected field by field before being trusted. Decoding is strict:
//! anything that does not parse is treated as malformed and dropped by the
//! consumer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MAX_SIGNAL_SKEW_MS;
use crate::error::RecordError;
use crate::types::{CallId, CallKind, Identity};

/// JSON encode/decode for graph records.
pub trait Record: Serialize + DeserializeOwned {
    fn to_value(&self) -> Result<Value, RecordError> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_value(value: &Value) -> Result<Self, RecordError> {
        Ok(Self::deserialize(value)?)
    }
}

/// One entry of a two-party message log.
///
/// `timestamp` is optional on the wire only so that a partial write can be
/// recognised and rejected rather than failing to decode as something else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub sender: Identity,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRecord>,
}

impl Record for MessageRecord {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub name: String,
    pub mime_type: String,
    /// File content as text (typically a data URL)
    pub payload: String,
}

/// "I exist and I wrote to you", appended to the recipient's inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnnounceRecord {
    pub from: Identity,
    #[serde(default)]
    pub from_display_name: Option<String>,
    pub announced_at: i64,
}

impl Record for AnnounceRecord {}

/// Call intent, put (not appended) into the callee's signal slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalEnvelope {
    pub from: Identity,
    #[serde(default)]
    pub from_display_name: Option<String>,
    pub kind: CallKind,
    pub room_key: String,
    pub call_id: CallId,
    pub issued_at: i64,
}

impl Record for SignalEnvelope {}

impl SignalEnvelope {
    /// Age of the envelope as seen from `now`, by the local clock. `None`
    /// when `issued_at` is too far from `now` to subtract.
    pub fn age_ms(&self, now: i64) -> Option<i64> {
        now.checked_sub(self.issued_at)
    }

    /// Younger than `window_ms` and stamped no more than
    /// [`MAX_SIGNAL_SKEW_MS`] in the future.
    pub fn is_fresh(&self, now: i64, window_ms: i64) -> bool {
        matches!(self.age_ms(now), Some(age) if age >= -MAX_SIGNAL_SKEW_MS && age < window_ms)
    }

    pub fn display_name(&self) -> String {
        self.from_display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.from.default_display_name())
    }
}

/// Opaque media negotiation payloads plus call control.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NegotiationBlob {
    /// Callee picked up
    Accept,
    /// Callee refused
    Decline,
    /// Session description offer
    Offer(String),
    /// Session description answer
    Answer(String),
    /// Connectivity candidate
    Candidate(String),
    /// Either side left
    Hangup,
}

impl NegotiationBlob {
    pub fn label(&self) -> &'static str {
        match self {
            NegotiationBlob::Accept => "accept",
            NegotiationBlob::Decline => "decline",
            NegotiationBlob::Offer(_) => "offer",
            NegotiationBlob::Answer(_) => "answer",
            NegotiationBlob::Candidate(_) => "candidate",
            NegotiationBlob::Hangup => "hangup",
        }
    }
}

/// Entry of a per-call exchange log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NegotiationRecord {
    pub from: Identity,
    pub call_id: CallId,
    pub issued_at: i64,
    pub blob: NegotiationBlob,
}

impl Record for NegotiationRecord {}
