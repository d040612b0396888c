//! # parley-shared
//!
//! Types shared by every Parley crate: identities, deterministic channel
//! keys, the records written into the shared graph, the typed message model
//! and the clock used for freshness checks.

pub mod channel_key;
pub mod clock;
pub mod constants;
pub mod conversation;
pub mod error;
pub mod message;
pub mod protocol;
pub mod types;

pub use channel_key::{derive_key, KeySpace};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation::ConversationSummary;
pub use error::{IdentityError, RecordError};
pub use message::{Attachment, ChatMessage, MessageBody, MessageView, OutgoingMessage, Side};
pub use protocol::{
    AnnounceRecord, MessageRecord, NegotiationBlob, NegotiationRecord, Record, SignalEnvelope,
};
pub use types::{CallId, CallKind, Identity, NodeId};
