/// Application name
pub const APP_NAME: &str = "Parley";

/// Default namespace embedded in every store path
pub const DEFAULT_NAMESPACE: &str = "parley";

/// Wire protocol version; bump when record layouts change incompatibly
pub const PROTOCOL_VERSION: u32 = 1;

/// Joins the two normalised identities of a pair key. Never produced by
/// `channel_key::normalize`.
pub const PAIR_SEPARATOR: char = '+';

/// Maximum age of a call signal before it is ignored (20 s)
pub const DEFAULT_FRESHNESS_WINDOW_MS: i64 = 20_000;

/// How far ahead of the local clock a signal may be stamped and still count
/// as fresh (5 s)
pub const MAX_SIGNAL_SKEW_MS: i64 = 5_000;

/// How long a caller rings before giving up (45 s)
pub const DEFAULT_RING_TIMEOUT_SECS: u64 = 45;

/// How long to wait for an unreachable peer before reporting it unavailable
pub const DEFAULT_UNREACHABLE_TIMEOUT_SECS: u64 = 30;

/// How long the offer/answer/candidate exchange may take
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

/// Maximum size of an encoded graph operation on the wire (256 KiB)
pub const MAX_OP_SIZE: usize = 262_144;

/// Maximum attachment payload accepted for sending (192 KiB of text)
pub const MAX_ATTACHMENT_SIZE: usize = 196_608;

/// Maximum message text or caption accepted for sending (16 KiB)
pub const MAX_TEXT_SIZE: usize = 16_384;

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4101;

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Preview shown for a conversation created by discovery
pub const DISCOVERED_PREVIEW: &str = "Started a conversation";

/// Preview shown for a conversation added by hand
pub const ADDED_PREVIEW: &str = "Conversation created";

/// Activity label for something that just happened
pub const LABEL_NOW: &str = "Now";
