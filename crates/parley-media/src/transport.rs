//! Collaborator traits for media capture and the peer-to-peer transport.
//!
//! The negotiator never touches devices or sockets directly. It asks a
//! [`MediaTransport`] for local media and for a [`TransportSession`], and
//! reacts to the [`TransportEvent`]s that session pushes into its sink.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use parley_shared::{CallId, CallKind, Identity, NegotiationBlob};

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn for_kind(kind: CallKind) -> Self {
        Self {
            audio: true,
            video: kind.wants_video(),
        }
    }
}

/// Generation counter of transport sessions. Events carrying an older
/// generation than the negotiator's current one are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub session: SessionId,
    pub local: Identity,
    pub remote: Identity,
    pub call_id: CallId,
    pub initiator: bool,
    /// Id of the local media handle the session sends
    pub media_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Description {
    Offer(String),
    Answer(String),
}

impl Description {
    pub fn into_blob(self) -> NegotiationBlob {
        match self {
            Description::Offer(sdp) => NegotiationBlob::Offer(sdp),
            Description::Answer(sdp) => NegotiationBlob::Answer(sdp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// No route to the peer yet. May clear up on its own.
    PeerUnreachable,
    /// The session is broken.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    LocalDescription(Description),
    LocalCandidate(String),
    RemoteStream,
    Error(TransportErrorKind),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub session: SessionId,
    pub kind: TransportEventKind,
}

pub type TransportSink = mpsc::UnboundedSender<TransportEvent>;

/// Captured local audio/video.
pub trait LocalMedia: Send {
    fn id(&self) -> &str;
    fn set_audio_enabled(&mut self, enabled: bool);
    fn set_video_enabled(&mut self, enabled: bool);
    /// Release the devices. Must be safe to call more than once.
    fn stop(&mut self);
}

/// One peer connection attempt.
pub trait TransportSession: Send {
    /// Feed an offer, answer or candidate received from the peer.
    fn apply_remote(&mut self, blob: &NegotiationBlob) -> Result<(), MediaError>;
    /// Must be safe to call more than once.
    fn close(&mut self);
}

pub trait MediaTransport: Send + Sync {
    fn acquire_local_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn LocalMedia>, MediaError>;

    fn create_session(
        &self,
        spec: SessionSpec,
        sink: TransportSink,
    ) -> Result<Box<dyn TransportSession>, MediaError>;
}
