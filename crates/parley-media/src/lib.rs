//! # parley-media
//!
//! Call negotiation for two parties.
//!
//! [`CallNegotiator`] owns one call at a time and drives it through
//! `Requesting → Ringing → Connecting → Connected` (or an end/failure state)
//! using records on a per-call exchange log in the shared graph. Media
//! capture and the peer connection itself sit behind the [`MediaTransport`]
//! traits; [`LoopbackTransport`] is an in-process implementation.

pub mod loopback;
pub mod negotiator;
pub mod transport;

mod error;

pub use error::{MediaError, NegotiatorError, Result};
pub use loopback::LoopbackTransport;
pub use negotiator::{
    is_initiator, CallEvent, CallInfo, CallNegotiator, CallState, EndReason, FailureReason,
    NegotiatorConfig,
};
pub use transport::{
    Description, LocalMedia, MediaConstraints, MediaTransport, SessionId, SessionSpec,
    TransportErrorKind, TransportEvent, TransportEventKind, TransportSession, TransportSink,
};
