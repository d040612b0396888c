//! Two-party call negotiation.
//!
//! The caller puts a [`SignalEnvelope`] into the callee's signal slot (done
//! by the session coordinator with the envelope returned from
//! [`CallNegotiator::start_call`]). Everything after that travels on the
//! call's exchange log, `"{room_key}/{call_id}"`: accept, decline, the
//! transport's offer/answer/candidates, hangup. Which side creates the offer
//! is decided by [`is_initiator`], independent of who placed the call.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use parley_shared::{
    CallId, CallKind, Identity, KeySpace, NegotiationBlob, NegotiationRecord, NodeId, Record,
    SignalEnvelope,
};
use parley_store::{EventSink, StoreEvent, SubscriptionManager, SyncStore};

use crate::error::{NegotiatorError, Result};
use crate::transport::{
    LocalMedia, MediaConstraints, MediaTransport, SessionId, SessionSpec, TransportErrorKind,
    TransportEvent, TransportEventKind, TransportSession, TransportSink,
};

/// Deterministic choice of the side that creates the offer. For two distinct
/// identities exactly one of `is_initiator(a, b)` and `is_initiator(b, a)`
/// holds.
pub fn is_initiator(local: &Identity, remote: &Identity) -> bool {
    local < remote
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    MediaUnavailable(String),
    PeerUnreachable,
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    Declined,
    NoAnswer,
    /// Peer could not be reached before the unreachable timeout
    Unavailable,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Requesting,
    Ringing,
    Connecting,
    Connected,
    Ended(EndReason),
    Failed(FailureReason),
}

impl CallState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::Requesting | CallState::Ringing | CallState::Connecting | CallState::Connected
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended(_) | CallState::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Requesting => "requesting",
            CallState::Ringing => "ringing",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Ended(_) => "ended",
            CallState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
    State {
        peer: Identity,
        call_id: CallId,
        state: CallState,
    },
}

#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    pub ring_timeout: Duration,
    pub unreachable_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        use parley_shared::constants::{
            DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_RING_TIMEOUT_SECS,
            DEFAULT_UNREACHABLE_TIMEOUT_SECS,
        };
        Self {
            ring_timeout: Duration::from_secs(DEFAULT_RING_TIMEOUT_SECS),
            unreachable_timeout: Duration::from_secs(DEFAULT_UNREACHABLE_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// The call currently owned by the negotiator, including a finished one
/// until the next call replaces it.
struct ActiveCall {
    peer: Identity,
    call_id: CallId,
    room_key: String,
    exchange: String,
    kind: CallKind,
    initiator: bool,
    session_id: SessionId,
    media: Option<Box<dyn LocalMedia>>,
    session: Option<Box<dyn TransportSession>>,
    unreachable_since: Option<i64>,
    seen: HashSet<NodeId>,
}

/// Read-only view of the current call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub peer: Identity,
    pub call_id: CallId,
    pub room_key: String,
    pub kind: CallKind,
    pub initiator: bool,
    pub state: CallState,
}

pub struct CallNegotiator {
    local: Identity,
    keys: KeySpace,
    subs: SubscriptionManager,
    transport: Arc<dyn MediaTransport>,
    transport_sink: TransportSink,
    config: NegotiatorConfig,
    state: CallState,
    state_since: i64,
    generation: u64,
    call: Option<ActiveCall>,
    events: Vec<CallEvent>,
}

impl CallNegotiator {
    pub fn new(
        local: Identity,
        keys: KeySpace,
        store: Arc<dyn SyncStore>,
        sink: EventSink,
        transport: Arc<dyn MediaTransport>,
        transport_sink: TransportSink,
        config: NegotiatorConfig,
    ) -> Self {
        Self {
            local,
            keys,
            subs: SubscriptionManager::new(store, sink),
            transport,
            transport_sink,
            config,
            state: CallState::Idle,
            state_since: 0,
            generation: 0,
            call: None,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn current_call(&self) -> Option<CallInfo> {
        self.call.as_ref().map(|c| CallInfo {
            peer: c.peer.clone(),
            call_id: c.call_id,
            room_key: c.room_key.clone(),
            kind: c.kind,
            initiator: c.initiator,
            state: self.state.clone(),
        })
    }

    /// Whether `event` belongs to this negotiator's exchange subscription.
    pub fn owns(&self, event: &StoreEvent) -> bool {
        self.subs.route(event).is_some()
    }

    /// State changes since the last call.
    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        std::mem::take(&mut self.events)
    }

    /// Place a call. On success the returned envelope must be put into the
    /// peer's signal slot.
    pub fn start_call(
        &mut self,
        peer: &Identity,
        display_name: Option<String>,
        kind: CallKind,
        now: i64,
    ) -> Result<SignalEnvelope> {
        if peer == &self.local {
            return Err(NegotiatorError::SelfCall);
        }
        if self.state.is_active() {
            return Err(NegotiatorError::Busy(self.state.label()));
        }

        let call_id = CallId::new();
        let room_key = self.keys.call_room(&self.local, peer);
        self.begin(peer.clone(), call_id, room_key.clone(), kind);
        info!(peer = %peer, call = %call_id, kind = %kind, "Starting call");
        self.set_state(CallState::Requesting, now);

        self.prepare(now)?;
        self.set_state(CallState::Ringing, now);

        Ok(SignalEnvelope {
            from: self.local.clone(),
            from_display_name: display_name,
            kind,
            room_key,
            call_id,
            issued_at: now,
        })
    }

    /// Pick up an incoming call.
    pub fn accept(&mut self, envelope: &SignalEnvelope, now: i64) -> Result<()> {
        if envelope.from == self.local {
            return Err(NegotiatorError::SelfCall);
        }
        if self.state.is_active() {
            return Err(NegotiatorError::Busy(self.state.label()));
        }

        self.begin(
            envelope.from.clone(),
            envelope.call_id,
            envelope.room_key.clone(),
            envelope.kind,
        );
        info!(peer = %envelope.from, call = %envelope.call_id, "Accepting call");
        self.set_state(CallState::Connecting, now);

        // Accept must reach the log before our own offer
        if let Err(e) = self.acquire_media() {
            return Err(self.fail(e, now));
        }
        if let Err(e) = self.subscribe_exchange() {
            return Err(self.fail(e, now));
        }
        self.publish(NegotiationBlob::Accept, now);
        if let Err(e) = self.create_session() {
            return Err(self.fail(e, now));
        }
        Ok(())
    }

    /// Refuse an incoming call. The negotiator's own state is untouched.
    pub fn decline(&mut self, envelope: &SignalEnvelope, now: i64) -> Result<()> {
        let exchange = self.keys.call_exchange(&envelope.room_key, &envelope.call_id);
        let record = NegotiationRecord {
            from: self.local.clone(),
            call_id: envelope.call_id,
            issued_at: now,
            blob: NegotiationBlob::Decline,
        };
        self.subs.store().append(&exchange, record.to_value()?)?;
        info!(peer = %envelope.from, call = %envelope.call_id, "Declined call");
        Ok(())
    }

    pub fn hangup(&mut self, now: i64) -> Result<()> {
        if !self.state.is_active() {
            return Err(NegotiatorError::NoCall);
        }
        self.publish(NegotiationBlob::Hangup, now);
        self.set_state(CallState::Ended(EndReason::LocalHangup), now);
        Ok(())
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) {
        if let Some(media) = self.call.as_mut().and_then(|c| c.media.as_mut()) {
            media.set_audio_enabled(enabled);
            debug!(enabled, "Audio toggled");
        }
    }

    pub fn set_video_enabled(&mut self, enabled: bool) {
        if let Some(media) = self.call.as_mut().and_then(|c| c.media.as_mut()) {
            media.set_video_enabled(enabled);
            debug!(enabled, "Video toggled");
        }
    }

    /// Leave any call and release everything. No state change when idle.
    pub fn dispose(&mut self, now: i64) {
        if self.state.is_active() {
            let _ = self.hangup(now);
        }
        self.teardown();
    }

    /// Handle a delivery from the exchange log. Returns `false` if the event
    /// is not ours.
    pub fn on_store_event(&mut self, event: &StoreEvent, now: i64) -> bool {
        if !self.owns(event) {
            return false;
        }

        let record = match NegotiationRecord::from_value(&event.value) {
            Ok(r) => r,
            Err(e) => {
                debug!(path = %event.path, error = %e, "Dropping malformed negotiation record");
                return true;
            }
        };

        let Some(call) = self.call.as_mut() else {
            return true;
        };
        if record.from == self.local || record.call_id != call.call_id || record.from != call.peer {
            return true;
        }
        if let Some(node) = &event.node {
            if !call.seen.insert(node.clone()) {
                return true;
            }
        }
        if !self.state.is_active() {
            return true;
        }

        debug!(peer = %record.from, call = %record.call_id, blob = record.blob.label(), "Exchange record");

        match record.blob {
            NegotiationBlob::Accept => {
                if matches!(self.state, CallState::Requesting | CallState::Ringing) {
                    self.set_state(CallState::Connecting, now);
                }
            }
            NegotiationBlob::Decline => {
                self.set_state(CallState::Ended(EndReason::Declined), now);
            }
            NegotiationBlob::Hangup => {
                self.set_state(CallState::Ended(EndReason::RemoteHangup), now);
            }
            blob @ (NegotiationBlob::Offer(_)
            | NegotiationBlob::Answer(_)
            | NegotiationBlob::Candidate(_)) => {
                let applied = match call.session.as_mut() {
                    Some(session) => session.apply_remote(&blob),
                    None => Ok(()),
                };
                if let Err(e) = applied {
                    warn!(call = %record.call_id, error = %e, "Transport rejected remote description");
                    self.set_state(CallState::Failed(FailureReason::Transport(e.to_string())), now);
                }
            }
        }
        true
    }

    pub fn on_transport_event(&mut self, event: TransportEvent, now: i64) {
        let current = match self.call.as_ref() {
            Some(c) if c.session_id == event.session => c.session_id,
            _ => {
                debug!(session = %event.session, "Ignoring stale transport event");
                return;
            }
        };
        if !self.state.is_active() {
            return;
        }

        match event.kind {
            TransportEventKind::LocalDescription(description) => {
                self.publish(description.into_blob(), now);
            }
            TransportEventKind::LocalCandidate(candidate) => {
                self.publish(NegotiationBlob::Candidate(candidate), now);
            }
            TransportEventKind::RemoteStream => {
                if let Some(call) = self.call.as_mut() {
                    call.unreachable_since = None;
                }
                if matches!(self.state, CallState::Connecting | CallState::Ringing) {
                    self.set_state(CallState::Connected, now);
                }
            }
            TransportEventKind::Error(TransportErrorKind::PeerUnreachable) => {
                if let Some(call) = self.call.as_mut() {
                    if call.unreachable_since.is_none() {
                        debug!(session = %current, "Peer unreachable, waiting");
                        call.unreachable_since = Some(now);
                    }
                }
            }
            TransportEventKind::Error(TransportErrorKind::Failed(reason)) => {
                warn!(session = %current, reason = %reason, "Transport failed");
                self.set_state(CallState::Failed(FailureReason::Transport(reason)), now);
            }
            TransportEventKind::Closed => {
                self.set_state(CallState::Ended(EndReason::Closed), now);
            }
        }
    }

    /// Enforce the ringing, unreachable and connecting deadlines.
    pub fn tick(&mut self, now: i64) {
        let elapsed = now - self.state_since;
        let unreachable_for = self
            .call
            .as_ref()
            .and_then(|c| c.unreachable_since)
            .map(|since| now - since);

        match self.state {
            CallState::Requesting | CallState::Ringing
                if unreachable_for.is_some_and(|d| d >= millis(self.config.unreachable_timeout)) =>
            {
                self.set_state(CallState::Ended(EndReason::Unavailable), now);
            }
            CallState::Ringing if elapsed >= millis(self.config.ring_timeout) => {
                self.set_state(CallState::Ended(EndReason::NoAnswer), now);
            }
            CallState::Connecting if elapsed >= millis(self.config.connect_timeout) => {
                self.set_state(CallState::Failed(FailureReason::PeerUnreachable), now);
            }
            _ => {}
        }
    }

    fn begin(&mut self, peer: Identity, call_id: CallId, room_key: String, kind: CallKind) {
        // Leftovers of a finished call
        self.teardown();
        self.generation += 1;
        let exchange = self.keys.call_exchange(&room_key, &call_id);
        let initiator = is_initiator(&self.local, &peer);
        self.call = Some(ActiveCall {
            peer,
            call_id,
            room_key,
            exchange,
            kind,
            initiator,
            session_id: SessionId(self.generation),
            media: None,
            session: None,
            unreachable_since: None,
            seen: HashSet::new(),
        });
        self.state = CallState::Idle;
    }

    /// Media, exchange subscription, transport session. Any failure is
    /// terminal for the attempt.
    fn prepare(&mut self, now: i64) -> Result<()> {
        if let Err(e) = self.acquire_media() {
            return Err(self.fail(e, now));
        }
        if let Err(e) = self.subscribe_exchange() {
            return Err(self.fail(e, now));
        }
        if let Err(e) = self.create_session() {
            return Err(self.fail(e, now));
        }
        Ok(())
    }

    fn acquire_media(&mut self) -> Result<()> {
        let call = self.call.as_mut().ok_or(NegotiatorError::NoCall)?;
        let media = self
            .transport
            .acquire_local_media(&MediaConstraints::for_kind(call.kind))?;
        debug!(call = %call.call_id, media = %media.id(), "Local media acquired");
        call.media = Some(media);
        Ok(())
    }

    fn subscribe_exchange(&mut self) -> Result<()> {
        let exchange = match self.call.as_ref() {
            Some(c) => c.exchange.clone(),
            None => return Err(NegotiatorError::NoCall),
        };
        self.subs.add(&exchange, &exchange)?;
        Ok(())
    }

    fn create_session(&mut self) -> Result<()> {
        let call = self.call.as_mut().ok_or(NegotiatorError::NoCall)?;
        let spec = SessionSpec {
            session: call.session_id,
            local: self.local.clone(),
            remote: call.peer.clone(),
            call_id: call.call_id,
            initiator: call.initiator,
            media_id: call
                .media
                .as_ref()
                .map(|m| m.id().to_string())
                .unwrap_or_default(),
        };
        let session = self
            .transport
            .create_session(spec, self.transport_sink.clone())?;
        debug!(call = %call.call_id, session = %call.session_id, initiator = call.initiator, "Transport session created");
        call.session = Some(session);
        Ok(())
    }

    /// Map a setup error to a terminal state and hand it back.
    fn fail(&mut self, err: NegotiatorError, now: i64) -> NegotiatorError {
        let reason = match &err {
            NegotiatorError::Media(crate::MediaError::Unavailable(msg)) => {
                FailureReason::MediaUnavailable(msg.clone())
            }
            other => FailureReason::Transport(other.to_string()),
        };
        warn!(error = %err, "Call setup failed");
        self.set_state(CallState::Failed(reason), now);
        err
    }

    fn publish(&mut self, blob: NegotiationBlob, now: i64) {
        let Some(call) = self.call.as_ref() else {
            return;
        };
        let label = blob.label();
        let record = NegotiationRecord {
            from: self.local.clone(),
            call_id: call.call_id,
            issued_at: now,
            blob,
        };
        let result = record
            .to_value()
            .map_err(NegotiatorError::from)
            .and_then(|v| {
                self.subs
                    .store()
                    .append(&call.exchange, v)
                    .map_err(NegotiatorError::from)
            });
        if let Err(e) = result {
            warn!(call = %call.call_id, blob = label, error = %e, "Failed to publish exchange record");
        }
    }

    fn set_state(&mut self, state: CallState, now: i64) {
        if self.state == state {
            return;
        }
        self.state = state.clone();
        self.state_since = now;

        if let Some(call) = self.call.as_ref() {
            debug!(peer = %call.peer, call = %call.call_id, state = state.label(), "Call state");
            self.events.push(CallEvent::State {
                peer: call.peer.clone(),
                call_id: call.call_id,
                state: state.clone(),
            });
        }

        if state.is_terminal() {
            self.teardown();
        }
    }

    /// Stop media, close the session, drop the exchange subscription.
    fn teardown(&mut self) {
        if let Some(call) = self.call.as_mut() {
            if let Some(mut media) = call.media.take() {
                media.stop();
            }
            if let Some(mut session) = call.session.take() {
                session.close();
            }
        }
        self.subs.clear();
    }
}

impl Drop for CallNegotiator {
    fn drop(&mut self) {
        self.teardown();
    }
}
