//! In-process transport.
//!
//! Sessions exchange descriptions only through the shared graph, exactly
//! like a real peer connection would, but "connect" as soon as an offer and
//! its answer have met. Every handle that is acquired, stopped or closed is
//! recorded so tests can assert on resource release.

use std::sync::{Arc, Mutex};

use tracing::debug;

use parley_shared::NegotiationBlob;

use crate::error::MediaError;
use crate::transport::{
    Description, LocalMedia, MediaConstraints, MediaTransport, SessionId, SessionSpec,
    TransportErrorKind, TransportEvent, TransportEventKind, TransportSession, TransportSink,
};

#[derive(Default)]
struct LoopbackState {
    next_media: u64,
    acquired: Vec<String>,
    stopped: Vec<String>,
    flags: Vec<(String, bool, bool)>,
    sessions: Vec<(SessionId, TransportSink)>,
    closed: Vec<SessionId>,
    deny_media: Option<String>,
    unreachable: bool,
}

#[derive(Clone, Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following media request fail with `reason`.
    pub fn deny_media(&self, reason: &str) {
        if let Ok(mut st) = self.state.lock() {
            st.deny_media = Some(reason.to_string());
        }
    }

    pub fn allow_media(&self) {
        if let Ok(mut st) = self.state.lock() {
            st.deny_media = None;
        }
    }

    /// New sessions report the peer unreachable instead of negotiating.
    pub fn set_unreachable(&self, unreachable: bool) {
        if let Ok(mut st) = self.state.lock() {
            st.unreachable = unreachable;
        }
    }

    pub fn acquired(&self) -> Vec<String> {
        self.state.lock().map(|st| st.acquired.clone()).unwrap_or_default()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().map(|st| st.stopped.clone()).unwrap_or_default()
    }

    /// Media handles acquired but not yet stopped.
    pub fn live_media(&self) -> usize {
        self.state
            .lock()
            .map(|st| st.acquired.len() - st.stopped.len())
            .unwrap_or(0)
    }

    /// Last audio/video flags set on the media handle `id`.
    pub fn media_flags(&self, id: &str) -> Option<(bool, bool)> {
        let st = self.state.lock().ok()?;
        st.flags
            .iter()
            .find(|(m, _, _)| m == id)
            .map(|(_, audio, video)| (*audio, *video))
    }

    pub fn sessions_created(&self) -> usize {
        self.state.lock().map(|st| st.sessions.len()).unwrap_or(0)
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.lock().map(|st| st.closed.len()).unwrap_or(0)
    }

    /// Push an event as if the most recent session had produced it.
    pub fn inject(&self, kind: TransportEventKind) -> bool {
        let Ok(st) = self.state.lock() else {
            return false;
        };
        match st.sessions.last() {
            Some((session, sink)) => sink
                .send(TransportEvent {
                    session: *session,
                    kind,
                })
                .is_ok(),
            None => false,
        }
    }
}

impl MediaTransport for LoopbackTransport {
    fn acquire_local_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Box<dyn LocalMedia>, MediaError> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| MediaError::Unavailable("loopback state poisoned".into()))?;
        if let Some(reason) = &st.deny_media {
            return Err(MediaError::Unavailable(reason.clone()));
        }

        st.next_media += 1;
        let id = format!("loopback-media-{}", st.next_media);
        st.acquired.push(id.clone());
        st.flags.push((id.clone(), constraints.audio, constraints.video));
        debug!(media = %id, video = constraints.video, "Loopback media acquired");

        Ok(Box::new(LoopbackMedia {
            id,
            stopped: false,
            state: self.state.clone(),
        }))
    }

    fn create_session(
        &self,
        spec: SessionSpec,
        sink: TransportSink,
    ) -> Result<Box<dyn TransportSession>, MediaError> {
        let unreachable = {
            let mut st = self
                .state
                .lock()
                .map_err(|_| MediaError::Transport("loopback state poisoned".into()))?;
            st.sessions.push((spec.session, sink.clone()));
            st.unreachable
        };

        let session = LoopbackSession {
            spec,
            sink,
            closed: false,
            state: self.state.clone(),
        };

        if unreachable {
            session.emit(TransportEventKind::Error(TransportErrorKind::PeerUnreachable));
        } else if session.spec.initiator {
            session.emit(TransportEventKind::LocalDescription(Description::Offer(format!(
                "loopback-offer {}",
                session.spec.call_id
            ))));
            session.emit(TransportEventKind::LocalCandidate(format!(
                "loopback-candidate {}",
                session.spec.local.normalized()
            )));
        }

        Ok(Box::new(session))
    }
}

struct LoopbackMedia {
    id: String,
    stopped: bool,
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackMedia {
    fn update_flags(&self, audio: Option<bool>, video: Option<bool>) {
        if let Ok(mut st) = self.state.lock() {
            if let Some(entry) = st.flags.iter_mut().find(|(m, _, _)| *m == self.id) {
                if let Some(a) = audio {
                    entry.1 = a;
                }
                if let Some(v) = video {
                    entry.2 = v;
                }
            }
        }
    }
}

impl LocalMedia for LoopbackMedia {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_audio_enabled(&mut self, enabled: bool) {
        self.update_flags(Some(enabled), None);
    }

    fn set_video_enabled(&mut self, enabled: bool) {
        self.update_flags(None, Some(enabled));
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Ok(mut st) = self.state.lock() {
            st.stopped.push(self.id.clone());
        }
        debug!(media = %self.id, "Loopback media stopped");
    }
}

struct LoopbackSession {
    spec: SessionSpec,
    sink: TransportSink,
    closed: bool,
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackSession {
    fn emit(&self, kind: TransportEventKind) {
        let _ = self.sink.send(TransportEvent {
            session: self.spec.session,
            kind,
        });
    }
}

impl TransportSession for LoopbackSession {
    fn apply_remote(&mut self, blob: &NegotiationBlob) -> Result<(), MediaError> {
        if self.closed {
            return Err(MediaError::Transport("session closed".into()));
        }
        match blob {
            NegotiationBlob::Offer(_) if !self.spec.initiator => {
                self.emit(TransportEventKind::LocalDescription(Description::Answer(format!(
                    "loopback-answer {}",
                    self.spec.call_id
                ))));
                self.emit(TransportEventKind::RemoteStream);
            }
            NegotiationBlob::Answer(_) if self.spec.initiator => {
                self.emit(TransportEventKind::RemoteStream);
            }
            NegotiationBlob::Offer(_) | NegotiationBlob::Answer(_) => {
                return Err(MediaError::Transport(format!(
                    "unexpected {} for {} side",
                    blob.label(),
                    if self.spec.initiator { "initiating" } else { "answering" }
                )));
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Ok(mut st) = self.state.lock() {
            st.closed.push(self.spec.session);
        }
        debug!(session = %self.spec.session, "Loopback session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{CallId, CallKind, Identity};
    use tokio::sync::mpsc;

    fn spec(initiator: bool) -> SessionSpec {
        SessionSpec {
            session: SessionId(1),
            local: Identity::parse("alice@x").unwrap(),
            remote: Identity::parse("bob@y").unwrap(),
            call_id: CallId::new(),
            initiator,
            media_id: "m".into(),
        }
    }

    #[test]
    fn test_media_acquire_and_stop_recorded() {
        let t = LoopbackTransport::new();
        let mut media = t
            .acquire_local_media(&MediaConstraints::for_kind(CallKind::Video))
            .unwrap();
        assert_eq!(t.live_media(), 1);
        assert_eq!(t.media_flags(media.id()), Some((true, true)));

        media.set_audio_enabled(false);
        assert_eq!(t.media_flags(media.id()), Some((false, true)));

        media.stop();
        media.stop();
        assert_eq!(t.live_media(), 0);
        assert_eq!(t.stopped().len(), 1);
    }

    #[test]
    fn test_denied_media() {
        let t = LoopbackTransport::new();
        t.deny_media("permission denied");
        let err = t
            .acquire_local_media(&MediaConstraints::for_kind(CallKind::Audio))
            .err()
            .unwrap();
        assert_eq!(err, MediaError::Unavailable("permission denied".into()));
        assert!(t.acquired().is_empty());
    }

    #[test]
    fn test_initiator_offers_and_answerer_answers() {
        let t = LoopbackTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut offerer = t.create_session(spec(true), tx.clone()).unwrap();
        let offer = rx.try_recv().unwrap();
        assert!(matches!(
            offer.kind,
            TransportEventKind::LocalDescription(Description::Offer(_))
        ));
        assert!(matches!(rx.try_recv().unwrap().kind, TransportEventKind::LocalCandidate(_)));

        let mut answerer = t.create_session(spec(false), tx).unwrap();
        assert!(rx.try_recv().is_err());

        answerer.apply_remote(&NegotiationBlob::Offer("sdp".into())).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap().kind,
            TransportEventKind::LocalDescription(Description::Answer(_))
        ));
        assert_eq!(rx.try_recv().unwrap().kind, TransportEventKind::RemoteStream);

        offerer.apply_remote(&NegotiationBlob::Answer("sdp".into())).unwrap();
        assert_eq!(rx.try_recv().unwrap().kind, TransportEventKind::RemoteStream);

        offerer.close();
        offerer.close();
        assert_eq!(t.sessions_closed(), 1);
        assert!(offerer.apply_remote(&NegotiationBlob::Answer("x".into())).is_err());
    }

    #[test]
    fn test_unreachable_session_reports_error() {
        let t = LoopbackTransport::new();
        t.set_unreachable(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _s = t.create_session(spec(true), tx).unwrap();
        assert_eq!(
            rx.try_recv().unwrap().kind,
            TransportEventKind::Error(TransportErrorKind::PeerUnreachable)
        );
        assert!(rx.try_recv().is_err());
    }
}
