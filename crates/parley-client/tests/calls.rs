use std::sync::{Arc, Mutex};

use parley_client::{
    CallNotice, IncomingCall, Notifier, Session, SessionConfig, SessionError, SessionEvent,
};
use parley_media::{CallEvent, CallState, EndReason, FailureReason, LoopbackTransport};
use parley_shared::{CallKind, Identity, ManualClock};
use parley_store::MemoryStore;

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<CallNotice>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &CallNotice) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

struct Party {
    session: Session,
    transport: LoopbackTransport,
    events: Vec<SessionEvent>,
}

impl Party {
    fn join(store: &MemoryStore, clock: &ManualClock, who: &str, config: SessionConfig) -> Self {
        let transport = LoopbackTransport::new();
        let mut session = Session::new(
            id(who),
            Arc::new(store.clone()),
            Arc::new(transport.clone()),
            config,
        )
        .with_clock(Arc::new(clock.clone()));
        session.start().unwrap();
        session.drain_events();
        Self {
            session,
            transport,
            events: Vec::new(),
        }
    }

    fn collect(&mut self) {
        self.events.extend(self.session.drain_events());
    }

    fn states(&self) -> Vec<CallState> {
        self.events
            .iter()
            .filter_map(|ev| match ev {
                SessionEvent::Call(CallEvent::State { state, .. }) => Some(state.clone()),
                _ => None,
            })
            .collect()
    }

    fn incoming(&self) -> Option<IncomingCall> {
        self.events.iter().find_map(|ev| match ev {
            SessionEvent::IncomingCall(call) => Some(call.clone()),
            _ => None,
        })
    }

    fn was_cancelled(&self) -> bool {
        self.events
            .iter()
            .any(|ev| matches!(ev, SessionEvent::CallCancelled { .. }))
    }
}

fn id(s: &str) -> Identity {
    Identity::parse(s).unwrap()
}

fn settle(a: &mut Party, b: &mut Party) {
    while a.session.pump() + b.session.pump() > 0 {}
    a.collect();
    b.collect();
}

fn pair(config_b: SessionConfig) -> (MemoryStore, ManualClock, Party, Party) {
    let store = MemoryStore::new();
    let clock = ManualClock::new(1_700_000_000_000);
    let alice = Party::join(&store, &clock, "alice@x", SessionConfig::default());
    let bob = Party::join(&store, &clock, "bob@y", config_b);
    (store, clock, alice, bob)
}

#[test]
fn call_connects_and_hangs_up() {
    let (_store, _clock, mut alice, mut bob) = pair(SessionConfig::default());

    alice
        .session
        .start_call(&id("bob@y"), CallKind::Video)
        .unwrap();
    settle(&mut alice, &mut bob);

    assert_eq!(alice.states(), vec![CallState::Requesting, CallState::Ringing]);
    let incoming = bob.incoming().expect("bob should be ringing");
    assert_eq!(incoming.from, id("alice@x"));
    assert_eq!(incoming.display_name, "alice");
    assert_eq!(incoming.kind, CallKind::Video);
    assert!(!incoming.known);

    bob.session.accept_call().unwrap();
    settle(&mut alice, &mut bob);

    assert_eq!(bob.states(), vec![CallState::Connecting, CallState::Connected]);
    assert_eq!(
        alice.states(),
        vec![
            CallState::Requesting,
            CallState::Ringing,
            CallState::Connecting,
            CallState::Connected
        ]
    );
    assert_eq!(alice.transport.live_media(), 1);
    assert_eq!(bob.transport.live_media(), 1);

    alice.session.hangup().unwrap();
    settle(&mut alice, &mut bob);

    assert_eq!(
        alice.states().last(),
        Some(&CallState::Ended(EndReason::LocalHangup))
    );
    assert_eq!(
        bob.states().last(),
        Some(&CallState::Ended(EndReason::RemoteHangup))
    );
    assert_eq!(alice.transport.live_media(), 0);
    assert_eq!(bob.transport.live_media(), 0);
    assert_eq!(alice.transport.sessions_closed(), 1);
    assert_eq!(bob.transport.sessions_closed(), 1);
}

#[test]
fn callee_hanging_up_ends_the_callers_call() {
    let (_store, _clock, mut alice, mut bob) = pair(SessionConfig::default());

    alice.session.start_call(&id("bob@y"), CallKind::Audio).unwrap();
    settle(&mut alice, &mut bob);
    bob.session.accept_call().unwrap();
    settle(&mut alice, &mut bob);
    assert_eq!(alice.states().last(), Some(&CallState::Connected));

    bob.session.hangup().unwrap();
    settle(&mut alice, &mut bob);

    assert_eq!(
        bob.states().last(),
        Some(&CallState::Ended(EndReason::LocalHangup))
    );
    assert_eq!(
        alice.states().last(),
        Some(&CallState::Ended(EndReason::RemoteHangup))
    );
    assert_eq!(alice.transport.live_media(), 0);
    assert_eq!(bob.transport.live_media(), 0);
    assert_eq!(alice.transport.sessions_closed(), 1);
    assert_eq!(bob.transport.sessions_closed(), 1);
}

#[test]
fn second_caller_waits_while_the_first_is_ringing() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(3_000_000);
    let mut alice = Party::join(&store, &clock, "alice@x", SessionConfig::default());
    let mut bob = Party::join(&store, &clock, "bob@y", SessionConfig::default());
    let mut carol = Party::join(&store, &clock, "carol@z", SessionConfig::default());

    alice.session.start_call(&id("bob@y"), CallKind::Audio).unwrap();
    settle(&mut alice, &mut bob);
    carol.session.start_call(&id("bob@y"), CallKind::Video).unwrap();
    settle(&mut carol, &mut bob);

    let pending = bob.session.snapshot().pending.unwrap();
    assert_eq!(pending.from, id("alice@x"));
    assert!(!bob.was_cancelled());
}

#[test]
fn caller_retrying_replaces_the_ringing_call() {
    let (_store, clock, mut alice, mut bob) = pair(SessionConfig::default());

    alice.session.start_call(&id("bob@y"), CallKind::Audio).unwrap();
    settle(&mut alice, &mut bob);
    let first = bob.incoming().unwrap();

    // Alice's side gives up without a hangup reaching bob
    clock.advance(45_000);
    alice.session.tick();
    alice.collect();
    clock.advance(1_000);
    alice.session.start_call(&id("bob@y"), CallKind::Video).unwrap();
    settle(&mut alice, &mut bob);

    assert!(bob.was_cancelled());
    let pending = bob.session.snapshot().pending.unwrap();
    assert_eq!(pending.from, id("alice@x"));
    assert_eq!(pending.kind, CallKind::Video);
    assert_ne!(pending.call_id, first.call_id);
}

#[test]
fn callee_with_lower_identity_creates_the_offer() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(50_000);
    let mut zed = Party::join(&store, &clock, "zed@x", SessionConfig::default());
    let mut amy = Party::join(&store, &clock, "amy@y", SessionConfig::default());

    zed.session.start_call(&id("amy@y"), CallKind::Audio).unwrap();
    settle(&mut zed, &mut amy);
    assert!(amy.incoming().is_some());

    amy.session.accept_call().unwrap();
    settle(&mut zed, &mut amy);

    assert_eq!(zed.states().last(), Some(&CallState::Connected));
    assert_eq!(amy.states().last(), Some(&CallState::Connected));
    assert!(amy.session.call().unwrap().initiator);
    assert!(!zed.session.call().unwrap().initiator);
}

#[test]
fn call_posts_a_notice_and_notifies() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(1_000_000);
    let notifier = Arc::new(RecordingNotifier::default());
    let transport = LoopbackTransport::new();
    let mut alice = Session::new(
        id("alice@x"),
        Arc::new(store.clone()),
        Arc::new(transport),
        SessionConfig::default(),
    )
    .with_clock(Arc::new(clock.clone()))
    .with_display_name("Alice Liddell")
    .with_notifier(notifier.clone());
    alice.start().unwrap();

    alice.start_call(&id("bob@y"), CallKind::Audio).unwrap();
    alice.pump();

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, id("bob@y"));
    assert!(sent[0].subject.contains("Alice Liddell"));

    let history = alice.messages(&id("bob@y"));
    assert_eq!(history.len(), 1);
    assert!(history[0].is_system);
    assert!(history[0].text.contains("Open Parley to join"));
}

#[test]
fn decline_ends_the_callers_attempt() {
    let (_store, _clock, mut alice, mut bob) = pair(SessionConfig::default());

    alice.session.start_call(&id("bob@y"), CallKind::Audio).unwrap();
    settle(&mut alice, &mut bob);
    bob.session.decline_call().unwrap();
    settle(&mut alice, &mut bob);

    assert_eq!(
        alice.states().last(),
        Some(&CallState::Ended(EndReason::Declined))
    );
    assert!(bob.states().is_empty());
    assert!(bob.session.snapshot().pending.is_none());
    assert_eq!(alice.transport.live_media(), 0);
}

#[test]
fn caller_hanging_up_cancels_the_ring() {
    let (_store, _clock, mut alice, mut bob) = pair(SessionConfig::default());

    alice.session.start_call(&id("bob@y"), CallKind::Audio).unwrap();
    settle(&mut alice, &mut bob);
    assert!(bob.session.snapshot().pending.is_some());

    alice.session.hangup().unwrap();
    settle(&mut alice, &mut bob);

    assert!(bob.was_cancelled());
    assert!(bob.session.snapshot().pending.is_none());
    assert!(matches!(
        bob.session.accept_call(),
        Err(SessionError::NoPendingCall)
    ));
}

#[test]
fn unanswered_call_times_out_on_both_sides() {
    let (_store, clock, mut alice, mut bob) = pair(SessionConfig::default());

    alice.session.start_call(&id("bob@y"), CallKind::Audio).unwrap();
    settle(&mut alice, &mut bob);

    clock.advance(44_999);
    alice.session.tick();
    bob.session.tick();
    alice.collect();
    bob.collect();
    assert_eq!(alice.states().last(), Some(&CallState::Ringing));
    assert!(!bob.was_cancelled());

    clock.advance(1);
    alice.session.tick();
    bob.session.tick();
    alice.collect();
    bob.collect();
    assert_eq!(
        alice.states().last(),
        Some(&CallState::Ended(EndReason::NoAnswer))
    );
    assert!(bob.was_cancelled());
}

#[test]
fn stale_signal_is_not_surfaced() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(1_000_000);
    let mut alice = Party::join(&store, &clock, "alice@x", SessionConfig::default());

    alice.session.start_call(&id("bob@y"), CallKind::Audio).unwrap();
    alice.session.pump();

    // Bob comes online after the freshness window
    clock.advance(20_000);
    let mut bob = Party::join(&store, &clock, "bob@y", SessionConfig::default());
    settle(&mut alice, &mut bob);

    assert!(bob.incoming().is_none());
    // Still discovered through the call notice
    assert_eq!(bob.session.conversations().len(), 1);
}

#[test]
fn media_denied_never_signals() {
    let (_store, _clock, mut alice, mut bob) = pair(SessionConfig::default());
    alice.transport.deny_media("no microphone");

    let err = alice
        .session
        .start_call(&id("bob@y"), CallKind::Audio)
        .unwrap_err();
    assert!(matches!(err, SessionError::Call(_)));
    settle(&mut alice, &mut bob);

    assert_eq!(
        alice.states(),
        vec![
            CallState::Requesting,
            CallState::Failed(FailureReason::MediaUnavailable("no microphone".into()))
        ]
    );
    assert!(bob.incoming().is_none());
    assert_eq!(alice.transport.live_media(), 0);
}

#[test]
fn known_caller_is_auto_accepted() {
    let config = SessionConfig {
        auto_accept_known: true,
        ..SessionConfig::default()
    };
    let (_store, _clock, mut alice, mut bob) = pair(config);
    bob.session.add_conversation(&id("alice@x")).unwrap();
    bob.session.drain_events();

    alice.session.start_call(&id("bob@y"), CallKind::Video).unwrap();
    settle(&mut alice, &mut bob);

    assert!(bob.incoming().unwrap().known);
    assert_eq!(alice.states().last(), Some(&CallState::Connected));
    assert_eq!(bob.states().last(), Some(&CallState::Connected));
}

#[test]
fn busy_callee_ignores_a_second_caller() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(2_000_000);
    let mut alice = Party::join(&store, &clock, "alice@x", SessionConfig::default());
    let mut bob = Party::join(&store, &clock, "bob@y", SessionConfig::default());
    let mut carol = Party::join(&store, &clock, "carol@z", SessionConfig::default());

    alice.session.start_call(&id("bob@y"), CallKind::Audio).unwrap();
    settle(&mut alice, &mut bob);
    bob.session.accept_call().unwrap();
    settle(&mut alice, &mut bob);
    assert_eq!(bob.states().last(), Some(&CallState::Connected));

    carol.session.start_call(&id("bob@y"), CallKind::Audio).unwrap();
    settle(&mut carol, &mut bob);

    let incoming: Vec<_> = bob
        .events
        .iter()
        .filter(|ev| matches!(ev, SessionEvent::IncomingCall(_)))
        .collect();
    assert_eq!(incoming.len(), 1);
    assert_eq!(bob.session.call().unwrap().peer, id("alice@x"));
}
