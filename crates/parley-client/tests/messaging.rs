use std::sync::Arc;

use parley_client::{Session, SessionConfig, SessionEvent};
use parley_media::LoopbackTransport;
use parley_shared::message::Side;
use parley_shared::{Identity, ManualClock, OutgoingMessage};
use parley_store::MemoryStore;

fn id(s: &str) -> Identity {
    Identity::parse(s).unwrap()
}

fn session(store: &MemoryStore, clock: &ManualClock, who: &str) -> Session {
    let mut s = Session::new(
        id(who),
        Arc::new(store.clone()),
        Arc::new(LoopbackTransport::new()),
        SessionConfig::default(),
    )
    .with_clock(Arc::new(clock.clone()));
    s.start().unwrap();
    s.drain_events();
    s
}

fn settle(a: &mut Session, b: &mut Session) {
    while a.pump() + b.pump() > 0 {}
}

fn last_messages(events: &[SessionEvent], peer: &Identity) -> Option<Vec<parley_shared::MessageView>> {
    events.iter().rev().find_map(|ev| match ev {
        SessionEvent::Messages { peer: p, messages } if p == peer => Some(messages.clone()),
        _ => None,
    })
}

#[test]
fn hello_reaches_a_peer_that_never_heard_of_us() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(1_700_000_000_000);
    let mut alice = session(&store, &clock, "alice@x");
    let mut bob = session(&store, &clock, "bob@y");

    alice
        .send_message(&id("bob@y"), OutgoingMessage::text("hello"))
        .unwrap();
    settle(&mut alice, &mut bob);

    // Bob discovered Alice through his inbox
    let conversations = bob.conversations();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].identity, id("alice@x"));
    assert_eq!(conversations[0].display_name, "alice");

    let bob_events = bob.drain_events();
    let seen_by_bob = last_messages(&bob_events, &id("alice@x")).unwrap();
    assert_eq!(seen_by_bob.len(), 1);
    assert_eq!(seen_by_bob[0].text, "hello");
    assert_eq!(seen_by_bob[0].side, Side::Them);

    let alice_events = alice.drain_events();
    let seen_by_alice = last_messages(&alice_events, &id("bob@y")).unwrap();
    assert_eq!(seen_by_alice.len(), 1);
    assert_eq!(seen_by_alice[0].side, Side::Me);
}

#[test]
fn replies_interleave_in_timestamp_order() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(10_000);
    let mut alice = session(&store, &clock, "alice@x");
    let mut bob = session(&store, &clock, "bob@y");

    alice.send_message(&id("bob@y"), OutgoingMessage::text("one")).unwrap();
    clock.advance(1_000);
    settle(&mut alice, &mut bob);

    bob.send_message(&id("alice@x"), OutgoingMessage::text("two")).unwrap();
    clock.advance(1_000);
    alice.send_message(&id("bob@y"), OutgoingMessage::text("three")).unwrap();
    settle(&mut alice, &mut bob);

    let texts = |s: &Session, peer: &str| -> Vec<String> {
        s.messages(&id(peer)).into_iter().map(|m| m.text).collect()
    };
    assert_eq!(texts(&alice, "bob@y"), vec!["one", "two", "three"]);
    assert_eq!(texts(&bob, "alice@x"), vec!["one", "two", "three"]);

    // Discovery happened once on each side
    assert_eq!(alice.conversations().len(), 1);
    assert_eq!(bob.conversations().len(), 1);
}

#[test]
fn late_joiner_replays_history() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(5_000);
    let mut alice = session(&store, &clock, "alice@x");

    alice.send_message(&id("bob@y"), OutgoingMessage::text("are you there?")).unwrap();
    alice.send_message(&id("bob@y"), OutgoingMessage::text("ping")).unwrap();
    alice.pump();

    let mut bob = session(&store, &clock, "bob@y");
    settle(&mut alice, &mut bob);

    let texts: Vec<_> = bob.messages(&id("alice@x")).into_iter().map(|m| m.text).collect();
    assert_eq!(texts.len(), 2);
    assert!(texts.contains(&"ping".to_string()));
    assert_eq!(bob.conversations()[0].last_message_preview, texts[1]);
}

#[test]
fn shutdown_releases_every_subscription() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(0);
    let mut alice = session(&store, &clock, "alice@x");
    alice.add_conversation(&id("bob@y")).unwrap();
    alice.add_conversation(&id("carol@z")).unwrap();
    assert!(store.subscriber_count() >= 4);

    alice.shutdown();
    assert_eq!(store.subscriber_count(), 0);
}
