//! The per-identity coordinator.
//!
//! [`Session`] ties the channels, the conversation list and the call
//! negotiator together. It is synchronous: inputs are fed in one at a time
//! (commands, store events, transport events, ticks) and the resulting
//! [`SessionEvent`]s are collected for the presentation layer. The tokio
//! actor in [`crate::actor`] drives it; tests drive it directly with
//! [`Session::pump`].

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_media::{CallEvent, CallInfo, CallNegotiator, MediaTransport, TransportEvent};
use parley_shared::constants::{
    ADDED_PREVIEW, APP_NAME, LABEL_NOW, MAX_ATTACHMENT_SIZE, MAX_TEXT_SIZE,
};
use parley_shared::message::time_label;
use parley_shared::{
    CallId, CallKind, Clock, ConversationSummary, Identity, MessageBody, MessageView,
    NegotiationBlob, NegotiationRecord, NodeId, OutgoingMessage, Record, SignalEnvelope,
    SystemClock,
};
use parley_store::{StoreEvent, SubscriptionManager, SyncStore};

use crate::channels::{InboxChannel, MessageChannel, MessageUpdate, SignalChannel};
use crate::config::SessionConfig;
use crate::conversations::ConversationBook;
use crate::error::{Result, SessionError};
use crate::notify::{CallNotice, LogNotifier, Notifier};

const PENDING_KEY: &str = "pending";

/// A call waiting for the local user to answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncomingCall {
    pub from: Identity,
    pub display_name: String,
    pub kind: CallKind,
    pub call_id: CallId,
    /// Caller already has a conversation
    pub known: bool,
}

/// Outbound events for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    Conversations(Vec<ConversationSummary>),
    Messages {
        peer: Identity,
        messages: Vec<MessageView>,
    },
    IncomingCall(IncomingCall),
    /// The caller gave up before the call was answered
    CallCancelled {
        peer: Identity,
    },
    Call(CallEvent),
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub identity: Identity,
    pub conversations: Vec<ConversationSummary>,
    pub call: Option<CallInfo>,
    pub pending: Option<IncomingCall>,
}

pub(crate) enum Input {
    Store(StoreEvent),
    Transport(TransportEvent),
}

pub struct Session {
    identity: Identity,
    display_name: String,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    book: ConversationBook,
    messages: MessageChannel,
    inbox: InboxChannel,
    signals: SignalChannel,
    negotiator: CallNegotiator,
    pending: Option<SignalEnvelope>,
    pending_watch: SubscriptionManager,
    events: Vec<SessionEvent>,
    store_rx: mpsc::UnboundedReceiver<StoreEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Session {
    pub fn new(
        identity: Identity,
        store: Arc<dyn SyncStore>,
        transport: Arc<dyn MediaTransport>,
        config: SessionConfig,
    ) -> Self {
        let (sink, store_rx) = mpsc::unbounded_channel();
        let (transport_sink, transport_rx) = mpsc::unbounded_channel();
        let keys = config.key_space();

        Self {
            display_name: identity.default_display_name(),
            messages: MessageChannel::new(identity.clone(), keys.clone(), store.clone(), sink.clone()),
            inbox: InboxChannel::new(identity.clone(), keys.clone(), store.clone(), sink.clone()),
            signals: SignalChannel::new(
                identity.clone(),
                keys.clone(),
                store.clone(),
                sink.clone(),
                config.freshness_window_ms(),
            ),
            negotiator: CallNegotiator::new(
                identity.clone(),
                keys,
                store.clone(),
                sink.clone(),
                transport,
                transport_sink,
                config.negotiator_config(),
            ),
            pending_watch: SubscriptionManager::new(store, sink),
            identity,
            config,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
            book: ConversationBook::new(),
            pending: None,
            events: Vec::new(),
            store_rx,
            transport_rx,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.display_name = name;
        }
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Conversations known before the session starts.
    pub fn with_conversations(mut self, book: ConversationBook) -> Self {
        self.book = book;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.book.list()
    }

    pub fn call(&self) -> Option<CallInfo> {
        self.negotiator.current_call()
    }

    pub fn messages(&self, peer: &Identity) -> Vec<MessageView> {
        self.messages
            .messages(peer)
            .iter()
            .map(|m| m.view(&self.identity))
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            identity: self.identity.clone(),
            conversations: self.book.list(),
            call: self.negotiator.current_call(),
            pending: self.pending.as_ref().map(|env| self.incoming(env)),
        }
    }

    /// Events produced since the last drain.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Subscribe the inbox, the signal slot and every known room.
    pub fn start(&mut self) -> Result<()> {
        self.inbox.subscribe()?;
        self.signals.subscribe()?;
        let peers: Vec<Identity> = self.book.identities().cloned().collect();
        for peer in &peers {
            self.messages.subscribe(peer)?;
        }
        info!(identity = %self.identity, conversations = peers.len(), "Session started");
        self.emit_conversations();
        Ok(())
    }

    /// Leave any call and release every subscription.
    pub fn shutdown(&mut self) {
        let now = self.now();
        self.negotiator.dispose(now);
        self.flush_call_events();
        self.messages.clear();
        self.inbox.unsubscribe();
        self.signals.unsubscribe();
        self.pending_watch.clear();
        self.pending = None;
        info!(identity = %self.identity, "Session shut down");
    }

    pub fn add_conversation(&mut self, peer: &Identity) -> Result<bool> {
        if peer == &self.identity {
            return Err(SessionError::SelfConversation);
        }
        let created = self.book.ensure(peer, None, ADDED_PREVIEW);
        self.messages.subscribe(peer)?;
        if created {
            debug!(peer = %peer, "Conversation added");
            self.emit_conversations();
        }
        Ok(created)
    }

    /// Append to the shared room, announce to the peer's inbox and refresh
    /// the conversation preview.
    pub fn send_message(&mut self, peer: &Identity, message: OutgoingMessage) -> Result<NodeId> {
        if peer == &self.identity {
            return Err(SessionError::SelfConversation);
        }
        if let MessageBody::Attachment { attachment, .. } = &message.body {
            if attachment.payload.len() > MAX_ATTACHMENT_SIZE {
                return Err(SessionError::AttachmentTooLarge(attachment.payload.len()));
            }
        }
        if message.body.text().len() > MAX_TEXT_SIZE {
            return Err(SessionError::TextTooLarge(message.body.text().len()));
        }

        let now = self.now();
        let preview = message.body.preview();
        self.book.ensure(peer, None, ADDED_PREVIEW);
        self.messages.subscribe(peer)?;

        let node = self.messages.send(peer, message, now)?;
        if let Err(e) = self
            .inbox
            .announce(peer, Some(self.display_name.clone()), now)
        {
            warn!(peer = %peer, error = %e, "Failed to announce to peer inbox");
        }

        self.book.touch(peer, &preview, LABEL_NOW);
        self.emit_conversations();
        Ok(node)
    }

    /// Place a call and tell the peer about it.
    pub fn start_call(&mut self, peer: &Identity, kind: CallKind) -> Result<()> {
        let now = self.now();
        let started =
            self.negotiator
                .start_call(peer, Some(self.display_name.clone()), kind, now);
        self.flush_call_events();
        let envelope = started?;

        self.signals.signal(peer, &envelope)?;

        let notice = format!("Secure {kind} session started. Open {APP_NAME} to join.");
        if let Err(e) = self.send_message(peer, OutgoingMessage::system(notice)) {
            warn!(peer = %peer, error = %e, "Failed to post call notice");
        }

        let notice = CallNotice::compose(&self.display_name, peer, kind);
        if let Err(e) = self.notifier.notify(&notice) {
            warn!(peer = %peer, error = %e, "Call notification failed");
        }
        Ok(())
    }

    pub fn accept_call(&mut self) -> Result<()> {
        let envelope = self.pending.take().ok_or(SessionError::NoPendingCall)?;
        self.pending_watch.clear();

        if self
            .book
            .ensure(&envelope.from, envelope.from_display_name.clone(), ADDED_PREVIEW)
        {
            self.emit_conversations();
        }
        self.messages.subscribe(&envelope.from)?;

        let now = self.now();
        let accepted = self.negotiator.accept(&envelope, now);
        self.flush_call_events();
        accepted?;
        Ok(())
    }

    pub fn decline_call(&mut self) -> Result<()> {
        let envelope = self.pending.take().ok_or(SessionError::NoPendingCall)?;
        self.pending_watch.clear();
        let now = self.now();
        self.negotiator.decline(&envelope, now)?;
        Ok(())
    }

    pub fn hangup(&mut self) -> Result<()> {
        let now = self.now();
        let result = self.negotiator.hangup(now);
        self.flush_call_events();
        Ok(result?)
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.negotiator.set_audio_enabled(enabled);
    }

    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.negotiator.set_video_enabled(enabled);
    }

    /// Route one store delivery to the component that subscribed it.
    pub fn handle_store_event(&mut self, event: StoreEvent) {
        let now = self.now();

        if self.messages.owns(&event) {
            if let Some(update) = self.messages.on_event(&event) {
                self.on_messages(update);
            }
        } else if self.inbox.owns(&event) {
            if let Some(summary) = self.inbox.on_event(&event, &self.book) {
                self.on_discovered(summary);
            }
        } else if self.signals.owns(&event) {
            if let Some(envelope) = self.signals.on_event(&event, now) {
                self.on_incoming(envelope);
            }
        } else if self.negotiator.owns(&event) {
            self.negotiator.on_store_event(&event, now);
            self.flush_call_events();
        } else if self.pending_watch.route(&event).is_some() {
            self.on_pending_exchange(&event);
        } else {
            debug!(path = %event.path, subscription = %event.subscription, "Ignoring event for released subscription");
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        let now = self.now();
        self.negotiator.on_transport_event(event, now);
        self.flush_call_events();
    }

    /// Check call deadlines.
    pub fn tick(&mut self) {
        let now = self.now();
        self.negotiator.tick(now);
        self.flush_call_events();

        let ring_ms = i64::try_from(self.config.ring_timeout.as_millis()).unwrap_or(i64::MAX);
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|env| env.age_ms(now).map_or(true, |age| age >= ring_ms));
        if expired {
            self.cancel_pending();
        }
    }

    /// Handle every queued store and transport event, including the ones
    /// produced while handling. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let input = if let Ok(ev) = self.store_rx.try_recv() {
                Input::Store(ev)
            } else if let Ok(ev) = self.transport_rx.try_recv() {
                Input::Transport(ev)
            } else {
                return handled;
            };
            self.handle_input(input);
            handled += 1;
        }
    }

    pub(crate) async fn next_input(&mut self) -> Option<Input> {
        tokio::select! {
            Some(ev) = self.store_rx.recv() => Some(Input::Store(ev)),
            Some(ev) = self.transport_rx.recv() => Some(Input::Transport(ev)),
            else => None,
        }
    }

    pub(crate) fn handle_input(&mut self, input: Input) {
        match input {
            Input::Store(ev) => self.handle_store_event(ev),
            Input::Transport(ev) => self.handle_transport_event(ev),
        }
    }

    fn on_messages(&mut self, update: MessageUpdate) {
        let Some(last) = update.messages.last() else {
            return;
        };
        let preview = last.body.preview();
        let label = time_label(last.timestamp);

        self.book.ensure(&update.peer, None, &preview);
        self.book.touch(&update.peer, &preview, &label);
        self.emit_conversations();

        let messages = update
            .messages
            .iter()
            .map(|m| m.view(&self.identity))
            .collect();
        self.events.push(SessionEvent::Messages {
            peer: update.peer,
            messages,
        });
    }

    fn on_discovered(&mut self, summary: ConversationSummary) {
        let peer = summary.identity.clone();
        if !self.book.insert(summary) {
            return;
        }
        info!(peer = %peer, "New conversation discovered");
        if let Err(e) = self.messages.subscribe(&peer) {
            warn!(peer = %peer, error = %e, "Failed to subscribe discovered room");
        }
        self.emit_conversations();
    }

    fn on_incoming(&mut self, envelope: SignalEnvelope) {
        if self.negotiator.is_active() {
            debug!(from = %envelope.from, call = %envelope.call_id, "Busy, ignoring incoming call");
            return;
        }

        if let Some(pending) = &self.pending {
            if pending.from != envelope.from {
                debug!(from = %envelope.from, call = %envelope.call_id, ringing = %pending.from, "Already ringing, ignoring incoming call");
                return;
            }
            // Same caller with a new attempt replaces the one still ringing
            self.cancel_pending();
        }

        info!(from = %envelope.from, call = %envelope.call_id, kind = %envelope.kind, "Incoming call");
        self.pending_watch.clear();
        let exchange = self
            .config
            .key_space()
            .call_exchange(&envelope.room_key, &envelope.call_id);
        if let Err(e) = self.pending_watch.add(PENDING_KEY, &exchange) {
            warn!(call = %envelope.call_id, error = %e, "Failed to watch incoming call");
        }

        let incoming = self.incoming(&envelope);
        let auto_accept = self.config.auto_accept_known && incoming.known;
        self.pending = Some(envelope);
        self.events.push(SessionEvent::IncomingCall(incoming));

        if auto_accept {
            if let Err(e) = self.accept_call() {
                warn!(error = %e, "Auto-accept failed");
            }
        }
    }

    /// Hangup from the caller while we have not answered yet.
    fn on_pending_exchange(&mut self, event: &StoreEvent) {
        let Some(pending) = self.pending.as_ref() else {
            return;
        };
        let Ok(record) = NegotiationRecord::from_value(&event.value) else {
            return;
        };
        if record.from == pending.from
            && record.call_id == pending.call_id
            && record.blob == NegotiationBlob::Hangup
        {
            self.cancel_pending();
        }
    }

    fn cancel_pending(&mut self) {
        self.pending_watch.clear();
        if let Some(envelope) = self.pending.take() {
            debug!(from = %envelope.from, call = %envelope.call_id, "Incoming call cancelled");
            self.events.push(SessionEvent::CallCancelled {
                peer: envelope.from,
            });
        }
    }

    fn incoming(&self, envelope: &SignalEnvelope) -> IncomingCall {
        IncomingCall {
            from: envelope.from.clone(),
            display_name: envelope.display_name(),
            kind: envelope.kind,
            call_id: envelope.call_id,
            known: self.book.contains(&envelope.from),
        }
    }

    fn flush_call_events(&mut self) {
        for ev in self.negotiator.drain_events() {
            self.events.push(SessionEvent::Call(ev));
        }
    }

    fn emit_conversations(&mut self) {
        self.events
            .push(SessionEvent::Conversations(self.book.list()));
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_media::LoopbackTransport;
    use parley_shared::{Attachment, ManualClock};
    use parley_store::MemoryStore;

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn session(store: &MemoryStore, who: &str) -> Session {
        let mut s = Session::new(
            id(who),
            Arc::new(store.clone()),
            Arc::new(LoopbackTransport::new()),
            SessionConfig::default(),
        )
        .with_clock(Arc::new(ManualClock::new(1_000)));
        s.start().unwrap();
        s.drain_events();
        s
    }

    #[test]
    fn test_start_subscribes_known_rooms() {
        let store = MemoryStore::new();
        let mut book = ConversationBook::new();
        book.ensure(&id("bob@y"), None, "p");
        book.ensure(&id("carol@z"), None, "p");

        let mut s = Session::new(
            id("alice@x"),
            Arc::new(store.clone()),
            Arc::new(LoopbackTransport::new()),
            SessionConfig::default(),
        )
        .with_conversations(book);
        s.start().unwrap();

        // inbox + signal + two rooms
        assert_eq!(store.subscriber_count(), 4);
        assert!(matches!(s.drain_events().as_slice(), [SessionEvent::Conversations(list)] if list.len() == 2));

        s.shutdown();
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_self_conversation_rejected() {
        let store = MemoryStore::new();
        let mut s = session(&store, "alice@x");
        assert!(matches!(
            s.add_conversation(&id("alice@x")),
            Err(SessionError::SelfConversation)
        ));
        assert!(matches!(
            s.send_message(&id("alice@x"), OutgoingMessage::text("hi")),
            Err(SessionError::SelfConversation)
        ));
    }

    #[test]
    fn test_oversized_attachment_rejected() {
        let store = MemoryStore::new();
        let mut s = session(&store, "alice@x");
        let attachment = Attachment {
            name: "scan.png".into(),
            mime_type: "image/png".into(),
            payload: "x".repeat(MAX_ATTACHMENT_SIZE + 1),
        };
        let err = s
            .send_message(&id("bob@y"), OutgoingMessage::attachment("", attachment))
            .unwrap_err();
        assert!(matches!(err, SessionError::AttachmentTooLarge(_)));
        assert!(s.conversations().is_empty());
    }

    #[test]
    fn test_oversized_text_rejected() {
        let store = MemoryStore::new();
        let mut s = session(&store, "alice@x");
        let err = s
            .send_message(&id("bob@y"), OutgoingMessage::text("x".repeat(MAX_TEXT_SIZE + 1)))
            .unwrap_err();
        assert!(matches!(err, SessionError::TextTooLarge(_)));
        assert!(s.conversations().is_empty());
        assert!(s.messages(&id("bob@y")).is_empty());
    }

    #[test]
    fn test_add_conversation_is_idempotent() {
        let store = MemoryStore::new();
        let mut s = session(&store, "alice@x");
        assert!(s.add_conversation(&id("bob@y")).unwrap());
        assert!(!s.add_conversation(&id("bob@y")).unwrap());
        let list = s.conversations();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].last_message_preview, ADDED_PREVIEW);
    }

    #[test]
    fn test_answer_without_pending_call() {
        let store = MemoryStore::new();
        let mut s = session(&store, "alice@x");
        assert!(matches!(s.accept_call(), Err(SessionError::NoPendingCall)));
        assert!(matches!(s.decline_call(), Err(SessionError::NoPendingCall)));
    }
}
