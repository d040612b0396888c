//! Session actor with the tokio mpsc command/event pattern.
//!
//! The [`Session`] runs in its own task. The application sends
//! [`SessionCommand`]s through a [`SessionHandle`] and receives
//! [`SessionEvent`]s on the returned channel. Store events, transport
//! events and deadline ticks are handled in the same loop, one at a time.

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use parley_shared::{Attachment, CallKind, Identity, OutgoingMessage};

use crate::error::{Result, SessionError};
use crate::session::{Session, SessionEvent, SessionSnapshot};

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum SessionCommand {
    AddConversation(Identity),
    SendMessage {
        peer: Identity,
        text: String,
        attachment: Option<Attachment>,
    },
    StartCall {
        peer: Identity,
        kind: CallKind,
    },
    AcceptCall,
    DeclineCall,
    Hangup,
    SetAudio(bool),
    SetVideo(bool),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// Cloneable sender side of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| SessionError::Closed)
    }

    pub async fn add_conversation(&self, peer: Identity) -> Result<()> {
        self.send(SessionCommand::AddConversation(peer)).await
    }

    pub async fn send_message(&self, peer: Identity, text: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::SendMessage {
            peer,
            text: text.into(),
            attachment: None,
        })
        .await
    }

    pub async fn start_call(&self, peer: Identity, kind: CallKind) -> Result<()> {
        self.send(SessionCommand::StartCall { peer, kind }).await
    }

    pub async fn accept_call(&self) -> Result<()> {
        self.send(SessionCommand::AcceptCall).await
    }

    pub async fn decline_call(&self) -> Result<()> {
        self.send(SessionCommand::DeclineCall).await
    }

    pub async fn hangup(&self) -> Result<()> {
        self.send(SessionCommand::Hangup).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(reply_tx)).await?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown).await
    }
}

/// Start `session` and run it in a background task.
///
/// Returns the command handle and the receiver of presentation events.
/// Dropping every handle shuts the session down.
pub fn spawn_session(
    mut session: Session,
) -> Result<(SessionHandle, mpsc::Receiver<SessionEvent>)> {
    session.start()?;

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SessionCommand>(256);
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(256);
    let tick_every = session.config().tick_interval;

    tokio::spawn(async move {
        let mut ticker = interval(tick_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(identity = %session.identity(), "Session task started");

        forward(&mut session, &event_tx).await;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Shutdown) | None => {
                            session.shutdown();
                            forward(&mut session, &event_tx).await;
                            break;
                        }
                        Some(cmd) => execute(&mut session, cmd),
                    }
                }

                input = session.next_input() => {
                    if let Some(input) = input {
                        session.handle_input(input);
                    }
                }

                _ = ticker.tick() => session.tick(),
            }

            forward(&mut session, &event_tx).await;
        }

        info!("Session task terminated");
    });

    Ok((SessionHandle { tx: cmd_tx }, event_rx))
}

fn execute(session: &mut Session, cmd: SessionCommand) {
    let result = match cmd {
        SessionCommand::AddConversation(peer) => session.add_conversation(&peer).map(|_| ()),
        SessionCommand::SendMessage {
            peer,
            text,
            attachment,
        } => {
            let message = match attachment {
                Some(att) => OutgoingMessage::attachment(text, att),
                None => OutgoingMessage::text(text),
            };
            session.send_message(&peer, message).map(|_| ())
        }
        SessionCommand::StartCall { peer, kind } => session.start_call(&peer, kind),
        SessionCommand::AcceptCall => session.accept_call(),
        SessionCommand::DeclineCall => session.decline_call(),
        SessionCommand::Hangup => session.hangup(),
        SessionCommand::SetAudio(enabled) => {
            session.set_audio_enabled(enabled);
            Ok(())
        }
        SessionCommand::SetVideo(enabled) => {
            session.set_video_enabled(enabled);
            Ok(())
        }
        SessionCommand::Snapshot(reply) => {
            let _ = reply.send(session.snapshot());
            Ok(())
        }
        // Handled by the loop
        SessionCommand::Shutdown => Ok(()),
    };

    if let Err(e) = result {
        warn!(error = %e, "Session command failed");
    }
}

async fn forward(session: &mut Session, event_tx: &mpsc::Sender<SessionEvent>) {
    for event in session.drain_events() {
        if event_tx.send(event).await.is_err() {
            debug!("Event receiver dropped");
            return;
        }
    }
}
