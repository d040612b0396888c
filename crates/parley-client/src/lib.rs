//! # parley-client
//!
//! Everything one participant runs: the message, inbox and signal channels,
//! the conversation list, the session coordinator and its tokio actor.

pub mod actor;
pub mod channels;
pub mod config;
pub mod conversations;
pub mod error;
pub mod notify;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use actor::{spawn_session, SessionCommand, SessionHandle};
pub use config::SessionConfig;
pub use conversations::ConversationBook;
pub use error::{Result, SessionError};
pub use notify::{CallNotice, LogNotifier, Notifier};
pub use session::{IncomingCall, Session, SessionEvent, SessionSnapshot};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parley_client=debug,parley_media=debug,parley_net=info,parley_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
