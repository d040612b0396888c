//! Out-of-band call notification.
//!
//! When a call starts the callee may not have Parley open, so the session
//! hands a [`CallNotice`] to a [`Notifier`]. The default one only logs;
//! front ends can open [`CallNotice::mailto_url`] or send the notice through
//! any other channel. A failed notification never affects the call.

use parley_shared::constants::APP_NAME;
use parley_shared::{CallKind, Identity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallNotice {
    pub to: Identity,
    pub subject: String,
    pub body: String,
}

impl CallNotice {
    pub fn compose(from_name: &str, to: &Identity, kind: CallKind) -> Self {
        Self {
            to: to.clone(),
            subject: format!("Secure {kind} call from {from_name}"),
            body: format!(
                "Hello, {from_name} has started a secure {kind} session. \
                 Please open {APP_NAME} to join."
            ),
        }
    }

    /// `mailto:` link with percent-encoded address, subject and body.
    pub fn mailto_url(&self) -> String {
        format!(
            "mailto:{}?subject={}&body={}",
            encode_component(self.to.as_str()),
            encode_component(&self.subject),
            encode_component(&self.body)
        )
    }
}

/// Percent-encode everything except the URI-component unreserved set.
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &CallNotice) -> anyhow::Result<()>;
}

/// Writes the notice to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &CallNotice) -> anyhow::Result<()> {
        tracing::info!(
            to = %notice.to,
            subject = %notice.subject,
            link = %notice.mailto_url(),
            "Call notice"
        );
        Ok(())
    }
}
