//! Session configuration loaded from environment variables.
//!
//! Every setting has a default, so a session can start with no
//! configuration at all.

use std::time::Duration;

use parley_media::NegotiatorConfig;
use parley_shared::channel_key::is_valid_namespace;
use parley_shared::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_FRESHNESS_WINDOW_MS, DEFAULT_NAMESPACE,
    DEFAULT_RING_TIMEOUT_SECS, DEFAULT_UNREACHABLE_TIMEOUT_SECS, PROTOCOL_VERSION,
};
use parley_shared::KeySpace;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deployment namespace embedded in every store path.
    /// Env: `PARLEY_NAMESPACE`
    /// Default: `parley`
    pub namespace: String,

    /// Protocol version token embedded in every store path.
    /// Env: `PARLEY_PROTOCOL_VERSION`
    /// Default: `1`
    pub protocol_version: u32,

    /// Maximum age of a call signal.
    /// Env: `PARLEY_SIGNAL_FRESHNESS_MS`
    /// Default: 20 s
    pub freshness_window: Duration,

    /// Env: `PARLEY_RING_TIMEOUT_SECS`
    /// Default: 45 s
    pub ring_timeout: Duration,

    /// Env: `PARLEY_UNREACHABLE_TIMEOUT_SECS`
    /// Default: 30 s
    pub unreachable_timeout: Duration,

    /// Env: `PARLEY_CONNECT_TIMEOUT_SECS`
    /// Default: 20 s
    pub connect_timeout: Duration,

    /// Pick up calls from known conversations without asking.
    /// Env: `PARLEY_AUTO_ACCEPT` (true/false)
    /// Default: `false`
    pub auto_accept_known: bool,

    /// How often call deadlines are checked.
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            protocol_version: PROTOCOL_VERSION,
            freshness_window: Duration::from_millis(DEFAULT_FRESHNESS_WINDOW_MS as u64),
            ring_timeout: Duration::from_secs(DEFAULT_RING_TIMEOUT_SECS),
            unreachable_timeout: Duration::from_secs(DEFAULT_UNREACHABLE_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            auto_accept_known: false,
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`SessionConfig::from_env`] with an arbitrary variable source.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ns) = lookup("PARLEY_NAMESPACE") {
            let ns = ns.trim();
            if !is_valid_namespace(ns) {
                tracing::warn!(value = %ns, "Invalid PARLEY_NAMESPACE, using default");
            } else {
                config.namespace = ns.to_string();
            }
        }

        if let Some(val) = lookup("PARLEY_PROTOCOL_VERSION") {
            match val.trim().parse::<u32>() {
                Ok(v) => config.protocol_version = v,
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid PARLEY_PROTOCOL_VERSION, using default")
                }
            }
        }

        if let Some(val) = lookup("PARLEY_SIGNAL_FRESHNESS_MS") {
            match val.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.freshness_window = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid PARLEY_SIGNAL_FRESHNESS_MS, using default"),
            }
        }

        for (key, slot) in [
            ("PARLEY_RING_TIMEOUT_SECS", &mut config.ring_timeout),
            ("PARLEY_UNREACHABLE_TIMEOUT_SECS", &mut config.unreachable_timeout),
            ("PARLEY_CONNECT_TIMEOUT_SECS", &mut config.connect_timeout),
        ] {
            if let Some(val) = lookup(key) {
                match val.trim().parse::<u64>() {
                    Ok(secs) if secs > 0 => *slot = Duration::from_secs(secs),
                    _ => tracing::warn!(key, value = %val, "Invalid timeout, using default"),
                }
            }
        }

        if let Some(val) = lookup("PARLEY_AUTO_ACCEPT") {
            config.auto_accept_known = val == "true" || val == "1";
        }

        config
    }

    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(&self.namespace, self.protocol_version)
    }

    pub fn negotiator_config(&self) -> NegotiatorConfig {
        NegotiatorConfig {
            ring_timeout: self.ring_timeout,
            unreachable_timeout: self.unreachable_timeout,
            connect_timeout: self.connect_timeout,
        }
    }

    pub fn freshness_window_ms(&self) -> i64 {
        i64::try_from(self.freshness_window.as_millis()).unwrap_or(i64::MAX)
    }
}
