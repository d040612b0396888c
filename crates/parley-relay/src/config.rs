//! Relay configuration loaded from environment variables.
//!
//! All settings have defaults so a relay can start with zero configuration
//! for local development.

use std::path::PathBuf;
use std::time::Duration;

use libp2p::Multiaddr;

use parley_net::{parse_multiaddrs, SwarmConfig};
use parley_shared::channel_key::is_valid_namespace;
use parley_shared::constants::{DEFAULT_NAMESPACE, DEFAULT_QUIC_PORT, PROTOCOL_VERSION};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// QUIC port.
    /// Env: `LISTEN_PORT`
    /// Default: `4101`
    pub listen_port: u16,

    /// File of other relays to peer with, one multiaddr per line.
    /// Env: `BOOTSTRAP_PEERS`
    /// Default: none
    pub bootstrap_peers_path: Option<PathBuf>,

    /// Comma-separated multiaddrs dialled on startup.
    /// Env: `EXTRA_DIALS`
    pub extra_dials: Vec<Multiaddr>,

    /// Env: `PARLEY_NAMESPACE`
    /// Default: `parley`
    pub namespace: String,

    /// Env: `PARLEY_PROTOCOL_VERSION`
    /// Default: `1`
    pub protocol_version: u32,

    /// How often replica statistics are logged.
    /// Env: `STATS_INTERVAL_SECS`
    /// Default: 60 s
    pub stats_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_QUIC_PORT,
            bootstrap_peers_path: None,
            extra_dials: Vec::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            protocol_version: PROTOCOL_VERSION,
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("LISTEN_PORT") {
            match val.trim().parse::<u16>() {
                Ok(port) => config.listen_port = port,
                Err(_) => tracing::warn!(value = %val, "Invalid LISTEN_PORT, using default"),
            }
        }

        if let Some(path) = lookup("BOOTSTRAP_PEERS") {
            if !path.trim().is_empty() {
                config.bootstrap_peers_path = Some(PathBuf::from(path.trim()));
            }
        }

        if let Some(list) = lookup("EXTRA_DIALS") {
            let raw: Vec<&str> = list.split(',').collect();
            config.extra_dials = parse_multiaddrs(&raw);
        }

        if let Some(ns) = lookup("PARLEY_NAMESPACE") {
            let ns = ns.trim();
            if is_valid_namespace(ns) {
                config.namespace = ns.to_string();
            } else {
                tracing::warn!(value = %ns, "Invalid PARLEY_NAMESPACE, using default");
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

        if let Some(val) = lookup("STATS_INTERVAL_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.stats_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid STATS_INTERVAL_SECS, using default"),
            }
        }

        config
    }

    pub fn swarm_config(&self) -> SwarmConfig {
        SwarmConfig {
            bootstrap_peers_path: self.bootstrap_peers_path.clone(),
            listen_port: self.listen_port,
            extra_dials: self.extra_dials.clone(),
            namespace: self.namespace.clone(),
            protocol_version: self.protocol_version,
        }
    }
}
