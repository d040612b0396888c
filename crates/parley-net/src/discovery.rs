//! Bootstrap peer loading.
//!
//! Relay and replica addresses come from a file with one multiaddr per line,
//! or from a list given at runtime. Malformed entries are logged and skipped.

use std::fs;
use std::path::Path;

use libp2p::Multiaddr;
use tracing::{debug, info, warn};

/// Load bootstrap multiaddrs from `path`.
///
/// Empty lines and lines starting with `#` are ignored. A missing or
/// unreadable file yields an empty list.
///
/// ```text
/// # Parley relays
/// /ip4/198.51.100.10/udp/4101/quic-v1/p2p/12D3KooW...
/// ```
pub fn load_bootstrap_peers(path: &Path) -> Vec<Multiaddr> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read bootstrap peers file");
            return Vec::new();
        }
    };

    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    let addrs = parse_multiaddrs(&lines);

    info!(count = addrs.len(), path = %path.display(), "Loaded bootstrap peers");
    addrs
}

pub fn parse_multiaddrs<S: AsRef<str>>(raw: &[S]) -> Vec<Multiaddr> {
    raw.iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<Multiaddr>() {
            Ok(addr) => {
                debug!(addr = %addr, "Loaded bootstrap peer");
                Some(addr)
            }
            Err(e) => {
                warn!(addr = %s, error = %e, "Skipping invalid multiaddr");
                None
            }
        })
        .collect()
}
