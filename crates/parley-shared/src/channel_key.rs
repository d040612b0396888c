//! Deterministic path naming for every channel in the shared graph.
//!
//! Two identities always map to the same room key regardless of which side
//! computes it. Prefixes carry a namespace and a protocol version token so
//! that incompatible deployments sharing one relay never read each other's
//! data.

use crate::constants::{DEFAULT_NAMESPACE, PAIR_SEPARATOR, PROTOCOL_VERSION};
use crate::types::{CallId, Identity};

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
///
/// The output never contains [`PAIR_SEPARATOR`] or the path separator `/`.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A namespace is one or more ASCII letters, digits or `-`.
pub fn is_valid_namespace(ns: &str) -> bool {
    !ns.is_empty() && ns.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Derive the symmetric key for the pair `(a, b)` under `prefix`.
///
/// `derive_key(p, a, b) == derive_key(p, b, a)` for all inputs. Distinct
/// normalised pairs never produce the same key because the separator cannot
/// occur inside a normalised identity.
pub fn derive_key(prefix: &str, a: &Identity, b: &Identity) -> String {
    let na = a.normalized();
    let nb = b.normalized();
    let (lo, hi) = if na <= nb { (na, nb) } else { (nb, na) };
    format!("{prefix}{lo}{PAIR_SEPARATOR}{hi}")
}

/// Channel kinds that get their own prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Messages,
    Call,
    Inbox,
    Signal,
}

impl ChannelKind {
    fn token(self) -> &'static str {
        match self {
            ChannelKind::Messages => "msg",
            ChannelKind::Call => "call",
            ChannelKind::Inbox => "inbox",
            ChannelKind::Signal => "signal",
        }
    }
}

/// Builds all store paths for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
    version: u32,
}

impl KeySpace {
    pub fn new(namespace: &str, version: u32) -> Self {
        Self {
            namespace: normalize(namespace),
            version,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn prefix(&self, kind: ChannelKind) -> String {
        format!("{}_{}_v{}_", self.namespace, kind.token(), self.version)
    }

    /// Shared append-only message log for a pair.
    pub fn message_room(&self, a: &Identity, b: &Identity) -> String {
        derive_key(&self.prefix(ChannelKind::Messages), a, b)
    }

    /// Room under which call negotiation logs for a pair live.
    pub fn call_room(&self, a: &Identity, b: &Identity) -> String {
        derive_key(&self.prefix(ChannelKind::Call), a, b)
    }

    /// Per-call exchange log inside a call room.
    pub fn call_exchange(&self, room_key: &str, call_id: &CallId) -> String {
        format!("{room_key}/{call_id}")
    }

    /// Inbox owned (read) by `owner`; peers append announces to it.
    pub fn inbox(&self, owner: &Identity) -> String {
        format!("{}{}", self.prefix(ChannelKind::Inbox), owner.normalized())
    }

    /// Last-write-wins call slot owned (read) by `owner`.
    pub fn signal(&self, owner: &Identity) -> String {
        format!("{}{}", self.prefix(ChannelKind::Signal), owner.normalized())
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE, PROTOCOL_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    #[test]
    fn test_namespace_validation() {
        assert!(is_valid_namespace("parley"));
        assert!(is_valid_namespace("clinic-2"));
        assert!(!is_valid_namespace(""));
        assert!(!is_valid_namespace("bad space"));
        assert!(!is_valid_namespace("a/b"));
        assert!(!is_valid_namespace("a_b"));
    }

    #[test]
    fn test_derive_key_symmetric() {
        let pairs = [
            ("alice@x", "bob@y"),
            ("b@y", "a@x"),
            ("same@z", "same@z"),
            ("Zed@q.org", "abe@q.org"),
            ("x_y", "x-y"),
        ];
        for (a, b) in pairs {
            let (a, b) = (id(a), id(b));
            assert_eq!(derive_key("p_", &a, &b), derive_key("p_", &b, &a));
        }
    }

    #[test]
    fn test_derive_key_shape() {
        let key = derive_key("parley_msg_v1_", &id("b@y.com"), &id("a@x.com"));
        assert_eq!(key, "parley_msg_v1_a_x_com+b_y_com");
    }

    #[test]
    fn test_separator_prevents_collisions() {
        // "x_y" + "z" and "x" + "y_z" would collide with an underscore joint
        let k1 = derive_key("p_", &id("x_y"), &id("z"));
        let k2 = derive_key("p_", &id("x"), &id("y_z"));
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_version_isolates_deployments() {
        let a = id("a@x");
        let b = id("b@y");
        let v1 = KeySpace::new("parley", 1);
        let v2 = KeySpace::new("parley", 2);
        assert_ne!(v1.message_room(&a, &b), v2.message_room(&a, &b));
        assert_ne!(v1.signal(&a), v2.signal(&a));
    }

    #[test]
    fn test_kinds_do_not_overlap() {
        let ks = KeySpace::default();
        let a = id("a@x");
        let b = id("b@y");
        assert_ne!(ks.message_room(&a, &b), ks.call_room(&a, &b));
        assert_ne!(ks.inbox(&a), ks.signal(&a));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a.b@c-d_e"), "a_b_c-d_e");
        assert_eq!(normalize("ü+/"), "___");
    }
}
