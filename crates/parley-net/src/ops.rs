//! Graph operations as they travel on the gossipsub topic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_shared::constants::MAX_OP_SIZE;
use parley_shared::types::NodeId;
use parley_store::{GraphEntry, Stamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphOp {
    /// Last-write-wins slot write.
    Put {
        path: String,
        value: Value,
        stamp: Stamp,
    },
    /// New child of an append log.
    Append {
        path: String,
        node: NodeId,
        value: Value,
    },
    /// Ask peers to republish what they hold for `path`.
    SyncRequest { path: String },
}

impl GraphOp {
    pub fn from_entry(path: &str, entry: GraphEntry) -> Self {
        match entry {
            GraphEntry::Slot { value, stamp } => GraphOp::Put {
                path: path.to_string(),
                value,
                stamp,
            },
            GraphEntry::Child { node, value } => GraphOp::Append {
                path: path.to_string(),
                node,
                value,
            },
        }
    }

    pub fn path(&self) -> &str {
        match self {
            GraphOp::Put { path, .. }
            | GraphOp::Append { path, .. }
            | GraphOp::SyncRequest { path } => path,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GraphOp::Put { .. } => "put",
            GraphOp::Append { .. } => "append",
            GraphOp::SyncRequest { .. } => "sync_request",
        }
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_OP_SIZE {
            anyhow::bail!("Graph op too large: {} bytes (max {MAX_OP_SIZE})", bytes.len());
        }
        Ok(bytes)
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        if data.len() > MAX_OP_SIZE {
            anyhow::bail!("Graph op too large: {} bytes (max {MAX_OP_SIZE})", data.len());
        }
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let op = GraphOp::Append {
            path: "room".into(),
            node: NodeId::from("n1"),
            value: json!({"text": "hi"}),
        };
        let wire: Value = serde_json::from_slice(&op.to_bytes().unwrap()).unwrap();
        assert_eq!(wire["op"], "append");
        assert_eq!(wire["node"], "n1");
        assert_eq!(GraphOp::from_bytes(&op.to_bytes().unwrap()).unwrap(), op);
    }

    #[test]
    fn test_oversized_op_rejected() {
        let op = GraphOp::Put {
            path: "slot".into(),
            value: json!("x".repeat(MAX_OP_SIZE)),
            stamp: Stamp {
                millis: 1,
                seq: 1,
                writer: "w".into(),
            },
        };
        assert!(op.to_bytes().is_err());
        assert!(GraphOp::from_bytes(&vec![b' '; MAX_OP_SIZE + 1]).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(GraphOp::from_bytes(b"not json").is_err());
        assert!(GraphOp::from_bytes(br#"{"op":"delete","path":"x"}"#).is_err());
    }

    #[test]
    fn test_from_entry() {
        let op = GraphOp::from_entry(
            "inbox",
            GraphEntry::Child {
                node: NodeId::from("a"),
                value: json!(1),
            },
        );
        assert_eq!(op.path(), "inbox");
        assert_eq!(op.label(), "append");
    }
}
