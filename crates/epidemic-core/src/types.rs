//! Core identifier and value types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message identifier, unique per sending node
pub type MsgId = u64;

/// A broadcast value. Only equality and hashing matter to the protocol.
pub type Value = i64;

/// Node identifier as assigned by `init` (e.g. `n1`, or `c4` for clients)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Client ids use the `c` prefix; server nodes use `n`
    pub fn is_client(&self) -> bool {
        self.0.starts_with('c')
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_node_id_as_map_key() {
        let topology: HashMap<NodeId, Vec<NodeId>> =
            serde_json::from_str(r#"{"n1":["n2","n3"],"n2":["n1"]}"#).unwrap();

        assert_eq!(topology[&NodeId::from("n1")].len(), 2);
        assert_eq!(topology[&NodeId::from("n2")], vec![NodeId::from("n1")]);
    }

    #[test]
    fn test_client_prefix() {
        assert!(NodeId::from("c12").is_client());
        assert!(!NodeId::from("n1").is_client());
    }
}
