//! Cluster identity

use epidemic_core::NodeId;

/// This node's identity and the cluster membership, as delivered by `init`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    /// Our node id
    pub node_id: NodeId,
    /// Every node in the cluster, including us
    pub node_ids: Vec<NodeId>,
}

impl Cluster {
    pub fn new(node_id: NodeId, node_ids: Vec<NodeId>) -> Self {
        Self { node_id, node_ids }
    }

    /// Check whether a node is a cluster member
    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_ids.contains(id)
    }
}
