//! Typed message payloads
//!
//! Each enum is internally tagged on `type` so it maps onto [`Body`] through
//! [`Body::encode`] and [`Body::decode`].
//!
//! [`Body`]: crate::message::Body
//! [`Body::encode`]: crate::message::Body::encode
//! [`Body::decode`]: crate::message::Body::decode

use crate::error::ErrorCode;
use crate::types::{NodeId, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Runtime-level messages handled by the node itself
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Control {
    /// Assigns this node its id and the cluster membership
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    InitOk,
    Error {
        code: ErrorCode,
        #[serde(default)]
        text: String,
    },
}

/// Broadcast requests
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Client submits a value
    Broadcast { message: Value },
    /// Client asks for every value seen so far
    Read,
    /// Operator installs the gossip graph
    Topology {
        topology: HashMap<NodeId, Vec<NodeId>>,
    },
    /// Peer pushes values it believes we lack
    Sync { messages: Vec<Value> },
}

/// Broadcast replies
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    BroadcastOk,
    ReadOk { messages: Vec<Value> },
    TopologyOk,
    SyncOk,
}
