//! Request handlers for `broadcast`, `read`, `topology` and `sync`

use crate::store::MessageStore;
use crate::topology::TopologyTable;
use epidemic_core::protocol::{Reply, Request};
use epidemic_core::{Envelope, NodeId, Result, Value};
use epidemic_net::Node;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Message types served by [`Handlers`]
pub const REQUEST_TYPES: [&str; 4] = ["broadcast", "read", "topology", "sync"];

/// Request handlers over the shared store and topology
pub struct Handlers {
    store: Arc<MessageStore>,
    topology: Arc<TopologyTable>,
}

impl Handlers {
    pub fn new(store: Arc<MessageStore>, topology: Arc<TopologyTable>) -> Self {
        Self { store, topology }
    }

    /// Register for every request type on the node
    pub fn register(self: Arc<Self>, node: &Node) {
        for kind in REQUEST_TYPES {
            let handlers = self.clone();
            node.handle(kind, move |node, request| handlers.handle(node, request));
        }
    }

    /// Decode and serve one request
    pub fn handle(&self, node: &Node, request: &Envelope) -> Result<()> {
        match request.body.decode::<Request>()? {
            Request::Broadcast { message } => self.broadcast(node, request, message),
            Request::Read => self.read(node, request),
            Request::Topology { topology } => self.install_topology(node, request, topology),
            Request::Sync { messages } => self.sync(node, request, messages),
        }
    }

    fn broadcast(&self, node: &Node, request: &Envelope, message: Value) -> Result<()> {
        if self.store.add(message) {
            debug!("Accepted {} from {}", message, request.src);
        }
        node.reply(request, &Reply::BroadcastOk)
    }

    fn read(&self, node: &Node, request: &Envelope) -> Result<()> {
        node.reply(
            request,
            &Reply::ReadOk {
                messages: self.store.snapshot(),
            },
        )
    }

    fn install_topology(
        &self,
        node: &Node,
        request: &Envelope,
        mut topology: HashMap<NodeId, Vec<NodeId>>,
    ) -> Result<()> {
        let me = node.id()?;
        let adjacency = topology.remove(&me).unwrap_or_else(|| {
            warn!("Topology has no entry for {}, gossip disabled", me);
            Vec::new()
        });
        let neighbors: Vec<NodeId> = adjacency.into_iter().filter(|n| *n != me).collect();

        if let Some(cluster) = node.cluster() {
            for neighbor in neighbors.iter().filter(|n| !cluster.contains(n)) {
                warn!("Neighbor {} is not a cluster member, pushes to it will fail", neighbor);
            }
        }

        let change = self.topology.install(neighbors);
        if change.is_empty() {
            debug!("Topology unchanged");
        } else {
            info!(
                "Installed topology: neighbors {:?} (added {:?}, removed {:?})",
                self.topology.neighbors(),
                change.added,
                change.removed
            );
        }

        node.reply(request, &Reply::TopologyOk)
    }

    fn sync(&self, node: &Node, request: &Envelope, messages: Vec<Value>) -> Result<()> {
        let received = messages.len();
        let new = self.store.add_all(messages);
        if new > 0 {
            debug!("Merged {} of {} values from {}", new, received, request.src);
        }
        node.reply(request, &Reply::SyncOk)
    }
}
