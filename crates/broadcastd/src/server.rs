//! broadcastd server - wires the node runtime, handlers and gossip loop

use crate::config::Config;
use crate::gossip::{GossipEngine, GossipStats};
use crate::handlers::Handlers;
use crate::store::MessageStore;
use crate::topology::TopologyTable;
use epidemic_net::{Node, NodeError};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{error, info};

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Node error: {0}")]
    Node(#[from] NodeError),
}

/// Server state
pub struct Server {
    config: Config,
    node: Arc<Node>,
    store: Arc<MessageStore>,
    topology: Arc<TopologyTable>,
    gossip: Arc<GossipEngine>,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let node = Arc::new(Node::new(config.rpc_timeout()));
        let store = Arc::new(MessageStore::new());
        let topology = Arc::new(TopologyTable::new());

        Arc::new(Handlers::new(store.clone(), topology.clone())).register(&node);

        let gossip = Arc::new(GossipEngine::new(
            store.clone(),
            topology.clone(),
            config.gossip_interval(),
            config.max_sync_values,
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            node,
            store,
            topology,
            gossip,
            shutdown_tx,
        })
    }

    /// Run until the input stream closes or `shutdown` is called
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!(
            "Starting broadcastd (gossip every {:?}, rpc timeout {:?}, {} values per push)",
            self.config.gossip_interval(),
            self.config.rpc_timeout(),
            self.config.max_sync_values
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let gossip_handle = self
            .gossip
            .clone()
            .spawn(self.node.clone(), self.shutdown_tx.subscribe());

        let result = tokio::select! {
            result = self.node.clone().run(reader, writer) => {
                info!("Input closed");
                result.map_err(ServerError::from)
            }
            _ = shutdown_rx.recv() => {
                info!("Shutting down...");
                Ok(())
            }
        };

        // Stop the gossip loop
        let _ = self.shutdown_tx.send(());
        if let Err(e) = gossip_handle.await {
            error!("Gossip task failed: {}", e);
        }

        let stats = self.stats();
        info!(
            "Stopped with {} values, {} neighbors, {} pushes ({} acknowledged, {} failed)",
            stats.value_count,
            stats.neighbor_count,
            stats.gossip.pushes,
            stats.gossip.acks,
            stats.gossip.failures
        );

        result
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn topology(&self) -> &Arc<TopologyTable> {
        &self.topology
    }

    /// Get server statistics
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            value_count: self.store.len(),
            neighbor_count: self.topology.stats().neighbors,
            pending_rpcs: self.node.pending_rpcs(),
            gossip: self.gossip.stats(),
        }
    }
}

/// Server statistics
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub value_count: usize,
    pub neighbor_count: usize,
    pub pending_rpcs: usize,
    pub gossip: GossipStats,
}
