//! Anti-entropy gossip
//!
//! Every interval, each neighbor is sent the values we hold that it is not
//! yet known to hold. An acknowledged push marks exactly the pushed values as
//! known; a failed or timed-out push changes nothing, so those values are
//! simply part of the next round's delta.

use crate::store::MessageStore;
use crate::topology::TopologyTable;
use epidemic_core::protocol::Request;
use epidemic_core::{Error, NodeId, Result, Value};
use epidemic_net::Node;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, trace};

/// Completion of a push: `Ok` once the neighbor acknowledged it
pub type PushCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Outbound side of gossip
pub trait SyncTransport: Send + Sync {
    /// Push values to a neighbor without waiting; `done` runs exactly once
    fn push(&self, to: &NodeId, values: Vec<Value>, done: PushCallback);
}

impl SyncTransport for Node {
    fn push(&self, to: &NodeId, values: Vec<Value>, done: PushCallback) {
        self.rpc(to, &Request::Sync { messages: values }, move |reply| {
            done(reply.and_then(|envelope| match envelope.body.kind.as_str() {
                "sync_ok" => Ok(()),
                other => Err(Error::UnexpectedReply(other.to_owned())),
            }))
        });
    }
}

/// Gossip state for one neighbor
#[derive(Debug, Clone, Default)]
pub struct PeerSyncState {
    /// Pushes issued
    pub pushes: u64,
    /// Pushes acknowledged
    pub acks: u64,
    /// Pushes that failed or timed out
    pub failures: u64,
    /// Failures since the last acknowledgment
    pub consecutive_failures: u32,
    /// Last acknowledgment
    pub last_ack: Option<Instant>,
}

/// Gossip engine
pub struct GossipEngine {
    store: Arc<MessageStore>,
    topology: Arc<TopologyTable>,
    /// Per-neighbor push accounting
    peers: Arc<RwLock<HashMap<NodeId, PeerSyncState>>>,
    /// Round interval
    interval: Duration,
    /// Maximum values per push
    max_batch: usize,
}

impl GossipEngine {
    pub fn new(
        store: Arc<MessageStore>,
        topology: Arc<TopologyTable>,
        interval: Duration,
        max_batch: usize,
    ) -> Self {
        Self {
            store,
            topology,
            peers: Arc::new(RwLock::new(HashMap::new())),
            interval,
            max_batch: max_batch.max(1),
        }
    }

    /// Run one round; returns the number of pushes issued
    pub fn run_round<T: SyncTransport + ?Sized>(&self, transport: &T) -> usize {
        let neighbors = self.topology.neighbors();
        if neighbors.is_empty() {
            return 0;
        }

        let snapshot = self.store.snapshot();
        let mut pushes = 0;

        for neighbor in neighbors {
            let mut delta = self.topology.delta(&neighbor, snapshot.iter().copied());
            if delta.is_empty() {
                continue;
            }
            let remaining = delta.len().saturating_sub(self.max_batch);
            delta.truncate(self.max_batch);

            trace!(
                "Pushing {} values to {} ({} deferred)",
                delta.len(),
                neighbor,
                remaining
            );
            self.peers
                .write()
                .entry(neighbor.clone())
                .or_default()
                .pushes += 1;

            let topology = self.topology.clone();
            let peers = self.peers.clone();
            let sent = delta.clone();
            let to = neighbor.clone();
            transport.push(
                &neighbor,
                delta,
                Box::new(move |outcome| match outcome {
                    Ok(()) => {
                        let newly_known = topology.mark_known(&to, &sent);
                        let mut peers = peers.write();
                        let state = peers.entry(to.clone()).or_default();
                        state.acks += 1;
                        state.consecutive_failures = 0;
                        state.last_ack = Some(Instant::now());
                        trace!("{} acknowledged {} values ({} new)", to, sent.len(), newly_known);
                    }
                    Err(e) => {
                        let mut peers = peers.write();
                        let state = peers.entry(to.clone()).or_default();
                        state.failures += 1;
                        state.consecutive_failures += 1;
                        debug!(
                            "Push of {} values to {} failed ({} in a row): {}",
                            sent.len(),
                            to,
                            state.consecutive_failures,
                            e
                        );
                    }
                }),
            );
            pushes += 1;
        }

        pushes
    }

    /// Spawn the gossip loop; it stops when `shutdown` fires
    pub fn spawn<T>(
        self: Arc<Self>,
        transport: Arc<T>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()>
    where
        T: SyncTransport + ?Sized + 'static,
    {
        // Offset the first tick so nodes started together do not gossip in lock-step
        let jitter_ms = rand::thread_rng().gen_range(0..=self.interval.as_millis() as u64);
        let start = tokio::time::Instant::now() + Duration::from_millis(jitter_ms);

        tokio::spawn(async move {
            let mut ticker = interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pushes = self.run_round(transport.as_ref());
                        if pushes > 0 {
                            trace!("Gossip round issued {} pushes", pushes);
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("Gossip loop stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Push accounting for one neighbor
    pub fn peer_state(&self, neighbor: &NodeId) -> Option<PeerSyncState> {
        self.peers.read().get(neighbor).cloned()
    }

    /// Get gossip statistics
    pub fn stats(&self) -> GossipStats {
        let peers = self.peers.read();
        GossipStats {
            neighbor_count: self.topology.neighbors().len(),
            pushes: peers.values().map(|s| s.pushes).sum(),
            acks: peers.values().map(|s| s.acks).sum(),
            failures: peers.values().map(|s| s.failures).sum(),
            value_count: self.store.len(),
        }
    }
}

/// Gossip statistics
#[derive(Debug, Clone)]
pub struct GossipStats {
    pub neighbor_count: usize,
    pub pushes: u64,
    pub acks: u64,
    pub failures: u64,
    pub value_count: usize,
}
