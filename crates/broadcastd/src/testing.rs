//! Test harnesses: a single node behind in-memory pipes, and a cluster of
//! servers joined by an in-process router that can cut nodes off.

use crate::config::Config;
use crate::server::Server;
use epidemic_core::protocol::{Control, Reply, Request};
use epidemic_core::{Body, Envelope, MsgId, NodeId, Value};
use epidemic_net::{EnvelopeCodec, Inbound};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::codec::{FramedRead, FramedWrite};

const PIPE_BYTES: usize = 1 << 20;
const REPLY_WAIT: Duration = Duration::from_secs(5);

/// One node driven directly through its stdin/stdout
pub struct TestNode {
    id: NodeId,
    input: FramedWrite<DuplexStream, EnvelopeCodec>,
    output: FramedRead<DuplexStream, EnvelopeCodec>,
    next_msg_id: MsgId,
}

impl TestNode {
    /// Start whatever `run` drives over a fresh stdin/stdout pair
    pub fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(DuplexStream, DuplexStream) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stdin_ours, stdin_node) = duplex(PIPE_BYTES);
        let (stdout_node, stdout_ours) = duplex(PIPE_BYTES);
        tokio::spawn(run(stdin_node, stdout_node));

        Self {
            id: NodeId::from("n0"),
            input: FramedWrite::new(stdin_ours, EnvelopeCodec::new()),
            output: FramedRead::new(stdout_ours, EnvelopeCodec::new()),
            next_msg_id: 1,
        }
    }

    pub async fn init(&mut self, id: &str, ids: &[&str]) {
        self.id = NodeId::from(id);
        let reply = self
            .request(
                "c0",
                &Control::Init {
                    node_id: self.id.clone(),
                    node_ids: ids.iter().map(|n| NodeId::from(*n)).collect(),
                },
            )
            .await;
        assert_eq!(reply.body.kind, "init_ok");
    }

    /// Send a request and wait for its reply, skipping unrelated output
    pub async fn request<T: Serialize>(&mut self, src: &str, payload: &T) -> Envelope {
        let body = Body::encode(payload).unwrap();
        self.send_body(src, body).await
    }

    /// Like `request`, with the body given as raw JSON
    pub async fn request_raw(&mut self, src: &str, body: &str) -> Envelope {
        let body: Body = serde_json::from_str(body).unwrap();
        self.send_body(src, body).await
    }

    async fn send_body(&mut self, src: &str, body: Body) -> Envelope {
        let msg_id = self.next_msg_id;
        self.next_msg_id += 1;
        self.input
            .send(Envelope::new(src.into(), self.id.clone(), body.with_msg_id(msg_id)))
            .await
            .unwrap();

        let deadline = Instant::now() + REPLY_WAIT;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.output.next())
                .await
                .expect("timed out waiting for reply");
            match frame {
                Some(Ok(Inbound::Envelope(envelope)))
                    if envelope.body.in_reply_to == Some(msg_id) =>
                {
                    return envelope
                }
                Some(Ok(_)) => continue,
                other => panic!("node output ended: {:?}", other),
            }
        }
    }
}

/// Several servers wired together through an in-process router
///
/// Node-to-node traffic touching a blocked node is dropped; client traffic
/// always gets through.
pub struct TestCluster {
    ids: Vec<NodeId>,
    servers: HashMap<NodeId, Arc<Server>>,
    inputs: Arc<HashMap<NodeId, mpsc::UnboundedSender<Envelope>>>,
    replies: mpsc::UnboundedReceiver<Envelope>,
    blocked: Arc<RwLock<HashSet<NodeId>>>,
    next_msg_id: MsgId,
}

impl TestCluster {
    /// Start and `init` one server per name
    pub async fn start(names: &[&str], config: Config) -> Self {
        let ids: Vec<NodeId> = names.iter().map(|n| NodeId::from(*n)).collect();
        let mut inputs = HashMap::new();
        let mut servers = HashMap::new();
        let mut outputs = Vec::new();

        for id in &ids {
            let (stdin_ours, stdin_node) = duplex(PIPE_BYTES);
            let (stdout_node, stdout_ours) = duplex(PIPE_BYTES);

            let server = Arc::new(Server::new(config.clone()).unwrap());
            servers.insert(id.clone(), server.clone());
            tokio::spawn(async move {
                let _ = server.run(stdin_node, stdout_node).await;
            });

            let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
            let mut sink = FramedWrite::new(stdin_ours, EnvelopeCodec::new());
            tokio::spawn(async move {
                while let Some(envelope) = rx.recv().await {
                    if sink.send(envelope).await.is_err() {
                        break;
                    }
                }
            });

            inputs.insert(id.clone(), tx);
            outputs.push(FramedRead::new(stdout_ours, EnvelopeCodec::new()));
        }

        let inputs = Arc::new(inputs);
        let blocked = Arc::new(RwLock::new(HashSet::new()));
        let (reply_tx, replies) = mpsc::unbounded_channel();

        for mut output in outputs {
            let inputs = inputs.clone();
            let blocked = blocked.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                while let Some(Ok(frame)) = output.next().await {
                    let Inbound::Envelope(envelope) = frame else {
                        continue;
                    };
                    if envelope.dest.is_client() {
                        let _ = reply_tx.send(envelope);
                        continue;
                    }
                    let cut = {
                        let blocked = blocked.read();
                        blocked.contains(&envelope.src) || blocked.contains(&envelope.dest)
                    };
                    if cut {
                        continue;
                    }
                    if let Some(input) = inputs.get(&envelope.dest) {
                        let _ = input.send(envelope);
                    }
                }
            });
        }

        let mut cluster = Self {
            ids,
            servers,
            inputs,
            replies,
            blocked,
            next_msg_id: 1,
        };
        let ids = cluster.ids.clone();
        for id in &ids {
            let reply = cluster
                .request(
                    id,
                    &Control::Init {
                        node_id: id.clone(),
                        node_ids: ids.clone(),
                    },
                )
                .await;
            assert_eq!(reply.body.kind, "init_ok");
        }
        cluster
    }

    pub fn server(&self, node: &str) -> &Arc<Server> {
        &self.servers[&NodeId::from(node)]
    }

    /// Send a client request and wait for its reply
    pub async fn request<T: Serialize>(&mut self, dest: &NodeId, payload: &T) -> Envelope {
        let msg_id = self.next_msg_id;
        self.next_msg_id += 1;
        let body = Body::encode(payload).unwrap().with_msg_id(msg_id);
        self.inputs[dest]
            .send(Envelope::new("c1".into(), dest.clone(), body))
            .unwrap();

        let deadline = Instant::now() + REPLY_WAIT;
        loop {
            let envelope = tokio::time::timeout_at(deadline, self.replies.recv())
                .await
                .expect("timed out waiting for reply")
                .expect("router stopped");
            if envelope.body.in_reply_to == Some(msg_id) {
                return envelope;
            }
        }
    }

    /// Install a topology given as adjacency pairs on every node
    pub async fn install_topology(&mut self, graph: Vec<(&str, Vec<&str>)>) {
        let topology: HashMap<NodeId, Vec<NodeId>> = graph
            .into_iter()
            .map(|(node, neighbors)| {
                (
                    NodeId::from(node),
                    neighbors.into_iter().map(NodeId::from).collect::<Vec<_>>(),
                )
            })
            .collect();

        for id in self.ids.clone() {
            let reply = self
                .request(
                    &id,
                    &Request::Topology {
                        topology: topology.clone(),
                    },
                )
                .await;
            assert_eq!(reply.body.kind, "topology_ok");
        }
    }

    pub async fn broadcast(&mut self, node: &str, value: Value) {
        let reply = self
            .request(&NodeId::from(node), &Request::Broadcast { message: value })
            .await;
        assert_eq!(reply.body.kind, "broadcast_ok");
    }

    /// Read a node's values, sorted
    pub async fn read(&mut self, node: &str) -> Vec<Value> {
        let reply = self.request(&NodeId::from(node), &Request::Read).await;
        match reply.body.decode::<Reply>().unwrap() {
            Reply::ReadOk { mut messages } => {
                messages.sort();
                messages
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    /// Poll a node until it holds `expected`; returns whether it did in time
    pub async fn wait_for(&mut self, node: &str, expected: &[Value], within: Duration) -> bool {
        let poll = async {
            loop {
                let values = self.read(node).await;
                if expected.iter().all(|v| values.contains(v)) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        timeout(within, poll).await.is_ok()
    }

    /// Drop all node-to-node traffic to and from `node`
    pub fn block(&self, node: &str) {
        self.blocked.write().insert(NodeId::from(node));
    }

    pub fn unblock(&self, node: &str) {
        self.blocked.write().remove(&NodeId::from(node));
    }
}
