//! Node runtime
//!
//! Reads envelopes from an input stream, dispatches requests to registered
//! handlers, routes replies to pending RPC callbacks and writes everything
//! the node sends to an output stream.

use crate::cluster::Cluster;
use crate::framing::{EnvelopeCodec, FrameError, Inbound};
use epidemic_core::protocol::Control;
use epidemic_core::{Body, Envelope, Error, ErrorCode, MsgId, NodeId, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Runtime errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Node is already running")]
    AlreadyRunning,
}

/// Request handler registered for one message type
pub type Handler = Arc<dyn Fn(&Node, &Envelope) -> Result<()> + Send + Sync>;

/// Continuation invoked exactly once with the reply or the failure of an RPC
pub type RpcCallback = Box<dyn FnOnce(Result<Envelope>) + Send>;

/// A protocol node
pub struct Node {
    /// Identity and membership, set by `init`
    cluster: RwLock<Option<Cluster>>,
    /// Handlers by message type
    handlers: RwLock<HashMap<String, Handler>>,
    /// Callbacks of in-flight RPCs by request msg_id
    pending: Arc<Mutex<HashMap<MsgId, RpcCallback>>>,
    next_msg_id: AtomicU64,
    outbound_tx: mpsc::UnboundedSender<Envelope>,
    /// Taken by `run`
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    rpc_timeout: Duration,
}

impl Node {
    /// Create a node whose RPCs are abandoned after `rpc_timeout`
    pub fn new(rpc_timeout: Duration) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            cluster: RwLock::new(None),
            handlers: RwLock::new(HashMap::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_msg_id: AtomicU64::new(1),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            rpc_timeout,
        }
    }

    /// Register the handler for a message type, replacing any previous one
    pub fn handle<F>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&Node, &Envelope) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.write().insert(kind.into(), Arc::new(handler));
    }

    /// Our node id
    pub fn id(&self) -> Result<NodeId> {
        self.cluster
            .read()
            .as_ref()
            .map(|c| c.node_id.clone())
            .ok_or(Error::NotInitialized)
    }

    /// Every node in the cluster (empty before `init`)
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.cluster
            .read()
            .as_ref()
            .map(|c| c.node_ids.clone())
            .unwrap_or_default()
    }

    /// Identity and membership, if initialized
    pub fn cluster(&self) -> Option<Cluster> {
        self.cluster.read().clone()
    }

    /// Number of RPCs awaiting a reply or timeout
    pub fn pending_rpcs(&self) -> usize {
        self.pending.lock().len()
    }

    fn next_msg_id(&self) -> MsgId {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    fn enqueue(&self, envelope: Envelope) -> Result<()> {
        self.outbound_tx
            .send(envelope)
            .map_err(|_| Error::ChannelClosed)
    }

    /// Reply to a request
    pub fn reply<T: Serialize>(&self, request: &Envelope, payload: &T) -> Result<()> {
        let body = Body::encode(payload)?
            .with_msg_id(self.next_msg_id())
            .with_in_reply_to(request.body.msg_id);
        // The request was addressed to us, so its dest is our id even before init
        self.enqueue(Envelope::new(
            request.dest.clone(),
            request.src.clone(),
            body,
        ))
    }

    /// Reply with an `error` body
    pub fn reply_error(
        &self,
        request: &Envelope,
        code: ErrorCode,
        text: impl Into<String>,
    ) -> Result<()> {
        self.reply(
            request,
            &Control::Error {
                code,
                text: text.into(),
            },
        )
    }

    /// Send a request and invoke `callback` once with its outcome
    ///
    /// The callback receives the reply envelope, `Error::Rpc` for an `error`
    /// reply, `Error::Timeout` when nothing matched within the RPC timeout, or
    /// the local error that prevented sending. Must be called from within a
    /// Tokio runtime.
    pub fn rpc<T, F>(&self, dest: &NodeId, payload: &T, callback: F)
    where
        T: Serialize,
        F: FnOnce(Result<Envelope>) + Send + 'static,
    {
        let msg_id = self.next_msg_id();
        let envelope = match self.id().and_then(|src| {
            let body = Body::encode(payload)?.with_msg_id(msg_id);
            Ok(Envelope::new(src, dest.clone(), body))
        }) {
            Ok(envelope) => envelope,
            Err(e) => return callback(Err(e)),
        };

        self.pending.lock().insert(msg_id, Box::new(callback));
        if let Err(e) = self.enqueue(envelope) {
            let callback = self.pending.lock().remove(&msg_id);
            if let Some(callback) = callback {
                callback(Err(e));
            }
            return;
        }

        let pending = self.pending.clone();
        let timeout = self.rpc_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let callback = pending.lock().remove(&msg_id);
            if let Some(callback) = callback {
                callback(Err(Error::Timeout));
            }
        });
    }

    /// Run the node until the input stream ends
    ///
    /// Requests still being handled when the input ends get to finish, and
    /// their replies are written before `run` returns.
    pub async fn run<R, W>(
        self: Arc<Self>,
        reader: R,
        writer: W,
    ) -> std::result::Result<(), NodeError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .ok_or(NodeError::AlreadyRunning)?;
        let (close_tx, close_rx) = oneshot::channel();
        let writer_handle = tokio::spawn(write_loop(
            outbound_rx,
            close_rx,
            FramedWrite::new(writer, EnvelopeCodec::new()),
        ));

        let mut frames = FramedRead::new(reader, EnvelopeCodec::new());
        let in_flight = TaskTracker::new();
        let mut result = Ok(());
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Inbound::Envelope(envelope)) => self.handle_inbound(envelope, &in_flight),
                Ok(Inbound::Malformed { line, reason }) => {
                    warn!("Skipping malformed input ({}): {}", reason, line);
                }
                Err(e) => {
                    error!("Input stream error: {}", e);
                    result = Err(e.into());
                    break;
                }
            }
        }

        in_flight.close();
        if !in_flight.is_empty() {
            debug!("Input closed, waiting for {} handlers", in_flight.len());
        }
        in_flight.wait().await;

        debug!("Flushing output");
        let _ = close_tx.send(());
        if let Err(e) = writer_handle.await {
            error!("Writer task failed: {}", e);
        }
        // Callbacks of RPCs still in flight are dropped without being invoked
        self.pending.lock().clear();

        result
    }

    fn handle_inbound(self: &Arc<Self>, envelope: Envelope, in_flight: &TaskTracker) {
        if let Some(in_reply_to) = envelope.body.in_reply_to {
            self.complete_rpc(in_reply_to, envelope);
            return;
        }

        if envelope.body.kind == "init" {
            self.handle_init(&envelope);
            return;
        }

        let handler = self.handlers.read().get(&envelope.body.kind).cloned();
        let Some(handler) = handler else {
            warn!(
                "No handler for message type {:?} from {}",
                envelope.body.kind, envelope.src
            );
            let text = format!("unsupported message type: {}", envelope.body.kind);
            if let Err(e) = self.reply_error(&envelope, ErrorCode::NotSupported, text) {
                error!("Failed to send error reply: {}", e);
            }
            return;
        };

        let node = self.clone();
        in_flight.spawn(async move {
            if let Err(e) = handler(&node, &envelope) {
                warn!(
                    "Handler for {:?} from {} failed: {}",
                    envelope.body.kind, envelope.src, e
                );
                if let Err(e) = node.reply_error(&envelope, e.code(), e.to_string()) {
                    error!("Failed to send error reply: {}", e);
                }
            }
        });
    }

    fn handle_init(&self, envelope: &Envelope) {
        let outcome = match envelope.body.decode::<Control>() {
            Ok(Control::Init { node_id, node_ids }) => {
                info!("Initialized as {} in a cluster of {}", node_id, node_ids.len());
                *self.cluster.write() = Some(Cluster::new(node_id, node_ids));
                self.reply(envelope, &Control::InitOk)
            }
            Ok(_) => Err(Error::Malformed("init body has the wrong type".into())),
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            warn!("Rejecting init from {}: {}", envelope.src, e);
            if let Err(e) = self.reply_error(envelope, e.code(), e.to_string()) {
                error!("Failed to send error reply: {}", e);
            }
        }
    }

    fn complete_rpc(&self, in_reply_to: MsgId, envelope: Envelope) {
        let callback = self.pending.lock().remove(&in_reply_to);
        let Some(callback) = callback else {
            debug!(
                "Dropping reply {:?} from {} to unknown or expired request {}",
                envelope.body.kind, envelope.src, in_reply_to
            );
            return;
        };

        if envelope.body.is_error() {
            let failure = match envelope.body.decode::<Control>() {
                Ok(Control::Error { code, text }) => Error::Rpc { code, text },
                _ => Error::Rpc {
                    code: ErrorCode::Crash,
                    text: "unreadable error body".into(),
                },
            };
            callback(Err(failure));
        } else {
            callback(Ok(envelope));
        }
    }
}

async fn write_loop<W>(
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    mut close_rx: oneshot::Receiver<()>,
    mut sink: FramedWrite<W, EnvelopeCodec>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            Some(envelope) = outbound_rx.recv() => {
                if let Err(e) = sink.send(envelope).await {
                    error!("Output stream error: {}", e);
                    return;
                }
            }
            _ = &mut close_rx => {
                while let Ok(envelope) = outbound_rx.try_recv() {
                    if let Err(e) = sink.feed(envelope).await {
                        error!("Output stream error: {}", e);
                        return;
                    }
                }
                if let Err(e) = sink.flush().await {
                    error!("Output stream error: {}", e);
                }
                return;
            }
        }
    }
}
