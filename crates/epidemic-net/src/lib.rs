//! Node runtime for the epidemic broadcast protocol
//!
//! This crate provides:
//! - Newline-delimited JSON framing of message envelopes
//! - Cluster identity assigned by `init`
//! - Handler dispatch by message type
//! - Replies and callback-based RPC with timeouts

pub mod cluster;
pub mod framing;
pub mod node;

pub use cluster::Cluster;
pub use framing::{EnvelopeCodec, FrameError, Inbound};
pub use node::{Node, NodeError, RpcCallback};
