//! broadcastd - Epidemic Broadcast Node
//!
//! This daemon provides:
//! - A grow-only store of broadcast values
//! - Topology-driven gossip neighbors with per-neighbor knowledge
//! - Anti-entropy delta pushes with retry-by-resend
//! - Handlers for `broadcast`, `read`, `topology` and `sync`

pub mod config;
pub mod gossip;
pub mod handlers;
pub mod server;
pub mod store;
pub mod topology;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use gossip::{GossipEngine, SyncTransport};
pub use handlers::Handlers;
pub use server::Server;
pub use store::MessageStore;
pub use topology::TopologyTable;
