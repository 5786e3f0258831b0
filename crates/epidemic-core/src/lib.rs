//! Epidemic Core Library
//!
//! This crate provides the identifiers, the JSON message envelope and the
//! typed request/reply payloads shared by the node runtime and the broadcast
//! daemon.
//!
//! # Modules
//!
//! - [`types`]: Node identifiers, message ids and broadcast values
//! - [`message`]: Envelope and body framing (`src`/`dest`/`body`)
//! - [`protocol`]: Typed payloads for control and broadcast messages
//! - [`error`]: Error types and protocol error codes

pub mod error;
pub mod message;
pub mod protocol;
pub mod types;

pub use error::{Error, ErrorCode, Result};
pub use message::{Body, Envelope};
pub use types::*;
