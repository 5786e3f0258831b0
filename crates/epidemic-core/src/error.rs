//! Error types for the epidemic protocol

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Epidemic protocol error types
#[derive(Debug, Error)]
pub enum Error {
    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Request body could not be decoded into the expected payload
    #[error("malformed request: {0}")]
    Malformed(String),

    /// A message arrived before `init` assigned this node an identity
    #[error("node not initialized")]
    NotInitialized,

    /// RPC was abandoned after the configured timeout
    #[error("rpc timed out")]
    Timeout,

    /// Peer answered an RPC with an error body
    #[error("rpc error {code}: {text}")]
    Rpc { code: ErrorCode, text: String },

    /// Peer answered an RPC with a body of the wrong type
    #[error("unexpected reply type: {0}")]
    UnexpectedReply(String),

    /// Outbound channel is gone (node shut down)
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    /// Error code reported to the requester when a handler fails with this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Serialization(_) | Self::Malformed(_) => ErrorCode::MalformedRequest,
            Self::NotInitialized => ErrorCode::TemporarilyUnavailable,
            Self::Timeout => ErrorCode::Timeout,
            Self::Rpc { code, .. } => *code,
            Self::UnexpectedReply(_) | Self::ChannelClosed => ErrorCode::Crash,
        }
    }
}

/// Maelstrom error codes carried in `error` bodies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ErrorCode {
    Timeout,
    NodeNotFound,
    NotSupported,
    TemporarilyUnavailable,
    MalformedRequest,
    Crash,
    Abort,
    /// Any code this node does not interpret
    Other(u32),
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Timeout,
            1 => Self::NodeNotFound,
            10 => Self::NotSupported,
            11 => Self::TemporarilyUnavailable,
            12 => Self::MalformedRequest,
            13 => Self::Crash,
            14 => Self::Abort,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Timeout => 0,
            ErrorCode::NodeNotFound => 1,
            ErrorCode::NotSupported => 10,
            ErrorCode::TemporarilyUnavailable => 11,
            ErrorCode::MalformedRequest => 12,
            ErrorCode::Crash => 13,
            ErrorCode::Abort => 14,
            ErrorCode::Other(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::NodeNotFound => "node-not-found",
            Self::NotSupported => "not-supported",
            Self::TemporarilyUnavailable => "temporarily-unavailable",
            Self::MalformedRequest => "malformed-request",
            Self::Crash => "crash",
            Self::Abort => "abort",
            Self::Other(code) => return write!(f, "code {}", code),
        };
        f.write_str(name)
    }
}
