//! Typed errors shared by client and server.
//!
//! Callbacks and drivers use `anyhow`; these enums cover the places where the
//! caller needs to branch on the failure kind.

use thiserror::Error;

/// A frame that could not be accepted as a protocol message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message of {len} chars exceeds the {max} char limit")]
    Oversized { len: usize, max: usize },
    #[error("empty message")]
    Empty,
    #[error("syntax error: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("unknown message type {0}")]
    UnknownType(u64),
    #[error("malformed {0}")]
    Malformed(&'static str),
}

/// Failure of the underlying message transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}

/// Invalid startup configuration. Always fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid server address {0:?}")]
    InvalidAddr(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("render_substep_ms ({substep}) must not exceed tick_interval_ms ({tick})")]
    SubstepTooLong { substep: u64, tick: u64 },
}
