//! Error types for the channel-switch environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// Transport send failed (connection closed, unknown handle, etc.)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Connection handle is not known to the transport
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// Target node is unreachable (simulated partition)
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    /// Creates an unknown-connection error.
    pub fn unknown_connection(conn: impl std::fmt::Display) -> Self {
        Self::UnknownConnection(conn.to_string())
    }

    /// Creates an unreachable error.
    pub fn unreachable(node: impl std::fmt::Display) -> Self {
        Self::NodeUnreachable(node.to_string())
    }
}
