//! Error types for framewire.

use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for all framewire operations.
#[derive(Debug, Error)]
pub enum FramewireError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested bind address.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// Operation not allowed in the listener's current state.
    #[error("invalid listener state: expected {expected}, found {found}")]
    InvalidState {
        /// State the operation requires.
        expected: &'static str,
        /// State the listener was in.
        found: &'static str,
    },

    /// I/O error on a connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Unrecoverable framing error (oversized frame, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No constructor registered for the given message type.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u16),

    /// A receive loop is already running on this handler.
    #[error("Receive loop already running on connection {0}")]
    ReceiveInProgress(u64),

    /// Connection closed or disposed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using FramewireError.
pub type Result<T> = std::result::Result<T, FramewireError>;
