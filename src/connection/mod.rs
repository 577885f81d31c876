//! Connection module - one accepted peer and its receive loop.
//!
//! Provides:
//! - [`ConnectionHandler`] - owns the transport, decodes frames, sends replies
//! - [`ConnectionConfig`] - payload limit, idle and drain timeouts
//! - [`ReceiveOutcome`] - why a receive loop ended normally

mod config;
mod handler;

use std::fmt;

pub use config::{ConnectionConfig, DEFAULT_DRAIN_TIMEOUT};
pub use handler::{ConnectionHandler, MessageCallback};

/// Identifier of an accepted connection, unique per listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Raw value.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normal termination of a receive loop.
///
/// Unrecoverable faults are reported as `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The peer closed the stream, at a frame boundary or mid-frame.
    PeerClosed,
    /// The cancel token was set; observed at a frame boundary.
    Cancelled,
    /// The handler was disposed while the loop was running.
    Disposed,
    /// No header arrived within the configured idle timeout.
    IdleTimeout,
}

impl fmt::Display for ReceiveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReceiveOutcome::PeerClosed => "peer closed",
            ReceiveOutcome::Cancelled => "cancelled",
            ReceiveOutcome::Disposed => "disposed",
            ReceiveOutcome::IdleTimeout => "idle timeout",
        };
        f.write_str(s)
    }
}
