//! Per-connection settings.

use std::time::Duration;

use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::writer::WriterConfig;

/// Default time `dispose` waits for queued outbound frames to flush.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration applied to every [`ConnectionHandler`](super::ConnectionHandler).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest payload accepted from the peer. A larger announced length
    /// ends the connection.
    pub max_payload_size: u32,
    /// Maximum wait for the next frame header. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Maximum wait for the writer to flush on dispose.
    pub drain_timeout: Duration,
    /// Outbound writer settings.
    pub writer: WriterConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            idle_timeout: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            writer: WriterConfig::default(),
        }
    }
}
