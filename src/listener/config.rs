//! Listener configuration and builder.

use std::net::SocketAddr;
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::SocketListener;
use crate::connection::ConnectionConfig;
use crate::error::Result;
use crate::message::{MessageFactory, MessageRegistry};

/// Default maximum simultaneous connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Connections beyond this count are dropped on accept.
    pub max_connections: usize,
    /// Set `TCP_NODELAY` on accepted sockets.
    pub nodelay: bool,
    /// Settings for each accepted connection.
    pub connection: ConnectionConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            nodelay: true,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Builder for configuring and creating a [`SocketListener`].
///
/// Register message types and tune limits, then call
/// [`build`](ListenerBuilder::build) or [`listen`](ListenerBuilder::listen).
pub struct ListenerBuilder {
    registry: MessageRegistry,
    config: ListenerConfig,
}

impl ListenerBuilder {
    /// Create a builder with an empty registry and default settings.
    pub fn new() -> Self {
        Self {
            registry: MessageRegistry::new(),
            config: ListenerConfig::default(),
        }
    }

    /// Use an already populated registry.
    pub fn registry(mut self, registry: MessageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a message constructor.
    pub fn message<F: MessageFactory>(mut self, message_type: u16, name: &str, factory: F) -> Self {
        self.registry.register(message_type, name, factory);
        self
    }

    /// Register a message type delivered as raw bytes.
    pub fn raw_message(mut self, message_type: u16, name: &str) -> Self {
        self.registry.register_raw(message_type, name);
        self
    }

    /// Register a message type whose body is MsgPack-encoded `T`.
    pub fn typed_message<T>(mut self, message_type: u16, name: &str) -> Self
    where
        T: DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
    {
        self.registry.register_typed::<T>(message_type, name);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of simultaneous connections.
    ///
    /// Default: 1024
    pub fn max_connections(mut self, limit: usize) -> Self {
        self.config.max_connections = limit;
        self
    }

    /// Enable or disable `TCP_NODELAY` on accepted sockets.
    ///
    /// Default: enabled
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    /// Set the largest accepted payload.
    ///
    /// Default: 16 MB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.connection.max_payload_size = size;
        self
    }

    /// End connections that send no frame for `timeout`.
    ///
    /// Default: no timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.idle_timeout = Some(timeout);
        self
    }

    /// Set how long disposal waits for queued replies to flush.
    ///
    /// Default: 1 second
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.drain_timeout = timeout;
        self
    }

    /// Set the maximum pending outbound frames per connection.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.connection.writer.max_pending_frames = limit;
        self
    }

    /// Set the per-connection writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.connection.writer.channel_capacity = capacity;
        self
    }

    /// Set how long a send waits for writer backpressure to clear.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.writer.backpressure_timeout = timeout;
        self
    }

    /// Build an idle listener.
    pub fn build(self) -> SocketListener {
        SocketListener::with_config(self.registry, self.config)
    }

    /// Build the listener and bind it to `addr`.
    pub async fn listen(self, addr: SocketAddr) -> Result<SocketListener> {
        let listener = self.build();
        listener.listen(addr).await?;
        Ok(listener)
    }
}

impl Default for ListenerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ListenerConfig::default();
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(config.nodelay);
        assert!(config.connection.idle_timeout.is_none());
    }

    #[test]
    fn test_builder_registration() {
        let builder = ListenerBuilder::new()
            .raw_message(1, "ping")
            .typed_message::<String>(2, "text");

        assert_eq!(builder.registry.get_type_name(1), Some("ping"));
        assert_eq!(builder.registry.get_type_name(2), Some("text"));
    }

    #[test]
    fn test_builder_configuration() {
        let builder = ListenerBuilder::new()
            .max_connections(8)
            .nodelay(false)
            .max_payload_size(4096)
            .idle_timeout(Duration::from_secs(30))
            .drain_timeout(Duration::from_millis(250))
            .max_pending_frames(2048)
            .channel_capacity(512)
            .backpressure_timeout(Duration::from_secs(10));

        let config = &builder.config;
        assert_eq!(config.max_connections, 8);
        assert!(!config.nodelay);
        assert_eq!(config.connection.max_payload_size, 4096);
        assert_eq!(config.connection.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.connection.drain_timeout, Duration::from_millis(250));
        assert_eq!(config.connection.writer.max_pending_frames, 2048);
        assert_eq!(config.connection.writer.channel_capacity, 512);
        assert_eq!(
            config.connection.writer.backpressure_timeout,
            Duration::from_secs(10)
        );
    }
}
