//! Listener module - accept loop and connection registry.
//!
//! A [`SocketListener`] goes through three states:
//!
//! ```text
//! Idle ──listen()──► Listening ──stop()──► Stopped
//!   └──────────────stop()───────────────────┘
//! ```
//!
//! While listening, every accepted socket gets a [`ConnectionHandler`] that
//! is tracked in a concurrent registry and driven by its own Tokio task.
//! Decoded messages are republished to [`Subscription`]s tagged with the
//! handler that received them.
//!
//! # Example
//!
//! ```no_run
//! use framewire::{FramedMessage, SocketListener};
//!
//! # async fn run() -> framewire::Result<()> {
//! let listener = SocketListener::builder()
//!     .raw_message(1, "ping")
//!     .build();
//!
//! let mut messages = listener.subscribe();
//! listener.listen_port(7000).await?;
//!
//! while let Some(event) = messages.recv().await {
//!     event.handler.respond(event.message.as_ref(), "pong").await?;
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod notify;

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::cancel::CancelToken;
use crate::connection::{ConnectionHandler, ConnectionId};
use crate::error::{FramewireError, Result};
use crate::message::MessageRegistry;

pub use config::{ListenerBuilder, ListenerConfig, DEFAULT_MAX_CONNECTIONS};
pub use notify::{MessageReceived, Subscription};

use notify::Subscribers;

/// Lifecycle state of a [`SocketListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Created, not yet bound.
    Idle,
    /// Accepting connections.
    Listening,
    /// Stopped; cannot be restarted.
    Stopped,
}

impl ListenerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ListenerState::Idle,
            1 => ListenerState::Listening,
            _ => ListenerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ListenerState::Idle => 0,
            ListenerState::Listening => 1,
            ListenerState::Stopped => 2,
        }
    }

    /// Lowercase name, as used in errors and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ListenerState::Idle => "idle",
            ListenerState::Listening => "listening",
            ListenerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared between the listener, its accept task and connection tasks.
struct Shared {
    config: ListenerConfig,
    registry: Arc<MessageRegistry>,
    state: AtomicU8,
    connections: DashMap<ConnectionId, Arc<ConnectionHandler>>,
    subscribers: Arc<Subscribers>,
    tracker: TaskTracker,
    /// Stops the accept loop.
    shutdown: CancellationToken,
    /// Parent of every receive loop's cancel token.
    root_cancel: CancelToken,
    limit: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl Shared {
    fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ListenerState, to: ListenerState) -> std::result::Result<(), ListenerState> {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ListenerState::from_u8)
    }

    fn start_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let handler = ConnectionHandler::new(
            id,
            Some(peer),
            stream,
            self.registry.clone(),
            self.config.connection.clone(),
        );

        let subscribers = self.subscribers.clone();
        handler.on_message(move |handler, message| {
            subscribers.publish(MessageReceived {
                message: message.clone(),
                handler: handler.clone(),
            });
        });

        self.connections.insert(id, handler.clone());

        let cancel = self.root_cancel.child();
        let shared = self.clone();
        let span = tracing::debug_span!("connection", connection = %id, peer = %peer);

        self.tracker.spawn(
            async move {
                let _permit = permit;
                tracing::debug!("connection opened");

                match handler.receive(cancel).await {
                    Ok(outcome) => tracing::debug!(%outcome, "connection closed"),
                    Err(e) => tracing::debug!(error = %e, "connection failed"),
                }

                shared.connections.remove(&id);
                handler.dispose().await;
            }
            .instrument(span),
        );
    }
}

/// TCP listener that decodes framed messages from every accepted connection.
pub struct SocketListener {
    shared: Arc<Shared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl SocketListener {
    /// Create a builder.
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::new()
    }

    /// Create an idle listener with default settings.
    pub fn new(registry: MessageRegistry) -> Self {
        Self::with_config(registry, ListenerConfig::default())
    }

    /// Create an idle listener.
    pub fn with_config(registry: MessageRegistry, config: ListenerConfig) -> Self {
        let limit = Arc::new(Semaphore::new(config.max_connections));
        Self {
            shared: Arc::new(Shared {
                config,
                registry: Arc::new(registry),
                state: AtomicU8::new(ListenerState::Idle.as_u8()),
                connections: DashMap::new(),
                subscribers: Arc::new(Subscribers::default()),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                root_cancel: CancelToken::new(),
                limit,
                next_id: AtomicU64::new(0),
            }),
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind `addr` and start accepting connections.
    ///
    /// Returns the bound address, which differs from `addr` when port 0 was
    /// requested.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the listener is idle
    /// - `Bind` if the socket cannot be bound
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr> {
        self.shared
            .transition(ListenerState::Idle, ListenerState::Listening)
            .map_err(|found| FramewireError::InvalidState {
                expected: ListenerState::Idle.as_str(),
                found: found.as_str(),
            })?;

        let bound = match bind(addr).await {
            Ok(bound) => bound,
            Err(e) => {
                let _ = self
                    .shared
                    .transition(ListenerState::Listening, ListenerState::Idle);
                return Err(e);
            }
        };

        let (listener, local_addr) = bound;
        self.start_accepting(listener, local_addr)?;

        tracing::info!(addr = %local_addr, "listening");
        Ok(local_addr)
    }

    /// Spawn the accept loop unless a `stop` landed while binding.
    ///
    /// The state check and the task hand-off happen under the `accept_task`
    /// lock, so a concurrent `stop` either sees the task or wins the check.
    fn start_accepting(&self, listener: TcpListener, local_addr: SocketAddr) -> Result<()> {
        let mut accept_task = self.accept_task.lock();

        let state = self.shared.state();
        if state != ListenerState::Listening {
            tracing::debug!(addr = %local_addr, %state, "stopped while binding");
            return Err(FramewireError::InvalidState {
                expected: ListenerState::Listening.as_str(),
                found: state.as_str(),
            });
        }

        *self.local_addr.lock() = Some(local_addr);
        let span = tracing::info_span!("listener", addr = %local_addr);
        *accept_task = Some(tokio::spawn(
            accept_loop(self.shared.clone(), listener).instrument(span),
        ));
        Ok(())
    }

    /// Bind `127.0.0.1:port` and start accepting connections.
    pub async fn listen_port(&self, port: u16) -> Result<SocketAddr> {
        self.listen(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await
    }

    /// Stop accepting, dispose every tracked connection and end all
    /// subscriptions.
    ///
    /// Returns the number of connections this call disposed. Safe to call
    /// before `listen` and more than once; later calls return 0.
    pub async fn stop(&self) -> usize {
        let previous = self
            .shared
            .state
            .swap(ListenerState::Stopped.as_u8(), Ordering::AcqRel);
        if ListenerState::from_u8(previous) == ListenerState::Stopped {
            return 0;
        }

        self.shared.shutdown.cancel();

        // No handler can be registered once the accept task is gone.
        let accept_task = self.accept_task.lock().take();
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                tracing::debug!(error = %e, "accept task failed");
            }
        }

        let ids: Vec<ConnectionId> = self.shared.connections.iter().map(|e| *e.key()).collect();
        let mut disposals = JoinSet::new();
        for id in ids {
            if let Some((_, handler)) = self.shared.connections.remove(&id) {
                disposals.spawn(async move { handler.dispose().await });
            }
        }

        let mut disposed = 0;
        while let Some(result) = disposals.join_next().await {
            match result {
                Ok(true) => disposed += 1,
                Ok(false) => {}
                Err(e) => tracing::debug!(error = %e, "dispose task failed"),
            }
        }

        // Loops not disposed above stop at their next frame boundary.
        self.shared.root_cancel.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        self.shared.connections.clear();
        self.shared.subscribers.close();

        tracing::info!(disposed, "listener stopped");
        disposed
    }

    /// Subscribe to decoded messages from every connection.
    ///
    /// Only messages published after this call are delivered. After `stop`
    /// the returned subscription is already closed.
    ///
    /// The subscription buffers without bound: messages pile up for as long
    /// as it is not drained. See [`Subscription::pending`].
    pub fn subscribe(&self) -> Subscription {
        self.shared.subscribers.subscribe()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.len()
    }

    /// Bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ListenerState {
        self.shared.state()
    }

    /// Number of tracked connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Look up a tracked connection.
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<ConnectionHandler>> {
        self.shared.connections.get(&id).map(|e| e.value().clone())
    }

    /// Snapshot of all tracked connections.
    pub fn connections(&self) -> Vec<Arc<ConnectionHandler>> {
        self.shared
            .connections
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    /// Message types this listener decodes.
    pub fn registry(&self) -> &MessageRegistry {
        &self.shared.registry
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        // Without `stop`: end the accept loop and wake every receive loop so
        // its task disposes the connection.
        self.shared
            .state
            .store(ListenerState::Stopped.as_u8(), Ordering::Release);
        self.shared.shutdown.cancel();
        self.shared.root_cancel.cancel();
        for entry in self.shared.connections.iter() {
            entry.value().close();
        }
    }
}

impl fmt::Debug for SocketListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketListener")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .finish()
    }
}

async fn bind(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| FramewireError::Bind { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| FramewireError::Bind { addr, source })?;
    Ok((listener, local_addr))
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => {
                tracing::debug!("accept loop stopped");
                break;
            }
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed, no longer accepting connections");
                    break;
                }
            },
        };

        // A stop may have started while this accept was completing.
        if shared.state() != ListenerState::Listening {
            tracing::debug!(%peer, "dropping connection accepted during shutdown");
            continue;
        }

        let permit = match shared.limit.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    %peer,
                    max_connections = shared.config.max_connections,
                    "connection limit reached, dropping connection"
                );
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(shared.config.nodelay) {
            tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
        }

        shared.start_connection(stream, peer, permit);
    }
}
