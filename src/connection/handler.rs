//! Connection handler: receive loop, callbacks and reply path.
//!
//! The transport is split on construction. The read half sits behind an
//! async mutex that the receive loop holds for its whole run, which is what
//! makes a second concurrent `receive` detectable. The write half moves into
//! a dedicated writer task (see [`crate::writer`]).
//!
//! Two signals stop a running loop:
//! - the caller's [`CancelToken`], polled between frames only
//! - the handler's close token, set by [`ConnectionHandler::dispose`] (or by
//!   the listener when it is dropped), which aborts a pending read immediately

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ConnectionConfig, ConnectionId, ReceiveOutcome};
use crate::cancel::CancelToken;
use crate::codec::MsgPackCodec;
use crate::error::{FramewireError, Result};
use crate::message::{FramedMessage, MessageRef, MessageRegistry};
use crate::protocol::{flags, FrameReader, Header, RequestHandle};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Callback invoked for every decoded message.
///
/// Runs synchronously on the connection's receive task, in wire order,
/// before the next frame is read. Must not block.
pub type MessageCallback = Arc<dyn Fn(&Arc<ConnectionHandler>, &MessageRef) + Send + Sync>;

/// Owns one accepted connection.
///
/// Shared as `Arc<ConnectionHandler>`: the listener's registry, the receive
/// task and message notifications all hold a reference.
pub struct ConnectionHandler {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    config: ConnectionConfig,
    registry: Arc<MessageRegistry>,
    /// Read side; `None` once disposed.
    reader: tokio::sync::Mutex<Option<FrameReader<BoxedReader>>>,
    /// Outbound queue; `None` once disposed.
    writer: Mutex<Option<WriterHandle>>,
    writer_task: Mutex<Option<JoinHandle<Result<()>>>>,
    callbacks: RwLock<Vec<MessageCallback>>,
    close: CancellationToken,
    disposed: AtomicBool,
}

impl ConnectionHandler {
    /// Take ownership of `stream` and start its writer task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<T>(
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        stream: T,
        registry: Arc<MessageRegistry>,
        config: ConnectionConfig,
    ) -> Arc<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, config.writer.clone());
        let reader: BoxedReader = Box::pin(read_half);

        Arc::new(Self {
            id,
            peer_addr,
            reader: tokio::sync::Mutex::new(Some(FrameReader::with_max_payload(
                reader,
                config.max_payload_size,
            ))),
            config,
            registry,
            writer: Mutex::new(Some(writer)),
            writer_task: Mutex::new(Some(writer_task)),
            callbacks: RwLock::new(Vec::new()),
            close: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        })
    }

    /// Connection identifier.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, when the transport has one.
    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether `dispose` has run.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Register a callback for decoded messages.
    ///
    /// Callbacks added while a loop is running take effect from the next
    /// frame.
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(&Arc<ConnectionHandler>, &MessageRef) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Run the receive loop until the peer closes, `cancel` is set, the
    /// handler is disposed or the idle timeout expires.
    ///
    /// # Errors
    ///
    /// - `ReceiveInProgress` if another loop is already running
    /// - `Protocol` if the peer announces a payload above the limit
    /// - `Io` on unexpected transport failures
    pub async fn receive(self: &Arc<Self>, cancel: CancelToken) -> Result<ReceiveOutcome> {
        if self.is_disposed() {
            return Ok(ReceiveOutcome::Disposed);
        }

        let mut guard = match self.reader.try_lock() {
            Ok(guard) => guard,
            Err(_) if self.is_disposed() => return Ok(ReceiveOutcome::Disposed),
            Err(_) => return Err(FramewireError::ReceiveInProgress(self.id.get())),
        };

        let reader = match guard.as_mut() {
            Some(reader) => reader,
            None => return Ok(ReceiveOutcome::Disposed),
        };

        match self.receive_loop(reader, &cancel).await {
            Err(FramewireError::Io(e)) if is_disconnect(&e) => {
                tracing::trace!(error = %e, "transport reported disconnect");
                Ok(ReceiveOutcome::PeerClosed)
            }
            other => other,
        }
    }

    async fn receive_loop(
        self: &Arc<Self>,
        reader: &mut FrameReader<BoxedReader>,
        cancel: &CancelToken,
    ) -> Result<ReceiveOutcome> {
        // Message whose payload the handler keeps until the next frame starts.
        let mut retained: Option<MessageRef> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(ReceiveOutcome::Cancelled);
            }

            let header = tokio::select! {
                biased;
                _ = self.close.cancelled() => return Ok(ReceiveOutcome::Disposed),
                result = read_header(reader, self.config.idle_timeout) => match result? {
                    HeaderRead::Header(header) => header,
                    HeaderRead::Eof => return Ok(ReceiveOutcome::PeerClosed),
                    HeaderRead::Idle => return Ok(ReceiveOutcome::IdleTimeout),
                },
            };
            drop(retained.take());

            tracing::trace!(
                message_type = header.message_type,
                flags = header.flags,
                handle = header.handle.get(),
                length = header.length,
                "frame header"
            );

            let payload = tokio::select! {
                biased;
                _ = self.close.cancelled() => return Ok(ReceiveOutcome::Disposed),
                result = reader.read_payload(&header) => match result? {
                    Some(payload) => payload,
                    None => return Ok(ReceiveOutcome::PeerClosed),
                },
            };

            let message = self.registry.decode(header, payload);
            tracing::debug!(
                message_type = message.message_type(),
                length = message.length(),
                faulted = message.faulted(),
                "message received"
            );

            self.deliver(&message);

            if !message.auto_close_stream() {
                retained = Some(message);
            }
        }
    }

    fn deliver(self: &Arc<Self>, message: &MessageRef) {
        let callbacks = self.callbacks.read().clone();
        for callback in &callbacks {
            callback(self, message);
        }
    }

    /// Queue a frame for the peer.
    pub async fn send(
        &self,
        message_type: u16,
        handle: impl Into<RequestHandle>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.send_frame(message_type, 0, handle.into(), payload.into())
            .await
    }

    /// Reply to `request`, copying its type and correlation handle.
    pub async fn respond(&self, request: &dyn FramedMessage, payload: impl Into<Bytes>) -> Result<()> {
        self.send_frame(
            request.message_type(),
            flags::IS_RESPONSE,
            request.handle(),
            payload.into(),
        )
        .await
    }

    /// Reply to `request` with a faulted response.
    pub async fn respond_fault(
        &self,
        request: &dyn FramedMessage,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.send_frame(
            request.message_type(),
            flags::FAULTED_RESPONSE,
            request.handle(),
            payload.into(),
        )
        .await
    }

    /// Queue a MsgPack-encoded frame.
    pub async fn send_typed<T: Serialize>(
        &self,
        message_type: u16,
        handle: impl Into<RequestHandle>,
        value: &T,
    ) -> Result<()> {
        let data = MsgPackCodec::encode(value)?;
        self.send(message_type, handle, data).await
    }

    /// Reply to `request` with a MsgPack-encoded body.
    pub async fn respond_typed<T: Serialize>(
        &self,
        request: &dyn FramedMessage,
        value: &T,
    ) -> Result<()> {
        let data = MsgPackCodec::encode(value)?;
        self.respond(request, data).await
    }

    /// Queue a frame without waiting for backpressure to clear.
    ///
    /// # Errors
    ///
    /// - `BackpressureTimeout` if the outbound queue is full
    /// - `ConnectionClosed` once disposed
    pub fn try_send(
        &self,
        message_type: u16,
        handle: impl Into<RequestHandle>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let (writer, frame) = self.outbound(message_type, 0, handle.into(), payload.into())?;
        writer.try_send(frame)
    }

    async fn send_frame(
        &self,
        message_type: u16,
        flags: u8,
        handle: RequestHandle,
        payload: Bytes,
    ) -> Result<()> {
        let (writer, frame) = self.outbound(message_type, flags, handle, payload)?;
        writer.send(frame).await
    }

    fn outbound(
        &self,
        message_type: u16,
        flags: u8,
        handle: RequestHandle,
        payload: Bytes,
    ) -> Result<(WriterHandle, OutboundFrame)> {
        let length = u32::try_from(payload.len()).map_err(|_| {
            FramewireError::Protocol(format!("Payload size {} does not fit a frame", payload.len()))
        })?;

        let writer = self
            .writer
            .lock()
            .clone()
            .ok_or(FramewireError::ConnectionClosed)?;

        let header = Header::new(message_type, flags, handle, length);
        Ok((writer, OutboundFrame::new(&header, payload)))
    }

    /// Frames queued but not yet written. Zero once disposed.
    pub fn pending_frames(&self) -> usize {
        self.writer
            .lock()
            .as_ref()
            .map_or(0, WriterHandle::pending_count)
    }

    /// Whether the outbound queue is at its limit. `false` once disposed.
    pub fn is_backpressured(&self) -> bool {
        self.writer
            .lock()
            .as_ref()
            .is_some_and(WriterHandle::is_backpressure_active)
    }

    /// Abort a running receive loop without waiting for it.
    ///
    /// The loop returns [`ReceiveOutcome::Disposed`]; whoever drives it is
    /// expected to call [`dispose`](Self::dispose) afterwards.
    pub(crate) fn close(&self) {
        self.close.cancel();
    }

    /// Release the connection.
    ///
    /// Aborts a pending read, waits for the receive loop to let go of the
    /// read half, then closes the outbound queue. Frames already queued are
    /// flushed for at most `drain_timeout` before the writer is aborted.
    ///
    /// Idempotent; returns `true` only for the call that performed the
    /// disposal.
    pub async fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.close.cancel();

        // Blocks until a running loop has observed the close token.
        drop(self.reader.lock().await.take());

        drop(self.writer.lock().take());
        let writer_task = self.writer_task.lock().take();
        if let Some(mut task) = writer_task {
            match tokio::time::timeout(self.config.drain_timeout, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::debug!(error = %e, "writer ended with error"),
                Ok(Err(e)) => tracing::debug!(error = %e, "writer task failed"),
                Err(_) => {
                    tracing::debug!(
                        timeout_ms = self.config.drain_timeout.as_millis() as u64,
                        "writer drain timed out"
                    );
                    task.abort();
                }
            }
        }

        self.callbacks.write().clear();
        tracing::trace!(connection = %self.id, "connection disposed");
        true
    }
}

impl fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

enum HeaderRead {
    Header(Header),
    Eof,
    Idle,
}

async fn read_header(
    reader: &mut FrameReader<BoxedReader>,
    idle_timeout: Option<std::time::Duration>,
) -> Result<HeaderRead> {
    let result = match idle_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, reader.read_header()).await {
            Ok(result) => result,
            Err(_) => return Ok(HeaderRead::Idle),
        },
        None => reader.read_header().await,
    };

    Ok(match result? {
        Some(header) => HeaderRead::Header(header),
        None => HeaderRead::Eof,
    })
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
