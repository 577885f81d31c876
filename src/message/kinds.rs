//! Built-in message kinds.

use std::any::Any;
use std::fmt;

use bytes::Bytes;
use thiserror::Error;

use super::FramedMessage;
use crate::protocol::Header;

/// Message carrying the payload exactly as it arrived.
#[derive(Debug, Clone)]
pub struct RawMessage {
    header: Header,
    payload: Bytes,
    auto_close: bool,
}

impl RawMessage {
    /// Create a raw message.
    pub fn new(header: Header, payload: Bytes) -> Self {
        debug_assert_eq!(header.length as usize, payload.len());
        Self {
            header,
            payload,
            auto_close: true,
        }
    }

    /// Keep the handler responsible for releasing the payload.
    pub fn retain_stream(mut self) -> Self {
        self.auto_close = false;
        self
    }
}

impl FramedMessage for RawMessage {
    fn header(&self) -> &Header {
        &self.header
    }

    fn payload(&self) -> &Bytes {
        &self.payload
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn auto_close_stream(&self) -> bool {
        self.auto_close
    }
}

/// Message whose payload was decoded into `T` with MessagePack.
pub struct TypedMessage<T> {
    header: Header,
    payload: Bytes,
    value: T,
}

impl<T> TypedMessage<T> {
    /// Create a typed message from an already decoded value.
    pub fn new(header: Header, payload: Bytes, value: T) -> Self {
        Self {
            header,
            payload,
            value,
        }
    }

    /// Decoded body.
    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for TypedMessage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedMessage")
            .field("header", &self.header)
            .field("value", &self.value)
            .finish()
    }
}

impl<T> FramedMessage for TypedMessage<T>
where
    T: fmt::Debug + Send + Sync + 'static,
{
    fn header(&self) -> &Header {
        &self.header
    }

    fn payload(&self) -> &Bytes {
        &self.payload
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Why a frame was delivered as a [`FaultedMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FaultReason {
    /// No constructor registered for the message type.
    #[error("unknown message type {0}")]
    UnknownType(u16),

    /// Envelope fields that do not affect framing were invalid.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// The type-specific constructor rejected the payload.
    #[error("payload decode failed: {0}")]
    Decode(String),
}

/// Frame that could be read off the wire but not turned into its message type.
///
/// Wraps the raw payload so consumers can still inspect or log it. Always
/// reports `faulted() == true`.
#[derive(Debug, Clone)]
pub struct FaultedMessage {
    header: Header,
    payload: Bytes,
    reason: FaultReason,
}

impl FaultedMessage {
    /// Create a faulted message.
    pub fn new(header: Header, payload: Bytes, reason: FaultReason) -> Self {
        Self {
            header,
            payload,
            reason,
        }
    }

    /// Why decoding failed.
    pub fn reason(&self) -> &FaultReason {
        &self.reason
    }
}

impl FramedMessage for FaultedMessage {
    fn header(&self) -> &Header {
        &self.header
    }

    fn payload(&self) -> &Bytes {
        &self.payload
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn faulted(&self) -> bool {
        true
    }
}
