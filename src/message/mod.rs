//! Message module - the framed message contract and its decoders.
//!
//! Provides:
//! - [`FramedMessage`] - the unit delivered to consumers
//! - [`RawMessage`], [`TypedMessage`], [`FaultedMessage`] - built-in message kinds
//! - [`MessageRegistry`] - maps wire message types to constructors
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use framewire::protocol::Header;
//! use framewire::{FramedMessage, MessageRegistry, RawMessage};
//!
//! let mut registry = MessageRegistry::new();
//! registry.register_raw(1, "ping");
//!
//! let message = registry.decode(Header::new(1, 0, 0, 4), Bytes::from_static(b"ping"));
//! assert_eq!(message.message_type(), 1);
//! assert!(message.downcast_ref::<RawMessage>().is_some());
//! ```

mod kinds;
mod payload;
mod registry;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::{Header, RequestHandle};

pub use kinds::{FaultReason, FaultedMessage, RawMessage, TypedMessage};
pub use payload::PayloadStream;
pub use registry::{MessageFactory, MessageRegistry, RawFactory, TypedFactory};

/// Shared handle to a decoded message.
pub type MessageRef = Arc<dyn FramedMessage>;

/// A decoded frame: envelope fields plus a bounded payload stream.
///
/// Implementations are immutable once built. `length()` is fixed at
/// construction and [`stream`](FramedMessage::stream) never yields more than
/// `length()` bytes.
pub trait FramedMessage: Any + Send + Sync + fmt::Debug {
    /// Envelope this message was decoded from.
    fn header(&self) -> &Header;

    /// Raw payload bytes.
    fn payload(&self) -> &Bytes;

    /// Upcast for [`downcast_ref`](trait.FramedMessage.html#method.downcast_ref).
    fn as_any(&self) -> &dyn Any;

    /// Whether decoding hit a recoverable problem, or the sender flagged
    /// the frame as faulted.
    fn faulted(&self) -> bool {
        self.header().is_faulted()
    }

    /// Whether the consumer owns the payload once the message is delivered.
    ///
    /// When `false` the connection handler keeps its reference until the
    /// next frame boundary and releases it there.
    fn auto_close_stream(&self) -> bool {
        true
    }

    /// Payload length announced on the wire.
    #[inline]
    fn length(&self) -> u32 {
        self.header().length
    }

    /// Message type identifier.
    #[inline]
    fn message_type(&self) -> u16 {
        self.header().message_type
    }

    /// Correlation handle.
    #[inline]
    fn handle(&self) -> RequestHandle {
        self.header().handle
    }

    /// Fresh stream over the payload, bounded to `length()` bytes.
    fn stream(&self) -> PayloadStream {
        let payload = self.payload();
        let end = payload.len().min(self.length() as usize);
        PayloadStream::new(payload.slice(..end))
    }
}

impl dyn FramedMessage {
    /// Downcast to a concrete message kind.
    pub fn downcast_ref<M: FramedMessage>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }

    /// Check the concrete message kind.
    pub fn is<M: FramedMessage>(&self) -> bool {
        self.as_any().is::<M>()
    }
}
