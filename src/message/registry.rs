//! Message registry for decoding frames by message type.
//!
//! The registry maps wire message types to constructors. Decoding never
//! fails: a frame that cannot become its registered message kind is
//! delivered as a [`FaultedMessage`] wrapping the raw bytes, so one bad frame
//! does not tear down an otherwise healthy connection.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use framewire::codec::MsgPackCodec;
//! use framewire::protocol::Header;
//! use framewire::{FramedMessage, MessageRegistry, TypedMessage};
//!
//! let mut registry = MessageRegistry::new();
//! registry.register_typed::<String>(7, "greeting");
//!
//! let body = Bytes::from(MsgPackCodec::encode(&"hi").unwrap());
//! let header = Header::new(7, 0, 1, body.len() as u32);
//! let message = registry.decode(header, body);
//!
//! let typed = message.downcast_ref::<TypedMessage<String>>().unwrap();
//! assert_eq!(typed.value(), "hi");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::{FaultReason, FaultedMessage, MessageRef, RawMessage, TypedMessage};
use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::protocol::Header;

/// Trait for message constructors.
pub trait MessageFactory: Send + Sync + 'static {
    /// Build a message from a complete frame.
    ///
    /// `payload` holds exactly `header.length` bytes. Returning an error
    /// makes the registry deliver a [`FaultedMessage`] instead.
    fn build(&self, header: Header, payload: Bytes) -> Result<MessageRef>;
}

impl<F> MessageFactory for F
where
    F: Fn(Header, Bytes) -> Result<MessageRef> + Send + Sync + 'static,
{
    fn build(&self, header: Header, payload: Bytes) -> Result<MessageRef> {
        (self)(header, payload)
    }
}

/// Constructor producing [`RawMessage`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFactory;

impl MessageFactory for RawFactory {
    fn build(&self, header: Header, payload: Bytes) -> Result<MessageRef> {
        Ok(Arc::new(RawMessage::new(header, payload)))
    }
}

/// Constructor that deserializes the payload with MsgPack.
pub struct TypedFactory<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> TypedFactory<T> {
    /// Create a new typed factory.
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for TypedFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageFactory for TypedFactory<T>
where
    T: DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    fn build(&self, header: Header, payload: Bytes) -> Result<MessageRef> {
        let value: T = MsgPackCodec::decode(&payload)?;
        Ok(Arc::new(TypedMessage::new(header, payload, value)))
    }
}

/// Entry for a registered message type.
struct TypeEntry {
    /// Human-readable name, used in logs.
    name: String,
    /// The constructor.
    factory: Box<dyn MessageFactory>,
}

/// Registry mapping message types to constructors.
#[derive(Default)]
pub struct MessageRegistry {
    /// Constructors by message type.
    types: HashMap<u16, TypeEntry>,
}

impl MessageRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Register a constructor for `message_type`, replacing any previous one.
    ///
    /// `factory` is either a [`MessageFactory`] implementation or a closure
    /// `Fn(Header, Bytes) -> Result<MessageRef>`.
    pub fn register<F>(&mut self, message_type: u16, name: &str, factory: F)
    where
        F: MessageFactory,
    {
        let previous = self.types.insert(
            message_type,
            TypeEntry {
                name: name.to_string(),
                factory: Box::new(factory),
            },
        );

        if let Some(previous) = previous {
            tracing::debug!(
                message_type,
                previous = %previous.name,
                name,
                "replaced message type registration"
            );
        }
    }

    /// Register `message_type` as a raw message.
    pub fn register_raw(&mut self, message_type: u16, name: &str) {
        self.register(message_type, name, RawFactory);
    }

    /// Register `message_type` as a MsgPack-encoded `T`.
    pub fn register_typed<T>(&mut self, message_type: u16, name: &str)
    where
        T: DeserializeOwned + fmt::Debug + Send + Sync + 'static,
    {
        self.register(message_type, name, TypedFactory::<T>::new());
    }

    /// Check whether a message type is registered.
    pub fn contains(&self, message_type: u16) -> bool {
        self.types.contains_key(&message_type)
    }

    /// Get the registered name of a message type.
    pub fn get_type_name(&self, message_type: u16) -> Option<&str> {
        self.types.get(&message_type).map(|e| e.name.as_str())
    }

    /// Number of registered message types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if no message types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Build the message for a complete frame.
    ///
    /// Never fails. Invalid envelopes, unknown message types and constructor
    /// errors all yield a [`FaultedMessage`] carrying the raw payload.
    pub fn decode(&self, header: Header, payload: Bytes) -> MessageRef {
        if let Err(e) = header.validate() {
            return Arc::new(FaultedMessage::new(
                header,
                payload,
                FaultReason::Malformed(e.to_string()),
            ));
        }

        let entry = match self.types.get(&header.message_type) {
            Some(entry) => entry,
            None => {
                tracing::debug!(
                    message_type = header.message_type,
                    length = header.length,
                    "unknown message type"
                );
                return Arc::new(FaultedMessage::new(
                    header,
                    payload,
                    FaultReason::UnknownType(header.message_type),
                ));
            }
        };

        match entry.factory.build(header, payload.clone()) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(
                    message_type = header.message_type,
                    name = %entry.name,
                    error = %e,
                    "message constructor failed"
                );
                Arc::new(FaultedMessage::new(
                    header,
                    payload,
                    FaultReason::Decode(e.to_string()),
                ))
            }
        }
    }
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self
            .types
            .iter()
            .map(|(id, entry)| (*id, entry.name.as_str()))
            .collect();
        types.sort_unstable();
        f.debug_struct("MessageRegistry").field("types", &types).finish()
    }
}
