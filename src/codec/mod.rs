//! Codec module - serialization for typed message bodies.
//!
//! The frame envelope carries opaque payload bytes. Message types that want
//! structured bodies use [`MsgPackCodec`], both when decoding inbound frames
//! (see [`MessageRegistry::register_typed`](crate::MessageRegistry::register_typed))
//! and when sending typed replies.
//!
//! # Example
//!
//! ```
//! use framewire::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
