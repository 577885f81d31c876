//! MsgPack codec using `rmp-serde`.
//!
//! Structs are encoded with `to_vec_named` (struct-as-map, with field
//! names) so peers written against other MessagePack libraries can decode
//! them without knowing the field order.
//!
//! # Example
//!
//! ```
//! use framewire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Message = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use crate::error::Result;

/// MessagePack codec for structured payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Login {
        user: String,
        attempt: u8,
        remember: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = Login {
            user: "ada".to_string(),
            attempt: 2,
            remember: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: Login = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_structs_encode_as_maps() {
        let login = Login {
            user: "x".to_string(),
            attempt: 0,
            remember: false,
        };

        let encoded = MsgPackCodec::encode(&login).unwrap();

        // 0x83 = fixmap with 3 entries; positional encoding would be 0x93.
        assert_eq!(encoded[0], 0x83, "Expected fixmap, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Login> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_error_on_truncated_data() {
        let encoded = MsgPackCodec::encode(&vec!["alpha", "beta"]).unwrap();
        let result: Result<Vec<String>> = MsgPackCodec::decode(&encoded[..encoded.len() - 2]);
        assert!(result.is_err());
    }

    #[test]
    fn test_none_encodes_as_nil() {
        let val: Option<i32> = None;
        let encoded = MsgPackCodec::encode(&val).unwrap();

        assert_eq!(encoded, vec![0xc0]);

        let decoded: Option<i32> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, None);
    }
}
