//! Wire format encoding and decoding.
//!
//! Implements the 11-byte frame envelope:
//! ```text
//! ┌──────────┬───────┬──────────┬──────────┐
//! │ Type     │ Flags │ Handle   │ Length   │
//! │ 2 bytes  │ 1 byte│ 4 bytes  │ 4 bytes  │
//! │ uint16 BE│       │ uint32 BE│ uint32 BE│
//! └──────────┴───────┴──────────┴──────────┘
//! ```
//!
//! Exactly `Length` payload bytes follow the header.
//! All multi-byte integers are Big Endian.

use std::fmt;

use crate::error::{FramewireError, Result};

/// Header size in bytes (fixed, exactly 11).
pub const HEADER_SIZE: usize = 11;

/// Default maximum payload size (16 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Reserved message type (never use).
pub const RESERVED_MESSAGE_TYPE: u16 = 0;

/// Flag constants for the envelope.
pub mod flags {
    /// Fault flag: the sender marks this frame as an error/fault.
    pub const FAULTED: u8 = 0b0000_0001;
    /// Message kind: response (1) or request/event (0).
    pub const IS_RESPONSE: u8 = 0b0000_0010;

    /// Reserved bits mask (bits 2-7).
    pub const RESERVED_MASK: u8 = 0b1111_1100;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }

    /// Faulted response flags: is_response + faulted = 0x03
    pub const FAULTED_RESPONSE: u8 = IS_RESPONSE | FAULTED;
}

/// Opaque correlation identifier carried by every frame.
///
/// Lets a consumer match an inbound message to an outstanding request.
/// `RequestHandle::NONE` (0) marks a frame that carries no handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct RequestHandle(pub u32);

impl RequestHandle {
    /// The "no handle" value.
    pub const NONE: RequestHandle = RequestHandle(0);

    /// Raw wire value.
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Whether this frame carries no correlation handle.
    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for RequestHandle {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message type identifier (0 reserved).
    pub message_type: u16,
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Correlation handle (0 = none).
    pub handle: RequestHandle,
    /// Payload length in bytes.
    pub length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(message_type: u16, flags: u8, handle: impl Into<RequestHandle>, length: u32) -> Self {
        Self {
            message_type,
            flags,
            handle: handle.into(),
            length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use framewire::protocol::{Header, flags};
    ///
    /// let header = Header::new(1, flags::IS_RESPONSE, 42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 11);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (11 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.message_type.to_be_bytes());
        buf[2] = self.flags;
        buf[3..7].copy_from_slice(&self.handle.0.to_be_bytes());
        buf[7..11].copy_from_slice(&self.length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use framewire::protocol::Header;
    ///
    /// let bytes = [0, 1, 0x02, 0, 0, 0, 42, 0, 0, 0, 100];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.message_type, 1);
    /// assert_eq!(header.handle.get(), 42);
    /// assert_eq!(header.length, 100);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            message_type: u16::from_be_bytes([buf[0], buf[1]]),
            flags: buf[2],
            handle: RequestHandle(u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]])),
            length: u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]),
        })
    }

    /// Check that the frame can be read off the wire.
    ///
    /// Only the length can make a frame unreadable: a frame whose payload
    /// exceeds `max_payload_size` cannot be skipped safely, so the connection
    /// has to end.
    pub fn check_length(&self, max_payload_size: u32) -> Result<()> {
        if self.length > max_payload_size {
            return Err(FramewireError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.length, max_payload_size
            )));
        }
        Ok(())
    }

    /// Validate the envelope fields that do not affect framing.
    ///
    /// Checks:
    /// - Message type is not 0 (reserved)
    /// - Reserved flag bits are 0
    ///
    /// A frame failing these checks is still aligned on the wire; callers
    /// turn it into a faulted message instead of dropping the connection.
    pub fn validate(&self) -> Result<()> {
        if self.message_type == RESERVED_MESSAGE_TYPE {
            return Err(FramewireError::Protocol(
                "Message type 0 is reserved".to_string(),
            ));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(FramewireError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if the sender flagged this frame as faulted.
    #[inline]
    pub fn is_faulted(&self) -> bool {
        flags::has_flag(self.flags, flags::FAULTED)
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_RESPONSE)
    }
}
