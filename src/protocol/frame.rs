//! Frame building helpers.
//!
//! # Example
//!
//! ```
//! use framewire::protocol::{build_frame, Header, HEADER_SIZE};
//!
//! let header = Header::new(1, 0, 42, 5);
//! let bytes = build_frame(&header, b"hello");
//! assert_eq!(bytes.len(), HEADER_SIZE + 5);
//! ```

use super::wire_format::{Header, RequestHandle, HEADER_SIZE};

/// Build a complete frame as a single byte vector.
///
/// Encodes header and appends payload into a contiguous buffer.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Build a frame whose header length matches `payload`.
pub fn encode_frame(message_type: u16, flags: u8, handle: impl Into<RequestHandle>, payload: &[u8]) -> Vec<u8> {
    let header = Header::new(message_type, flags, handle, payload.len() as u32);
    build_frame(&header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::flags;

    #[test]
    fn test_build_frame() {
        let header = Header::new(1, flags::IS_RESPONSE, 42, 5);
        let bytes = build_frame(&header, b"hello");

        assert_eq!(bytes.len(), HEADER_SIZE + 5);

        let parsed_header = Header::decode(&bytes[..HEADER_SIZE]).unwrap();
        assert_eq!(parsed_header, header);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_build_frame_empty_payload() {
        let header = Header::new(1, 0, 1, 0);
        let bytes = build_frame(&header, b"");

        assert_eq!(bytes.len(), HEADER_SIZE);
    }

    #[test]
    fn test_encode_frame_sets_length() {
        let bytes = encode_frame(3, flags::FAULTED, 7, b"abcd");
        let header = Header::decode(&bytes).unwrap();

        assert_eq!(header.message_type, 3);
        assert_eq!(header.length, 4);
        assert!(header.is_faulted());
        assert_eq!(header.handle.get(), 7);
    }
}
