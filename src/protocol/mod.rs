//! Protocol module - wire format and framing.
//!
//! This module implements the frame envelope:
//! - 11-byte header encoding/decoding
//! - Frame reader for pulling header and payload off a stream
//! - Frame builders for the outbound side

mod frame;
mod frame_reader;
mod wire_format;

pub use frame::{build_frame, encode_frame};
pub use frame_reader::FrameReader;
pub use wire_format::{
    flags, Header, RequestHandle, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, RESERVED_MESSAGE_TYPE,
};
