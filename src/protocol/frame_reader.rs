//! Frame reader over an async byte stream.
//!
//! Reads one frame at a time in two phases:
//! - `read_header`: Need exactly 11 bytes
//! - `read_payload`: Header parsed, need exactly `length` more bytes
//!
//! Partial progress is kept inside the reader, so both phases are cancel
//! safe: dropping a pending read (e.g. from `tokio::select!`) and calling it
//! again resumes where it stopped without losing bytes.
//!
//! # Example
//!
//! ```
//! use framewire::protocol::{encode_frame, FrameReader};
//!
//! # tokio_test_block(async {
//! let wire = encode_frame(1, 0, 0, b"hello");
//! let mut reader = FrameReader::new(&wire[..]);
//!
//! let header = reader.read_header().await.unwrap().unwrap();
//! let payload = reader.read_payload(&header).await.unwrap().unwrap();
//! assert_eq!(&payload[..], b"hello");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use crate::error::Result;

/// Read buffer capacity (64KB).
const READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// Reads framed messages off an async stream.
pub struct FrameReader<R> {
    /// Buffered source.
    reader: BufReader<R>,
    /// Header bytes received so far.
    header_buf: [u8; HEADER_SIZE],
    /// Number of valid bytes in `header_buf`.
    header_filled: usize,
    /// Payload bytes received so far for the current frame.
    payload: BytesMut,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new frame reader with default settings (max payload: 16MB).
    pub fn new(reader: R) -> Self {
        Self::with_max_payload(reader, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame reader with custom max payload size.
    pub fn with_max_payload(reader: R, max_payload_size: u32) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_CAPACITY, reader),
            header_buf: [0u8; HEADER_SIZE],
            header_filled: 0,
            payload: BytesMut::new(),
            max_payload_size,
        }
    }

    /// Read the next frame header.
    ///
    /// Returns:
    /// - `Ok(Some(header))` once all 11 header bytes have arrived
    /// - `Ok(None)` if the stream ended, either cleanly at a frame boundary
    ///   or in the middle of a header
    /// - `Err(...)` on I/O failure or if the announced payload exceeds the
    ///   maximum size
    pub async fn read_header(&mut self) -> Result<Option<Header>> {
        while self.header_filled < HEADER_SIZE {
            let n = self
                .reader
                .read(&mut self.header_buf[self.header_filled..])
                .await?;

            if n == 0 {
                if self.header_filled > 0 {
                    tracing::trace!(
                        received = self.header_filled,
                        "stream ended inside a frame header"
                    );
                }
                return Ok(None);
            }

            self.header_filled += n;
        }

        self.header_filled = 0;
        let header = match Header::decode(&self.header_buf) {
            Some(header) => header,
            None => return Ok(None),
        };

        header.check_length(self.max_payload_size)?;

        self.payload.clear();

        Ok(Some(header))
    }

    /// Read exactly `header.length` payload bytes.
    ///
    /// Returns `Ok(None)` if the stream ends before the payload is complete.
    /// Never consumes bytes past the end of the frame.
    ///
    /// The buffer grows at most one read buffer ahead of the bytes actually
    /// received, whatever length the header announces.
    pub async fn read_payload(&mut self, header: &Header) -> Result<Option<Bytes>> {
        let length = header.length as usize;

        while self.payload.len() < length {
            let remaining = length - self.payload.len();
            if self.payload.capacity() == self.payload.len() {
                self.payload.reserve(remaining.min(READ_BUFFER_CAPACITY));
            }

            let n = self
                .reader
                .read_buf(&mut (&mut self.payload).limit(remaining))
                .await?;

            if n == 0 {
                tracing::trace!(
                    expected = length,
                    received = self.payload.len(),
                    "stream ended inside a frame payload"
                );
                self.payload.clear();
                return Ok(None);
            }
        }

        Ok(Some(self.payload.split().freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_frame, flags};
    use tokio::io::{duplex, AsyncWriteExt};

    async fn read_frame<R: AsyncRead + Unpin>(reader: &mut FrameReader<R>) -> Option<(Header, Bytes)> {
        let header = reader.read_header().await.unwrap()?;
        let payload = reader.read_payload(&header).await.unwrap()?;
        Some((header, payload))
    }

    #[tokio::test]
    async fn test_single_complete_frame() {
        let wire = encode_frame(1, flags::IS_RESPONSE, 42, b"hello");
        let mut reader = FrameReader::new(&wire[..]);

        let (header, payload) = read_frame(&mut reader).await.unwrap();

        assert_eq!(header.message_type, 1);
        assert_eq!(header.handle.get(), 42);
        assert_eq!(&payload[..], b"hello");
        assert!(read_frame(&mut reader).await.is_none());
    }

    #[tokio::test]
    async fn test_multiple_frames_in_order() {
        let mut wire = Vec::new();
        wire.extend(encode_frame(1, 0, 1, b"first"));
        wire.extend(encode_frame(2, 0, 2, b"second"));
        wire.extend(encode_frame(3, 0, 3, b"third"));

        let mut reader = FrameReader::new(&wire[..]);

        for (expected_type, expected_payload) in [
            (1, &b"first"[..]),
            (2, &b"second"[..]),
            (3, &b"third"[..]),
        ] {
            let (header, payload) = read_frame(&mut reader).await.unwrap();
            assert_eq!(header.message_type, expected_type);
            assert_eq!(&payload[..], expected_payload);
        }
    }

    #[tokio::test]
    async fn test_fragmented_header_and_payload() {
        let (mut client, server) = duplex(64);
        let wire = encode_frame(9, 0, 77, b"this payload arrives in pieces");

        let writer = tokio::spawn(async move {
            for chunk in wire.chunks(3) {
                client.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let mut reader = FrameReader::new(server);
        let (header, payload) = read_frame(&mut reader).await.unwrap();

        assert_eq!(header.message_type, 9);
        assert_eq!(&payload[..], b"this payload arrives in pieces");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let wire = encode_frame(1, 0, 0, b"");
        let mut reader = FrameReader::new(&wire[..]);

        let (header, payload) = read_frame(&mut reader).await.unwrap();
        assert_eq!(header.length, 0);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_clean_eof_at_boundary() {
        let wire: Vec<u8> = Vec::new();
        let mut reader = FrameReader::new(&wire[..]);

        assert!(reader.read_header().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_header() {
        let wire = encode_frame(1, 0, 42, b"test");
        let mut reader = FrameReader::new(&wire[..5]);

        assert!(reader.read_header().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_payload() {
        let wire = encode_frame(1, 0, 42, b"hello");
        let mut reader = FrameReader::new(&wire[..HEADER_SIZE + 2]);

        let header = reader.read_header().await.unwrap().unwrap();
        assert_eq!(header.length, 5);
        assert!(reader.read_payload(&header).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_max_payload_validation() {
        let wire = Header::new(1, 0, 42, 1000).encode();
        let mut reader = FrameReader::with_max_payload(&wire[..], 100);

        let err = reader.read_header().await.unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[tokio::test]
    async fn test_payload_read_does_not_overrun_frame() {
        let mut wire = encode_frame(1, 0, 1, b"ab");
        wire.extend(encode_frame(2, 0, 2, b"cd"));
        let mut reader = FrameReader::new(&wire[..]);

        let (_, first) = read_frame(&mut reader).await.unwrap();
        assert_eq!(&first[..], b"ab");

        let (header, second) = read_frame(&mut reader).await.unwrap();
        assert_eq!(header.message_type, 2);
        assert_eq!(&second[..], b"cd");
    }

    #[tokio::test]
    async fn test_header_read_resumes_after_cancel() {
        let (mut client, server) = duplex(64);
        let wire = encode_frame(4, 0, 8, b"xyz");
        let mut reader = FrameReader::new(server);

        client.write_all(&wire[..4]).await.unwrap();

        // Give up on the first attempt while the header is incomplete.
        let attempt = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            reader.read_header(),
        )
        .await;
        assert!(attempt.is_err());

        client.write_all(&wire[4..]).await.unwrap();

        let (header, payload) = read_frame(&mut reader).await.unwrap();
        assert_eq!(header.message_type, 4);
        assert_eq!(&payload[..], b"xyz");
    }

    #[tokio::test]
    async fn test_byte_at_a_time() {
        let (mut client, server) = duplex(1);
        let wire = encode_frame(1, 0, 42, b"hi");

        let writer = tokio::spawn(async move {
            for byte in wire {
                client.write_all(&[byte]).await.unwrap();
            }
        });

        let mut reader = FrameReader::new(server);
        let (header, payload) = read_frame(&mut reader).await.unwrap();

        assert_eq!(header.message_type, 1);
        assert_eq!(&payload[..], b"hi");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_announced_length_does_not_preallocate() {
        let (mut tx, rx) = duplex(1024);
        let mut reader = FrameReader::new(rx);

        tx.write_all(&Header::new(1, 0, 0, DEFAULT_MAX_PAYLOAD_SIZE).encode())
            .await
            .unwrap();
        let header = reader.read_header().await.unwrap().unwrap();
        assert!(reader.payload.capacity() <= READ_BUFFER_CAPACITY);

        tx.write_all(&[7u8; 100]).await.unwrap();
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            reader.read_payload(&header),
        )
        .await;
        assert!(pending.is_err());
        assert_eq!(reader.payload.len(), 100);
        assert!(reader.payload.capacity() <= READ_BUFFER_CAPACITY);
    }
}
