//! Bounded payload stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, ReadBuf};

/// Read-only view over exactly one frame's payload.
///
/// The stream is bounded by construction: it yields at most the bytes of a
/// single frame and then reports end of stream. Cloning the underlying
/// [`Bytes`] is cheap, so each call to
/// [`FramedMessage::stream`](super::FramedMessage::stream) hands out an
/// independent cursor over the same buffer.
///
/// Usable as [`std::io::Read`], [`tokio::io::AsyncRead`] or [`bytes::Buf`].
#[derive(Debug, Clone, Default)]
pub struct PayloadStream {
    data: Bytes,
}

impl PayloadStream {
    /// Create a stream over `data`.
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the stream is exhausted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take the unread remainder without copying.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl io::Read for PayloadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data.advance(n);
        Ok(n)
    }
}

impl AsyncRead for PayloadStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let n = buf.remaining().min(self.data.len());
        buf.put_slice(&self.data[..n]);
        self.data.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl Buf for PayloadStream {
    #[inline]
    fn remaining(&self) -> usize {
        self.data.remaining()
    }

    #[inline]
    fn chunk(&self) -> &[u8] {
        self.data.chunk()
    }

    #[inline]
    fn advance(&mut self, cnt: usize) {
        self.data.advance(cnt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_stops_at_end_of_payload() {
        use std::io::Read;

        let mut stream = PayloadStream::new(Bytes::from_static(b"hello"));
        let mut buf = [0u8; 16];

        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert!(stream.is_empty());
    }

    #[test]
    fn test_partial_reads() {
        use std::io::Read;

        let mut stream = PayloadStream::new(Bytes::from_static(b"abcdef"));
        let mut buf = [0u8; 4];

        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.into_bytes(), Bytes::from_static(b"ef"));
    }

    #[tokio::test]
    async fn test_async_read_to_end() {
        use tokio::io::AsyncReadExt;

        let mut stream = PayloadStream::new(Bytes::from_static(b"async body"));
        let mut out = Vec::new();

        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"async body");
    }

    #[test]
    fn test_buf_accessors() {
        let mut stream = PayloadStream::new(Bytes::from_static(&[0, 0, 0, 7, 1]));

        assert_eq!(stream.get_u32(), 7);
        assert_eq!(stream.remaining(), 1);
    }
}
