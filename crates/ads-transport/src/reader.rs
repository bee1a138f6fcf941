//! AMS packet reader.
//!
//! This module provides [`AmsReader`], a typed wrapper around a framed
//! async reader that produces a stream of AMS packets.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use pin_project_lite::pin_project;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::codec::AmsCodec;
use crate::error::CodecError;
use crate::packet::AmsPacket;

pin_project! {
    /// An async stream of incoming AMS packets.
    ///
    /// `AmsReader` wraps an [`AsyncRead`] source and decodes AMS/TCP frames
    /// from the byte stream. A malformed frame surfaces as a recoverable
    /// [`CodecError::Packet`] item and the stream keeps going; any other error
    /// ends the stream.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use futures::StreamExt;
    /// use ads_transport::AmsReader;
    ///
    /// let mut reader = AmsReader::new(tcp_read_half);
    ///
    /// while let Some(result) = reader.next().await {
    ///     match result {
    ///         Ok(packet) => { /* dispatch by invoke id */ }
    ///         Err(e) if e.is_recoverable() => continue,
    ///         Err(e) => return Err(e),
    ///     }
    /// }
    /// ```
    pub struct AmsReader<R> {
        #[pin]
        inner: FramedRead<R, AmsCodec>,
    }
}

impl<R> AmsReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a new AMS reader from an async read source.
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, AmsCodec::new()),
        }
    }

    /// Create a new AMS reader with a custom codec.
    ///
    /// This allows configuring options like maximum frame size.
    pub fn with_codec(reader: R, codec: AmsCodec) -> Self {
        Self {
            inner: FramedRead::new(reader, codec),
        }
    }

    /// Consume the reader and return the underlying source.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R> Stream for AmsReader<R>
where
    R: AsyncRead + Unpin,
{
    type Item = Result<AmsPacket, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.project().inner.poll_next(cx) {
            Poll::Ready(Some(Ok(Ok(packet)))) => Poll::Ready(Some(Ok(packet))),
            Poll::Ready(Some(Ok(Err(e)))) => Poll::Ready(Some(Err(CodecError::Packet(e)))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
