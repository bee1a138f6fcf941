//! AMS packet writer.
//!
//! This module provides [`AmsWriter`], a typed wrapper around a framed
//! async writer for sending AMS packets.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Sink;
use pin_project_lite::pin_project;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;

use crate::codec::AmsCodec;
use crate::error::CodecError;
use crate::packet::AmsPacket;

pin_project! {
    /// An async sink for outgoing AMS packets.
    ///
    /// `AmsWriter` wraps an [`AsyncWrite`] destination and frames every
    /// packet with the AMS/TCP prefix.
    pub struct AmsWriter<W> {
        #[pin]
        inner: FramedWrite<W, AmsCodec>,
    }
}

impl<W> AmsWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a new AMS writer from an async write destination.
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, AmsCodec::new()),
        }
    }

    /// Send a packet: feed, flush and await completion.
    pub async fn send(&mut self, packet: AmsPacket) -> Result<(), CodecError> {
        use futures::SinkExt;
        SinkExt::send(&mut self.inner, packet).await
    }

    /// Consume the writer and return the underlying destination.
    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

impl<W> Sink<AmsPacket> for AmsWriter<W>
where
    W: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: AmsPacket) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}
