//! Transport abstraction and split functionality.
//!
//! This module provides the [`AmsTransport`] trait for abstracting over
//! different async byte streams, and the [`split`] function for creating
//! reader/writer pairs.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::codec::AmsCodec;
use crate::reader::AmsReader;
use crate::writer::AmsWriter;

/// A transport that can be split into separate read and write halves.
///
/// This trait abstracts over TCP and in-memory streams so the driver can run
/// unchanged against a real PLC or a scripted one in tests.
pub trait AmsTransport: Send + 'static {
    /// The read half type.
    type Read: AsyncRead + Unpin + Send + 'static;
    /// The write half type.
    type Write: AsyncWrite + Unpin + Send + 'static;

    /// Split the transport into separate read and write halves.
    fn into_split(self) -> (Self::Read, Self::Write);
}

impl AmsTransport for TcpStream {
    type Read = OwnedReadHalf;
    type Write = OwnedWriteHalf;

    fn into_split(self) -> (Self::Read, Self::Write) {
        TcpStream::into_split(self)
    }
}

/// Split a transport into an AMS reader and writer pair.
///
/// The halves can be used independently and concurrently: one task owns the
/// reader and dispatches inbound packets while any number of callers share
/// the writer.
pub fn split<T: AmsTransport>(transport: T) -> (AmsReader<T::Read>, AmsWriter<T::Write>) {
    let (read, write) = transport.into_split();
    (AmsReader::new(read), AmsWriter::new(write))
}

/// Like [`split`], decoding with the given codec settings.
pub fn split_with_codec<T: AmsTransport>(
    transport: T,
    codec: AmsCodec,
) -> (AmsReader<T::Read>, AmsWriter<T::Write>) {
    let (read, write) = transport.into_split();
    (AmsReader::with_codec(read, codec), AmsWriter::new(write))
}
