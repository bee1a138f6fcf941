//! Error types for the transport layer.

use std::io;

use crate::packet::{CommandId, InvokeId};

/// Errors raised while parsing the body of a single AMS frame.
///
/// These never leave the stream in an inconsistent state: the frame has
/// already been consumed by the time the body is parsed, so the next frame
/// can be decoded normally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// The packet ended before a field could be read.
    #[error("packet truncated reading {field}: needed {needed} bytes, {available} available")]
    Truncated {
        /// The field being read.
        field: &'static str,
        /// Bytes required by the field.
        needed: usize,
        /// Bytes left in the packet.
        available: usize,
    },

    /// The data length in the AMS header disagrees with the frame.
    #[error("AMS header declares {declared} data bytes, frame carries {actual}")]
    LengthMismatch {
        /// Length announced in the header.
        declared: usize,
        /// Length actually present.
        actual: usize,
    },

    /// The AMS header was read but the rest of the packet was not, so the
    /// packet can still be attributed to its request.
    #[error("malformed {command_id:?} packet {invoke_id}: {source}")]
    Payload {
        invoke_id: InvokeId,
        command_id: CommandId,
        /// Whether the header carries the response flag.
        response: bool,
        source: Box<PacketError>,
    },
}

impl PacketError {
    /// Invoke id of a malformed response whose header could still be read.
    pub fn response_invoke_id(&self) -> Option<InvokeId> {
        match self {
            PacketError::Payload {
                invoke_id,
                response: true,
                ..
            } => Some(*invoke_id),
            _ => None,
        }
    }
}

/// Errors that can occur while encoding or decoding AMS frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// An I/O error occurred while reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The AMS/TCP prefix announced a frame larger than allowed.
    #[error("frame size {size} exceeds maximum allowed {max}")]
    FrameTooLarge {
        /// The announced frame size.
        size: usize,
        /// The maximum allowed size.
        max: usize,
    },

    /// A complete frame arrived but its body could not be parsed.
    #[error("malformed AMS packet: {0}")]
    Packet(#[from] PacketError),
}

impl CodecError {
    /// Whether the stream can keep being read after this error.
    ///
    /// Only malformed packets are recoverable; the offending frame has been
    /// discarded already.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CodecError::Packet(_))
    }
}
