//! AMS/TCP codec implementation using tokio-util.
//!
//! This module provides [`AmsCodec`], which implements both the `Encoder` and
//! `Decoder` traits from tokio-util for AMS packets.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{CodecError, PacketError};
use crate::packet::AmsPacket;

/// Length of the AMS/TCP prefix in front of every packet.
pub const AMS_TCP_HEADER_LEN: usize = 6;

/// Default maximum frame size (8 MB).
const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Codec for encoding and decoding AMS/TCP frames.
///
/// Every AMS packet on a TCP stream is prefixed by two reserved bytes and a
/// little endian `u32` holding the length of the packet that follows:
/// ```text
/// +----------+------------+------------------------+---------+
/// | reserved | length u32 | AMS header (32 bytes)  | payload |
/// +----------+------------+------------------------+---------+
/// ```
///
/// Decoding yields `Result<AmsPacket, PacketError>` items: a frame whose body
/// cannot be parsed is still consumed from the buffer and surfaced as an
/// `Err` item, so the stream stays aligned on the next frame.
#[derive(Debug, Clone)]
pub struct AmsCodec {
    /// Maximum allowed AMS packet size in bytes.
    max_frame_size: usize,
}

impl AmsCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a new codec with a custom maximum frame size.
    ///
    /// Frames larger than this are rejected with [`CodecError::FrameTooLarge`].
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for AmsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AmsCodec {
    type Item = Result<AmsPacket, PacketError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < AMS_TCP_HEADER_LEN {
            // Need more data
            return Ok(None);
        }

        let length = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
        if length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        let total_length = AMS_TCP_HEADER_LEN + length;
        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total_length).freeze();
        let body = frame.split_off(AMS_TCP_HEADER_LEN);
        let packet = AmsPacket::parse(body);
        if let Err(e) = &packet {
            tracing::debug!(error = %e, length, "malformed AMS packet");
        }

        Ok(Some(packet))
    }
}

impl Encoder<AmsPacket> for AmsCodec {
    type Error = CodecError;

    fn encode(&mut self, item: AmsPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut packet = BytesMut::new();
        item.encode(&mut packet);

        dst.reserve(AMS_TCP_HEADER_LEN + packet.len());
        dst.put_u16_le(0);
        dst.put_u32_le(packet.len() as u32);
        dst.put_slice(&packet);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net_id::{AmsAddr, AmsNetId};
    use crate::packet::{AdsPayload, ReturnCode};
    use bytes::Bytes;

    fn request(invoke_id: u32) -> AmsPacket {
        AmsPacket::request(
            AmsAddr::new(AmsNetId::new([192, 168, 1, 100, 1, 1]), 851),
            AmsAddr::new(AmsNetId::new([192, 168, 1, 10, 1, 1]), 65534),
            invoke_id,
            AdsPayload::ReadRequest {
                index_group: 1234,
                index_offset: 5678,
                length: 1,
            },
        )
    }

    fn make_frame(packet: AmsPacket) -> BytesMut {
        let mut buf = BytesMut::new();
        AmsCodec::new().encode(packet, &mut buf).unwrap();
        buf
    }

    #[test]
    fn decode_complete_frame() {
        let mut codec = AmsCodec::new();
        let mut buf = make_frame(request(1));

        let result = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(result, request(1));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_empty_buffer_is_noop() {
        let mut codec = AmsCodec::new();
        let mut buf = BytesMut::new();

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_incomplete_prefix() {
        let mut codec = AmsCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0, 44, 0][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 4); // Data preserved
    }

    #[test]
    fn decode_incomplete_body() {
        let mut codec = AmsCodec::new();
        let full = make_frame(request(1));
        let mut buf = BytesMut::from(&full[..full.len() - 3]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), full.len() - 3);

        buf.extend_from_slice(&full[full.len() - 3..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn decode_multiple_frames() {
        let mut codec = AmsCodec::new();
        let mut buf = make_frame(request(1));
        buf.extend_from_slice(&make_frame(request(2)));

        let first = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(first.invoke_id, 1);
        assert_eq!(second.invoke_id, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn malformed_frame_is_consumed() {
        let mut codec = AmsCodec::new();
        // a frame whose body is shorter than an AMS header
        let mut buf = BytesMut::from(&[0u8, 0, 4, 0, 0, 0, 1, 2, 3, 4][..]);
        buf.extend_from_slice(&make_frame(request(5)));

        let bad = codec.decode(&mut buf).unwrap().unwrap();
        assert!(bad.is_err());

        let good = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(good.invoke_id, 5);
    }

    #[test]
    fn decode_frame_too_large() {
        let mut codec = AmsCodec::with_max_size(16);
        let mut buf = BytesMut::from(&[0u8, 0, 100, 0, 0, 0][..]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
    }

    #[test]
    fn encode_prefixes_length() {
        let response = AmsPacket::response_to(
            &request(3),
            AdsPayload::ReadResponse {
                result: ReturnCode::OK,
                data: Bytes::from_static(&[1]),
            },
        );
        let buf = make_frame(response);

        assert_eq!(&buf[0..2], &[0, 0]);
        let length = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;
        assert_eq!(length, buf.len() - AMS_TCP_HEADER_LEN);
        assert_eq!(length, 32 + 9);
    }
}
