//! Testing utilities for the transport layer.
//!
//! This module provides helpers for testing code that speaks AMS, including
//! an in-memory transport and frame construction utilities.

mod memory;

pub use memory::MemoryTransport;

use bytes::BytesMut;
use tokio_util::codec::Encoder;

use crate::codec::AmsCodec;
use crate::packet::AmsPacket;

/// Encode a packet into a complete AMS/TCP frame.
///
/// Useful for feeding hand-built traffic to an [`AmsReader`](crate::AmsReader).
///
/// # Example
///
/// ```
/// use ads_transport::testing::frame_packet;
/// use ads_transport::{AdsPayload, AmsAddr, AmsPacket};
///
/// let packet = AmsPacket::request(
///     AmsAddr::default(),
///     AmsAddr::default(),
///     1,
///     AdsPayload::ReadStateRequest,
/// );
/// let bytes = frame_packet(&packet);
///
/// assert_eq!(bytes.len(), 6 + 32);
/// ```
pub fn frame_packet(packet: &AmsPacket) -> Vec<u8> {
    let mut buf = BytesMut::new();
    AmsCodec::new()
        .encode(packet.clone(), &mut buf)
        .expect("encoding into memory cannot fail");
    buf.to_vec()
}

/// Construct multiple frames concatenated together.
pub fn frame_packets(packets: &[AmsPacket]) -> Vec<u8> {
    packets.iter().flat_map(frame_packet).collect()
}

#[cfg(test)]
pub(crate) fn read_request(invoke_id: u32) -> AmsPacket {
    use crate::net_id::{AmsAddr, AmsNetId};
    use crate::packet::AdsPayload;

    AmsPacket::request(
        AmsAddr::new(AmsNetId::new([192, 168, 1, 100, 1, 1]), 851),
        AmsAddr::new(AmsNetId::new([192, 168, 1, 10, 1, 1]), 65534),
        invoke_id,
        AdsPayload::ReadRequest {
            index_group: 0x4020,
            index_offset: 0,
            length: 4,
        },
    )
}
