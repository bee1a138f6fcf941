//! Async AMS/TCP transport for Beckhoff ADS using tokio.
//!
//! This crate provides the transport layer of an ADS driver: framing of the
//! AMS/TCP byte stream and encoding/decoding of the AMS packets and ADS
//! command payloads carried on it.
//!
//! # Architecture
//!
//! The crate is designed around the tokio-util codec pattern:
//!
//! - [`AmsCodec`] implements both `Encoder` and `Decoder` for AMS packets
//! - [`AmsReader`] wraps an `AsyncRead` to produce a `Stream` of [`AmsPacket`]s
//! - [`AmsWriter`] wraps an `AsyncWrite` to provide a `Sink` for outgoing packets
//!
//! # Usage
//!
//! ```ignore
//! use ads_transport::{AdsPayload, AmsPacket};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (mut reader, mut writer) = ads_transport::connect("192.168.1.100:48898").await?;
//!
//!     writer.send(/* packet */).await?;
//!
//!     while let Some(packet) = reader.next().await {
//!         let packet = packet?;
//!         println!("invoke id {}", packet.invoke_id);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Scope
//!
//! This crate intentionally handles only transport concerns. Invoke id
//! correlation, symbol resolution and value decoding belong in `ads-driver`.

mod codec;
mod error;
pub mod index_group;
mod net_id;
mod packet;
mod reader;
mod transport;
mod writer;

pub mod testing;

pub use codec::{AMS_TCP_HEADER_LEN, AmsCodec};
pub use error::{CodecError, PacketError};
pub use net_id::{AmsAddr, AmsNetId, PORT_TC2_PLC1, PORT_TC3_PLC1, ParseNetIdError};
pub use packet::{
    AMS_HEADER_LEN, AdsPayload, AmsPacket, CommandId, DeviceInfo, InvokeId, NotificationRequest,
    NotificationSample, ReturnCode, StampHeader, StateFlags, TransmissionMode,
};
pub use reader::AmsReader;
pub use transport::{AmsTransport, split, split_with_codec};
pub use writer::AmsWriter;

use std::io;
use tokio::net::{TcpStream, ToSocketAddrs};

/// TCP port of the AMS router.
pub const ADS_TCP_PORT: u16 = 48898;

/// Connect to an AMS router and return a reader/writer pair.
pub async fn connect(
    addr: impl ToSocketAddrs,
) -> io::Result<(
    AmsReader<tokio::net::tcp::OwnedReadHalf>,
    AmsWriter<tokio::net::tcp::OwnedWriteHalf>,
)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(split(stream))
}
