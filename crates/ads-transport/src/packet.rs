//! AMS packet and ADS command types.
//!
//! An [`AmsPacket`] is the 32 byte AMS header followed by a command specific
//! [`AdsPayload`]. All integers are little endian. The AMS/TCP prefix that
//! wraps a packet on the stream is handled by [`AmsCodec`](crate::AmsCodec).

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PacketError;
use crate::net_id::{AmsAddr, AmsNetId};

/// Length of the AMS header.
pub const AMS_HEADER_LEN: usize = 32;

/// Identifier correlating a response with its request.
pub type InvokeId = u32;

/// ADS command identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    ReadDeviceInfo,
    Read,
    Write,
    ReadState,
    WriteControl,
    AddDeviceNotification,
    DeleteDeviceNotification,
    DeviceNotification,
    ReadWrite,
    /// Any command this crate does not interpret.
    Other(u16),
}

impl From<u16> for CommandId {
    fn from(value: u16) -> Self {
        match value {
            1 => CommandId::ReadDeviceInfo,
            2 => CommandId::Read,
            3 => CommandId::Write,
            4 => CommandId::ReadState,
            5 => CommandId::WriteControl,
            6 => CommandId::AddDeviceNotification,
            7 => CommandId::DeleteDeviceNotification,
            8 => CommandId::DeviceNotification,
            9 => CommandId::ReadWrite,
            other => CommandId::Other(other),
        }
    }
}

impl From<CommandId> for u16 {
    fn from(value: CommandId) -> Self {
        match value {
            CommandId::ReadDeviceInfo => 1,
            CommandId::Read => 2,
            CommandId::Write => 3,
            CommandId::ReadState => 4,
            CommandId::WriteControl => 5,
            CommandId::AddDeviceNotification => 6,
            CommandId::DeleteDeviceNotification => 7,
            CommandId::DeviceNotification => 8,
            CommandId::ReadWrite => 9,
            CommandId::Other(other) => other,
        }
    }
}

/// AMS state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateFlags(u16);

impl StateFlags {
    /// ADS command request sent over TCP.
    pub const REQUEST: Self = Self(0x0004);
    /// ADS command response sent over TCP.
    pub const RESPONSE: Self = Self(0x0005);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_response(self) -> bool {
        self.0 & 0x0001 != 0
    }
}

/// ADS return code as carried in responses and the AMS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ReturnCode(pub u32);

impl ReturnCode {
    pub const OK: Self = Self(0x0000);
    pub const TARGET_PORT_NOT_FOUND: Self = Self(0x0006);
    pub const TARGET_MACHINE_NOT_FOUND: Self = Self(0x0007);
    pub const DEVICE_ERROR: Self = Self(0x0700);
    pub const DEVICE_SERVICE_NOT_SUPPORTED: Self = Self(0x0701);
    pub const DEVICE_INVALID_GROUP: Self = Self(0x0702);
    pub const DEVICE_INVALID_OFFSET: Self = Self(0x0703);
    pub const DEVICE_INVALID_ACCESS: Self = Self(0x0704);
    pub const DEVICE_INVALID_SIZE: Self = Self(0x0705);
    pub const DEVICE_INVALID_DATA: Self = Self(0x0706);
    pub const DEVICE_NOT_READY: Self = Self(0x0707);
    pub const DEVICE_BUSY: Self = Self(0x0708);
    pub const DEVICE_SYMBOL_NOT_FOUND: Self = Self(0x0710);
    pub const DEVICE_SYMBOL_VERSION_INVALID: Self = Self(0x0711);
    pub const DEVICE_NOTIFY_HANDLE_INVALID: Self = Self(0x0714);
    pub const DEVICE_TIMEOUT: Self = Self(0x0719);
    pub const CLIENT_ERROR: Self = Self(0x0740);
    pub const CLIENT_SYNC_TIMEOUT: Self = Self(0x0745);

    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Short description for the well known codes.
    pub fn description(self) -> &'static str {
        match self {
            Self::OK => "no error",
            Self::TARGET_PORT_NOT_FOUND => "target port not found",
            Self::TARGET_MACHINE_NOT_FOUND => "target machine not found",
            Self::DEVICE_ERROR => "general device error",
            Self::DEVICE_SERVICE_NOT_SUPPORTED => "service not supported by server",
            Self::DEVICE_INVALID_GROUP => "invalid index group",
            Self::DEVICE_INVALID_OFFSET => "invalid index offset",
            Self::DEVICE_INVALID_ACCESS => "reading or writing not permitted",
            Self::DEVICE_INVALID_SIZE => "parameter size not correct",
            Self::DEVICE_INVALID_DATA => "invalid data values",
            Self::DEVICE_NOT_READY => "device is not ready to operate",
            Self::DEVICE_BUSY => "device is busy",
            Self::DEVICE_SYMBOL_NOT_FOUND => "symbol not found",
            Self::DEVICE_SYMBOL_VERSION_INVALID => "symbol version invalid",
            Self::DEVICE_NOTIFY_HANDLE_INVALID => "notification handle is invalid",
            Self::DEVICE_TIMEOUT => "device timeout",
            Self::CLIENT_ERROR => "client error",
            Self::CLIENT_SYNC_TIMEOUT => "client sync timeout",
            _ => "unknown error",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x} ({})", self.0, self.description())
    }
}

/// Version and name reported by `ReadDeviceInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
    pub name: String,
}

/// When the device pushes notification samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionMode {
    Cyclic,
    OnChange,
}

impl From<TransmissionMode> for u32 {
    fn from(mode: TransmissionMode) -> Self {
        match mode {
            TransmissionMode::Cyclic => 3,
            TransmissionMode::OnChange => 4,
        }
    }
}

/// Parameters of an `AddDeviceNotification` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub index_group: u32,
    pub index_offset: u32,
    pub length: u32,
    pub mode: TransmissionMode,
    /// Maximum delay in 100ns units.
    pub max_delay: u32,
    /// Cycle time in 100ns units.
    pub cycle_time: u32,
}

/// One sample inside a device notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSample {
    pub handle: u32,
    pub data: Bytes,
}

/// A group of samples sharing a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampHeader {
    /// Windows FILETIME (100ns since 1601-01-01).
    pub timestamp: u64,
    pub samples: Vec<NotificationSample>,
}

/// Command specific body of an [`AmsPacket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdsPayload {
    ReadDeviceInfoRequest,
    ReadDeviceInfoResponse {
        result: ReturnCode,
        info: DeviceInfo,
    },
    ReadRequest {
        index_group: u32,
        index_offset: u32,
        length: u32,
    },
    ReadResponse {
        result: ReturnCode,
        data: Bytes,
    },
    WriteRequest {
        index_group: u32,
        index_offset: u32,
        data: Bytes,
    },
    WriteResponse {
        result: ReturnCode,
    },
    ReadStateRequest,
    ReadStateResponse {
        result: ReturnCode,
        ads_state: u16,
        device_state: u16,
    },
    AddDeviceNotificationRequest(NotificationRequest),
    AddDeviceNotificationResponse {
        result: ReturnCode,
        handle: u32,
    },
    DeleteDeviceNotificationRequest {
        handle: u32,
    },
    DeleteDeviceNotificationResponse {
        result: ReturnCode,
    },
    DeviceNotification {
        stamps: Vec<StampHeader>,
    },
    ReadWriteRequest {
        index_group: u32,
        index_offset: u32,
        read_length: u32,
        data: Bytes,
    },
    ReadWriteResponse {
        result: ReturnCode,
        data: Bytes,
    },
    /// Body of a command this crate does not interpret, or the empty body of
    /// an error response.
    Raw(Bytes),
}

impl AdsPayload {
    /// The command this payload belongs to.
    pub fn command_id(&self) -> Option<CommandId> {
        Some(match self {
            AdsPayload::ReadDeviceInfoRequest | AdsPayload::ReadDeviceInfoResponse { .. } => {
                CommandId::ReadDeviceInfo
            }
            AdsPayload::ReadRequest { .. } | AdsPayload::ReadResponse { .. } => CommandId::Read,
            AdsPayload::WriteRequest { .. } | AdsPayload::WriteResponse { .. } => CommandId::Write,
            AdsPayload::ReadStateRequest | AdsPayload::ReadStateResponse { .. } => {
                CommandId::ReadState
            }
            AdsPayload::AddDeviceNotificationRequest(_)
            | AdsPayload::AddDeviceNotificationResponse { .. } => CommandId::AddDeviceNotification,
            AdsPayload::DeleteDeviceNotificationRequest { .. }
            | AdsPayload::DeleteDeviceNotificationResponse { .. } => {
                CommandId::DeleteDeviceNotification
            }
            AdsPayload::DeviceNotification { .. } => CommandId::DeviceNotification,
            AdsPayload::ReadWriteRequest { .. } | AdsPayload::ReadWriteResponse { .. } => {
                CommandId::ReadWrite
            }
            AdsPayload::Raw(_) => return None,
        })
    }

    /// The ADS result of a response payload.
    pub fn result(&self) -> Option<ReturnCode> {
        match self {
            AdsPayload::ReadDeviceInfoResponse { result, .. }
            | AdsPayload::ReadResponse { result, .. }
            | AdsPayload::WriteResponse { result }
            | AdsPayload::ReadStateResponse { result, .. }
            | AdsPayload::AddDeviceNotificationResponse { result, .. }
            | AdsPayload::DeleteDeviceNotificationResponse { result }
            | AdsPayload::ReadWriteResponse { result, .. } => Some(*result),
            _ => None,
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        match self {
            AdsPayload::ReadDeviceInfoRequest | AdsPayload::ReadStateRequest => {}
            AdsPayload::ReadDeviceInfoResponse { result, info } => {
                dst.put_u32_le(result.0);
                dst.put_u8(info.major);
                dst.put_u8(info.minor);
                dst.put_u16_le(info.build);
                let mut name = [0u8; 16];
                let len = info.name.len().min(15);
                name[..len].copy_from_slice(&info.name.as_bytes()[..len]);
                dst.put_slice(&name);
            }
            AdsPayload::ReadRequest {
                index_group,
                index_offset,
                length,
            } => {
                dst.put_u32_le(*index_group);
                dst.put_u32_le(*index_offset);
                dst.put_u32_le(*length);
            }
            AdsPayload::ReadResponse { result, data }
            | AdsPayload::ReadWriteResponse { result, data } => {
                dst.put_u32_le(result.0);
                dst.put_u32_le(data.len() as u32);
                dst.put_slice(data);
            }
            AdsPayload::WriteRequest {
                index_group,
                index_offset,
                data,
            } => {
                dst.put_u32_le(*index_group);
                dst.put_u32_le(*index_offset);
                dst.put_u32_le(data.len() as u32);
                dst.put_slice(data);
            }
            AdsPayload::WriteResponse { result }
            | AdsPayload::DeleteDeviceNotificationResponse { result } => {
                dst.put_u32_le(result.0);
            }
            AdsPayload::ReadStateResponse {
                result,
                ads_state,
                device_state,
            } => {
                dst.put_u32_le(result.0);
                dst.put_u16_le(*ads_state);
                dst.put_u16_le(*device_state);
            }
            AdsPayload::AddDeviceNotificationRequest(req) => {
                dst.put_u32_le(req.index_group);
                dst.put_u32_le(req.index_offset);
                dst.put_u32_le(req.length);
                dst.put_u32_le(req.mode.into());
                dst.put_u32_le(req.max_delay);
                dst.put_u32_le(req.cycle_time);
                dst.put_bytes(0, 16);
            }
            AdsPayload::AddDeviceNotificationResponse { result, handle } => {
                dst.put_u32_le(result.0);
                dst.put_u32_le(*handle);
            }
            AdsPayload::DeleteDeviceNotificationRequest { handle } => {
                dst.put_u32_le(*handle);
            }
            AdsPayload::DeviceNotification { stamps } => {
                let mut body = BytesMut::new();
                body.put_u32_le(stamps.len() as u32);
                for stamp in stamps {
                    body.put_u64_le(stamp.timestamp);
                    body.put_u32_le(stamp.samples.len() as u32);
                    for sample in &stamp.samples {
                        body.put_u32_le(sample.handle);
                        body.put_u32_le(sample.data.len() as u32);
                        body.put_slice(&sample.data);
                    }
                }
                dst.put_u32_le(body.len() as u32);
                dst.put_slice(&body);
            }
            AdsPayload::ReadWriteRequest {
                index_group,
                index_offset,
                read_length,
                data,
            } => {
                dst.put_u32_le(*index_group);
                dst.put_u32_le(*index_offset);
                dst.put_u32_le(*read_length);
                dst.put_u32_le(data.len() as u32);
                dst.put_slice(data);
            }
            AdsPayload::Raw(data) => dst.put_slice(data),
        }
    }

    fn parse(command: CommandId, response: bool, mut src: Bytes) -> Result<Self, PacketError> {
        let buf = &mut src;
        let payload = match (command, response) {
            (CommandId::ReadDeviceInfo, false) => AdsPayload::ReadDeviceInfoRequest,
            (CommandId::ReadDeviceInfo, true) => {
                let result = ReturnCode(take_u32(buf, "result")?);
                let major = take_u8(buf, "major version")?;
                let minor = take_u8(buf, "minor version")?;
                let build = take_u16(buf, "build version")?;
                let name = take_bytes(buf, 16, "device name")?;
                let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
                AdsPayload::ReadDeviceInfoResponse {
                    result,
                    info: DeviceInfo {
                        major,
                        minor,
                        build,
                        name: String::from_utf8_lossy(&name[..end]).into_owned(),
                    },
                }
            }
            (CommandId::Read, false) => AdsPayload::ReadRequest {
                index_group: take_u32(buf, "index group")?,
                index_offset: take_u32(buf, "index offset")?,
                length: take_u32(buf, "length")?,
            },
            (CommandId::Read, true) => {
                let result = ReturnCode(take_u32(buf, "result")?);
                let length = take_u32(buf, "length")? as usize;
                AdsPayload::ReadResponse {
                    result,
                    data: take_bytes(buf, length, "data")?,
                }
            }
            (CommandId::Write, false) => {
                let index_group = take_u32(buf, "index group")?;
                let index_offset = take_u32(buf, "index offset")?;
                let length = take_u32(buf, "length")? as usize;
                AdsPayload::WriteRequest {
                    index_group,
                    index_offset,
                    data: take_bytes(buf, length, "data")?,
                }
            }
            (CommandId::Write, true) => AdsPayload::WriteResponse {
                result: ReturnCode(take_u32(buf, "result")?),
            },
            (CommandId::ReadState, false) => AdsPayload::ReadStateRequest,
            (CommandId::ReadState, true) => AdsPayload::ReadStateResponse {
                result: ReturnCode(take_u32(buf, "result")?),
                ads_state: take_u16(buf, "ads state")?,
                device_state: take_u16(buf, "device state")?,
            },
            (CommandId::AddDeviceNotification, false) => {
                let index_group = take_u32(buf, "index group")?;
                let index_offset = take_u32(buf, "index offset")?;
                let length = take_u32(buf, "length")?;
                let mode = match take_u32(buf, "transmission mode")? {
                    3 => TransmissionMode::Cyclic,
                    _ => TransmissionMode::OnChange,
                };
                let max_delay = take_u32(buf, "max delay")?;
                let cycle_time = take_u32(buf, "cycle time")?;
                take_bytes(buf, 16, "reserved")?;
                AdsPayload::AddDeviceNotificationRequest(NotificationRequest {
                    index_group,
                    index_offset,
                    length,
                    mode,
                    max_delay,
                    cycle_time,
                })
            }
            (CommandId::AddDeviceNotification, true) => {
                AdsPayload::AddDeviceNotificationResponse {
                    result: ReturnCode(take_u32(buf, "result")?),
                    handle: take_u32(buf, "notification handle")?,
                }
            }
            (CommandId::DeleteDeviceNotification, false) => {
                AdsPayload::DeleteDeviceNotificationRequest {
                    handle: take_u32(buf, "notification handle")?,
                }
            }
            (CommandId::DeleteDeviceNotification, true) => {
                AdsPayload::DeleteDeviceNotificationResponse {
                    result: ReturnCode(take_u32(buf, "result")?),
                }
            }
            (CommandId::DeviceNotification, _) => {
                let length = take_u32(buf, "notification length")? as usize;
                let mut body = take_bytes(buf, length, "notification stream")?;
                let body = &mut body;
                let stamp_count = take_u32(body, "stamp count")?;
                let mut stamps = Vec::new();
                for _ in 0..stamp_count {
                    let timestamp = take_u64(body, "timestamp")?;
                    let sample_count = take_u32(body, "sample count")?;
                    let mut samples = Vec::new();
                    for _ in 0..sample_count {
                        let handle = take_u32(body, "notification handle")?;
                        let size = take_u32(body, "sample size")? as usize;
                        samples.push(NotificationSample {
                            handle,
                            data: take_bytes(body, size, "sample data")?,
                        });
                    }
                    stamps.push(StampHeader { timestamp, samples });
                }
                AdsPayload::DeviceNotification { stamps }
            }
            (CommandId::ReadWrite, false) => {
                let index_group = take_u32(buf, "index group")?;
                let index_offset = take_u32(buf, "index offset")?;
                let read_length = take_u32(buf, "read length")?;
                let write_length = take_u32(buf, "write length")? as usize;
                AdsPayload::ReadWriteRequest {
                    index_group,
                    index_offset,
                    read_length,
                    data: take_bytes(buf, write_length, "data")?,
                }
            }
            (CommandId::ReadWrite, true) => {
                let result = ReturnCode(take_u32(buf, "result")?);
                let length = take_u32(buf, "length")? as usize;
                AdsPayload::ReadWriteResponse {
                    result,
                    data: take_bytes(buf, length, "data")?,
                }
            }
            (CommandId::WriteControl | CommandId::Other(_), _) => {
                AdsPayload::Raw(std::mem::take(buf))
            }
        };
        Ok(payload)
    }
}

/// A complete AMS packet: header plus ADS payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmsPacket {
    pub target: AmsAddr,
    pub source: AmsAddr,
    pub command_id: CommandId,
    pub state_flags: StateFlags,
    /// AMS level error; non zero responses may carry an empty payload.
    pub error_code: ReturnCode,
    pub invoke_id: InvokeId,
    pub payload: AdsPayload,
}

impl AmsPacket {
    /// Build a request packet; the command id is taken from the payload.
    pub fn request(
        target: AmsAddr,
        source: AmsAddr,
        invoke_id: InvokeId,
        payload: AdsPayload,
    ) -> Self {
        Self {
            target,
            source,
            command_id: payload.command_id().unwrap_or(CommandId::Other(0)),
            state_flags: StateFlags::REQUEST,
            error_code: ReturnCode::OK,
            invoke_id,
            payload,
        }
    }

    /// Build the response to `request`, swapping source and target.
    pub fn response_to(request: &AmsPacket, payload: AdsPayload) -> Self {
        Self {
            target: request.source,
            source: request.target,
            command_id: request.command_id,
            state_flags: StateFlags::RESPONSE,
            error_code: ReturnCode::OK,
            invoke_id: request.invoke_id,
            payload,
        }
    }

    pub fn is_response(&self) -> bool {
        self.state_flags.is_response()
    }

    /// Append the header and payload to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut body = BytesMut::new();
        self.payload.encode(&mut body);

        dst.reserve(AMS_HEADER_LEN + body.len());
        dst.put_slice(&self.target.net_id.octets());
        dst.put_u16_le(self.target.port);
        dst.put_slice(&self.source.net_id.octets());
        dst.put_u16_le(self.source.port);
        dst.put_u16_le(self.command_id.into());
        dst.put_u16_le(self.state_flags.bits());
        dst.put_u32_le(body.len() as u32);
        dst.put_u32_le(self.error_code.0);
        dst.put_u32_le(self.invoke_id);
        dst.put_slice(&body);
    }

    /// Parse a packet from exactly the bytes following the AMS/TCP prefix.
    pub fn parse(mut src: Bytes) -> Result<Self, PacketError> {
        let buf = &mut src;
        let target = take_addr(buf, "target address")?;
        let source = take_addr(buf, "source address")?;
        let command_id = CommandId::from(take_u16(buf, "command id")?);
        let state_flags = StateFlags::from_bits(take_u16(buf, "state flags")?);
        let length = take_u32(buf, "data length")? as usize;
        let error_code = ReturnCode(take_u32(buf, "error code")?);
        let invoke_id = take_u32(buf, "invoke id")?;

        let malformed = |source: PacketError| PacketError::Payload {
            invoke_id,
            command_id,
            response: state_flags.is_response(),
            source: Box::new(source),
        };
        if length != src.remaining() {
            return Err(malformed(PacketError::LengthMismatch {
                declared: length,
                actual: src.remaining(),
            }));
        }

        let payload = if state_flags.is_response() && src.is_empty() && !error_code.is_ok() {
            AdsPayload::Raw(src)
        } else {
            AdsPayload::parse(command_id, state_flags.is_response(), src).map_err(malformed)?
        };

        Ok(Self {
            target,
            source,
            command_id,
            state_flags,
            error_code,
            invoke_id,
            payload,
        })
    }
}

fn ensure(buf: &Bytes, needed: usize, field: &'static str) -> Result<(), PacketError> {
    if buf.remaining() < needed {
        return Err(PacketError::Truncated {
            field,
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn take_u8(buf: &mut Bytes, field: &'static str) -> Result<u8, PacketError> {
    ensure(buf, 1, field)?;
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut Bytes, field: &'static str) -> Result<u16, PacketError> {
    ensure(buf, 2, field)?;
    Ok(buf.get_u16_le())
}

fn take_u32(buf: &mut Bytes, field: &'static str) -> Result<u32, PacketError> {
    ensure(buf, 4, field)?;
    Ok(buf.get_u32_le())
}

fn take_u64(buf: &mut Bytes, field: &'static str) -> Result<u64, PacketError> {
    ensure(buf, 8, field)?;
    Ok(buf.get_u64_le())
}

fn take_bytes(buf: &mut Bytes, len: usize, field: &'static str) -> Result<Bytes, PacketError> {
    ensure(buf, len, field)?;
    Ok(buf.split_to(len))
}

fn take_addr(buf: &mut Bytes, field: &'static str) -> Result<AmsAddr, PacketError> {
    ensure(buf, AmsNetId::LEN + 2, field)?;
    let mut octets = [0u8; 6];
    buf.copy_to_slice(&mut octets);
    Ok(AmsAddr::new(AmsNetId::new(octets), buf.get_u16_le()))
}
