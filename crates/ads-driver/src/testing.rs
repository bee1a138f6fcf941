//! A scripted ADS device for tests.
//!
//! [`MockPlc`] answers requests over an in-memory transport the way a
//! TwinCAT runtime would: it serves the symbol tables, hands out symbol and
//! notification handles, keeps a byte image per index group and answers sum
//! reads. Every request it receives is recorded for inspection.

use std::collections::HashMap;
use std::sync::Arc;

use ads_transport::index_group::{
    ADSIGRP_MULTIPLE_READ, ADSIGRP_SYM_DT_UPLOAD, ADSIGRP_SYM_HNDBYNAME, ADSIGRP_SYM_RELEASEHND,
    ADSIGRP_SYM_UPLOAD, ADSIGRP_SYM_UPLOADINFO2, ADSIGRP_SYM_VALBYHND,
};
use ads_transport::testing::{MemoryTransport, frame_packet};
use ads_transport::{
    AMS_HEADER_LEN, AMS_TCP_HEADER_LEN, AdsPayload, AmsAddr, AmsPacket, AmsReader, AmsTransport,
    DeviceInfo, NotificationRequest, NotificationSample, ReturnCode, StampHeader,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use crate::context::{DataTypeEntry, DriverContext, SymbolEntry, UploadInfo};
use crate::tag::element_count;

/// First handle given out for symbols; notifications count from
/// [`FIRST_NOTIFICATION_HANDLE`].
pub const FIRST_SYMBOL_HANDLE: u32 = 0x1000;
pub const FIRST_NOTIFICATION_HANDLE: u32 = 0x2000;

type Predicate = Box<dyn Fn(&AmsPacket) -> bool + Send>;

struct SymbolHandle {
    index_group: u32,
    index_offset: u32,
    size: u32,
}

struct PlcState {
    symbols: Vec<SymbolEntry>,
    data_types: Vec<DataTypeEntry>,
    context: DriverContext,
    memory: HashMap<u32, Vec<u8>>,
    handles: HashMap<u32, SymbolHandle>,
    next_handle: u32,
    released: Vec<u32>,
    notifications: HashMap<u32, NotificationRequest>,
    next_notification: u32,
    failing_groups: HashMap<u32, ReturnCode>,
    ignore: Option<Predicate>,
    truncate: Option<Predicate>,
    requests: Vec<AmsPacket>,
    device_info: DeviceInfo,
    ads_state: u16,
}

impl PlcState {
    fn read_memory(&mut self, index_group: u32, index_offset: u32, length: u32) -> Bytes {
        let memory = self.memory.entry(index_group).or_default();
        let start = index_offset as usize;
        let end = start + length as usize;
        if memory.len() < end {
            memory.resize(end, 0);
        }
        Bytes::copy_from_slice(&memory[start..end])
    }

    fn write_memory(&mut self, index_group: u32, index_offset: u32, data: &[u8]) {
        let memory = self.memory.entry(index_group).or_default();
        let start = index_offset as usize;
        let end = start + data.len();
        if memory.len() < end {
            memory.resize(end, 0);
        }
        memory[start..end].copy_from_slice(data);
    }

    fn symbol_table(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for symbol in &self.symbols {
            symbol.encode(&mut buf);
        }
        buf.freeze()
    }

    fn data_type_table(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for data_type in &self.data_types {
            data_type.encode(&mut buf);
        }
        buf.freeze()
    }

    fn upload_info(&self) -> Bytes {
        let mut buf = BytesMut::new();
        UploadInfo {
            symbol_count: self.symbols.len() as u32,
            symbol_length: self.symbol_table().len() as u32,
            data_type_count: self.data_types.len() as u32,
            data_type_length: self.data_type_table().len() as u32,
            ..Default::default()
        }
        .encode(&mut buf);
        buf.freeze()
    }

    /// Group and offset behind a read or write, following symbol handles.
    fn locate(&self, index_group: u32, index_offset: u32) -> Result<(u32, u32), ReturnCode> {
        if let Some(code) = self.failing_groups.get(&index_group) {
            return Err(*code);
        }
        if index_group != ADSIGRP_SYM_VALBYHND {
            return Ok((index_group, index_offset));
        }
        let handle = self
            .handles
            .get(&index_offset)
            .ok_or(ReturnCode::DEVICE_SYMBOL_NOT_FOUND)?;
        match self.failing_groups.get(&handle.index_group) {
            Some(code) => Err(*code),
            None => Ok((handle.index_group, handle.index_offset)),
        }
    }

    fn read(&mut self, index_group: u32, index_offset: u32, length: u32) -> Result<Bytes, ReturnCode> {
        match index_group {
            ADSIGRP_SYM_UPLOADINFO2 => Ok(self.upload_info()),
            ADSIGRP_SYM_UPLOAD => Ok(self.symbol_table()),
            ADSIGRP_SYM_DT_UPLOAD => Ok(self.data_type_table()),
            _ => {
                if index_group == ADSIGRP_SYM_VALBYHND
                    && self
                        .handles
                        .get(&index_offset)
                        .is_some_and(|handle| length > handle.size)
                {
                    return Err(ReturnCode::DEVICE_INVALID_SIZE);
                }
                let (group, offset) = self.locate(index_group, index_offset)?;
                Ok(self.read_memory(group, offset, length))
            }
        }
    }

    fn write(&mut self, index_group: u32, index_offset: u32, data: &[u8]) -> ReturnCode {
        if index_group == ADSIGRP_SYM_RELEASEHND {
            let Some(mut handle) = data.get(..4) else {
                return ReturnCode::DEVICE_INVALID_SIZE;
            };
            let handle = handle.get_u32_le();
            return match self.handles.remove(&handle) {
                Some(_) => {
                    self.released.push(handle);
                    ReturnCode::OK
                }
                None => ReturnCode::DEVICE_SYMBOL_NOT_FOUND,
            };
        }
        match self.locate(index_group, index_offset) {
            Ok((group, offset)) => {
                self.write_memory(group, offset, data);
                ReturnCode::OK
            }
            Err(code) => code,
        }
    }

    fn handle_by_name(&mut self, data: &[u8]) -> Result<Bytes, ReturnCode> {
        let name = String::from_utf8_lossy(data);
        let name = name.trim_end_matches('\0');
        let resolved = self
            .context
            .resolve(name)
            .map_err(|_| ReturnCode::DEVICE_SYMBOL_NOT_FOUND)?;
        let size = resolved
            .value_type
            .size(resolved.string_length)
            .zip(element_count(&resolved.array_info))
            .and_then(|(size, count)| size.checked_mul(count))
            .ok_or(ReturnCode::DEVICE_INVALID_SIZE)?;
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(
            handle,
            SymbolHandle {
                index_group: resolved.index_group,
                index_offset: resolved.index_offset,
                size,
            },
        );
        Ok(Bytes::copy_from_slice(&handle.to_le_bytes()))
    }

    /// Statuses of every item, then the data slot of every item. Failed
    /// items keep a zeroed slot.
    fn sum_read(&mut self, count: u32, mut items: &[u8]) -> Result<Bytes, ReturnCode> {
        if items.len() < count as usize * 12 {
            return Err(ReturnCode::DEVICE_INVALID_SIZE);
        }
        let mut statuses = BytesMut::new();
        let mut data = BytesMut::new();
        for _ in 0..count {
            let index_group = items.get_u32_le();
            let index_offset = items.get_u32_le();
            let length = items.get_u32_le();
            match self.read(index_group, index_offset, length) {
                Ok(value) => {
                    statuses.put_u32_le(ReturnCode::OK.0);
                    data.put_slice(&value);
                }
                Err(code) => {
                    statuses.put_u32_le(code.0);
                    data.put_bytes(0, length as usize);
                }
            }
        }
        statuses.put_slice(&data);
        Ok(statuses.freeze())
    }

    fn respond(&mut self, request: &AmsPacket) -> AmsPacket {
        let payload = match &request.payload {
            AdsPayload::ReadDeviceInfoRequest => AdsPayload::ReadDeviceInfoResponse {
                result: ReturnCode::OK,
                info: self.device_info.clone(),
            },
            AdsPayload::ReadStateRequest => AdsPayload::ReadStateResponse {
                result: ReturnCode::OK,
                ads_state: self.ads_state,
                device_state: 0,
            },
            AdsPayload::ReadRequest {
                index_group,
                index_offset,
                length,
            } => match self.read(*index_group, *index_offset, *length) {
                Ok(data) => AdsPayload::ReadResponse {
                    result: ReturnCode::OK,
                    data,
                },
                Err(result) => AdsPayload::ReadResponse {
                    result,
                    data: Bytes::new(),
                },
            },
            AdsPayload::WriteRequest {
                index_group,
                index_offset,
                data,
            } => AdsPayload::WriteResponse {
                result: self.write(*index_group, *index_offset, data),
            },
            AdsPayload::ReadWriteRequest {
                index_group,
                index_offset,
                data,
                ..
            } => {
                let result = match *index_group {
                    ADSIGRP_SYM_HNDBYNAME => self.handle_by_name(data),
                    ADSIGRP_MULTIPLE_READ => self.sum_read(*index_offset, data),
                    _ => Err(ReturnCode::DEVICE_SERVICE_NOT_SUPPORTED),
                };
                match result {
                    Ok(data) => AdsPayload::ReadWriteResponse {
                        result: ReturnCode::OK,
                        data,
                    },
                    Err(result) => AdsPayload::ReadWriteResponse {
                        result,
                        data: Bytes::new(),
                    },
                }
            }
            AdsPayload::AddDeviceNotificationRequest(notification) => {
                match self.locate(notification.index_group, notification.index_offset) {
                    Ok(_) => {
                        let handle = self.next_notification;
                        self.next_notification += 1;
                        self.notifications.insert(handle, notification.clone());
                        AdsPayload::AddDeviceNotificationResponse {
                            result: ReturnCode::OK,
                            handle,
                        }
                    }
                    Err(result) => AdsPayload::AddDeviceNotificationResponse { result, handle: 0 },
                }
            }
            AdsPayload::DeleteDeviceNotificationRequest { handle } => {
                AdsPayload::DeleteDeviceNotificationResponse {
                    result: match self.notifications.remove(handle) {
                        Some(_) => ReturnCode::OK,
                        None => ReturnCode::DEVICE_NOTIFY_HANDLE_INVALID,
                    },
                }
            }
            _ => {
                let mut response = AmsPacket::response_to(request, AdsPayload::Raw(Bytes::new()));
                response.error_code = ReturnCode::DEVICE_SERVICE_NOT_SUPPORTED;
                return response;
            }
        };
        AmsPacket::response_to(request, payload)
    }
}

/// Drop the last byte of a framed packet and shrink both length fields.
fn truncate_payload(frame: &mut Vec<u8>) {
    frame.pop();
    let body = (frame.len() - AMS_TCP_HEADER_LEN) as u32;
    frame[2..6].copy_from_slice(&body.to_le_bytes());
    let data = body - AMS_HEADER_LEN as u32;
    let length_field = AMS_TCP_HEADER_LEN + 20;
    frame[length_field..length_field + 4].copy_from_slice(&data.to_le_bytes());
}

/// A simulated ADS device on the far end of a [`MemoryTransport`].
pub struct MockPlc {
    state: Arc<Mutex<PlcState>>,
    writer: Arc<tokio::sync::Mutex<Option<DuplexStream>>>,
    address: AmsAddr,
    task: JoinHandle<()>,
}

impl MockPlc {
    /// Start a device serving the given tables. Returns the device and the
    /// client end of the transport.
    pub fn start(symbols: Vec<SymbolEntry>, data_types: Vec<DataTypeEntry>) -> (Self, MemoryTransport) {
        let (client, device) = MemoryTransport::pair();
        let (read, write) = device.into_split();

        let state = Arc::new(Mutex::new(PlcState {
            context: DriverContext::new(symbols.clone(), data_types.clone()),
            symbols,
            data_types,
            memory: HashMap::new(),
            handles: HashMap::new(),
            next_handle: FIRST_SYMBOL_HANDLE,
            released: Vec::new(),
            notifications: HashMap::new(),
            next_notification: FIRST_NOTIFICATION_HANDLE,
            failing_groups: HashMap::new(),
            ignore: None,
            truncate: None,
            requests: Vec::new(),
            device_info: DeviceInfo {
                major: 3,
                minor: 1,
                build: 4024,
                name: "Plc30 App".to_string(),
            },
            ads_state: 5,
        }));
        let writer = Arc::new(tokio::sync::Mutex::new(Some(write)));
        let task = tokio::spawn(Self::serve(AmsReader::new(read), state.clone(), writer.clone()));

        let plc = Self {
            state,
            writer,
            address: AmsAddr::default(),
            task,
        };
        (plc, client)
    }

    async fn serve(
        mut reader: AmsReader<DuplexStream>,
        state: Arc<Mutex<PlcState>>,
        writer: Arc<tokio::sync::Mutex<Option<DuplexStream>>>,
    ) {
        while let Some(packet) = reader.next().await {
            let request = match packet {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "mock plc received a bad frame");
                    continue;
                }
            };
            let frame = {
                let mut state = state.lock();
                state.requests.push(request.clone());
                if state.ignore.as_ref().is_some_and(|ignore| ignore(&request)) {
                    tracing::debug!(invoke_id = request.invoke_id, "mock plc ignoring request");
                    continue;
                }
                let mut frame = frame_packet(&state.respond(&request));
                if state.truncate.as_ref().is_some_and(|truncate| truncate(&request)) {
                    truncate_payload(&mut frame);
                }
                frame
            };
            let mut writer = writer.lock().await;
            let Some(stream) = writer.as_mut() else {
                break;
            };
            if stream.write_all(&frame).await.is_err() {
                break;
            }
        }
    }

    /// Set bytes in the memory image of `index_group`.
    pub fn set_memory(&self, index_group: u32, index_offset: u32, data: &[u8]) {
        self.state.lock().write_memory(index_group, index_offset, data);
    }

    pub fn memory(&self, index_group: u32, index_offset: u32, length: u32) -> Vec<u8> {
        self.state
            .lock()
            .read_memory(index_group, index_offset, length)
            .to_vec()
    }

    /// Answer every access to `index_group` with `code`.
    pub fn fail_group(&self, index_group: u32, code: ReturnCode) {
        self.state.lock().failing_groups.insert(index_group, code);
    }

    /// Record but never answer requests matching `predicate`.
    pub fn ignore_requests(&self, predicate: impl Fn(&AmsPacket) -> bool + Send + 'static) {
        self.state.lock().ignore = Some(Box::new(predicate));
    }

    pub fn answer_all_requests(&self) {
        let mut state = self.state.lock();
        state.ignore = None;
        state.truncate = None;
    }

    /// Answer requests matching `predicate` with a response one byte short
    /// of its payload. The framing and AMS header stay consistent.
    pub fn truncate_responses(&self, predicate: impl Fn(&AmsPacket) -> bool + Send + 'static) {
        self.state.lock().truncate = Some(Box::new(predicate));
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<AmsPacket> {
        self.state.lock().requests.clone()
    }

    pub fn count_requests(&self, predicate: impl Fn(&AmsPacket) -> bool) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|request| predicate(request))
            .count()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Symbol handles the client released.
    pub fn released_handles(&self) -> Vec<u32> {
        self.state.lock().released.clone()
    }

    /// Symbol handles currently held by the client.
    pub fn open_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Registered notifications and their parameters.
    pub fn notifications(&self) -> HashMap<u32, NotificationRequest> {
        self.state.lock().notifications.clone()
    }

    /// Push one notification sample for `handle`.
    pub async fn notify(&self, handle: u32, timestamp: u64, data: &[u8]) {
        let packet = AmsPacket::request(
            self.address,
            self.address,
            0,
            AdsPayload::DeviceNotification {
                stamps: vec![StampHeader {
                    timestamp,
                    samples: vec![NotificationSample {
                        handle,
                        data: Bytes::copy_from_slice(data),
                    }],
                }],
            },
        );
        self.inject_raw(&frame_packet(&packet)).await;
    }

    /// Write raw bytes to the client, bypassing the codec.
    pub async fn inject_raw(&self, bytes: &[u8]) {
        if let Some(stream) = self.writer.lock().await.as_mut() {
            let _ = stream.write_all(bytes).await;
        }
    }

    /// Stop serving and close the transport, as if the device went away.
    pub async fn disconnect(&self) {
        self.task.abort();
        self.writer.lock().await.take();
    }
}

impl Drop for MockPlc {
    fn drop(&mut self) {
        self.task.abort();
    }
}
