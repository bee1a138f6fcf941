//! Read requests.
//!
//! One tag is read with a plain ADS `Read`. Several tags are batched into a
//! single sum read: an ADS `ReadWrite` on `ADSIGRP_MULTIPLE_READ` whose write
//! data lists `(group, offset, length)` per tag. The device answers with one
//! status code per tag followed by the data of every tag, in request order.

use ads_transport::index_group::ADSIGRP_MULTIPLE_READ;
use ads_transport::{AdsPayload, CommandId, ReturnCode};
use bytes::{BufMut, Bytes, BytesMut};

use crate::connection::Inner;
use crate::error::{Error, Result, TagError};
use crate::tag::{DirectTag, Tag, parse_tag};
use crate::value::{PlcValue, decode_tag};

/// Outcome of one tag in a read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    /// The device rejected the item.
    Remote(ReturnCode),
    /// The device answered but the data did not decode as the tag's type.
    InvalidData,
}

impl ResponseCode {
    pub fn is_ok(self) -> bool {
        self == ResponseCode::Ok
    }

    fn from_return_code(code: ReturnCode) -> Self {
        if code.is_ok() {
            ResponseCode::Ok
        } else {
            ResponseCode::Remote(code)
        }
    }

    /// Turn a failed code into an error, for single tag convenience calls.
    pub(crate) fn into_result(self) -> Result<()> {
        match self {
            ResponseCode::Ok => Ok(()),
            ResponseCode::Remote(code) => Err(Error::Protocol(code)),
            ResponseCode::InvalidData => Err(Error::Protocol(ReturnCode::DEVICE_INVALID_DATA)),
        }
    }
}

/// Value and status of one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagValue {
    pub code: ResponseCode,
    pub value: Option<PlcValue>,
}

impl TagValue {
    fn ok(value: PlcValue) -> Self {
        Self {
            code: ResponseCode::Ok,
            value: Some(value),
        }
    }

    fn failed(code: ResponseCode) -> Self {
        Self { code, value: None }
    }
}

/// Named tags to read together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRequest {
    tags: Vec<(String, Tag)>,
}

impl ReadRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tag(mut self, name: impl Into<String>, tag: impl Into<Tag>) -> Self {
        self.tags.push((name.into(), tag.into()));
        self
    }

    /// Parse `address` and add it under `name`.
    pub fn add_address(self, name: impl Into<String>, address: &str) -> Result<Self, TagError> {
        Ok(self.add_tag(name, parse_tag(address)?))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|(name, _)| name.as_str())
    }
}

/// Per-tag results of a [`ReadRequest`], in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    items: Vec<(String, TagValue)>,
}

impl ReadResponse {
    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.items.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn value(&self, name: &str) -> Option<&PlcValue> {
        self.get(name)?.value.as_ref()
    }

    pub fn code(&self, name: &str) -> Option<ResponseCode> {
        self.get(name).map(|v| v.code)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.items.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Bytes the device returns for a sum read of `tags`: a status word plus the
/// data of every tag.
pub(crate) fn multi_read_length(tags: &[DirectTag]) -> Result<u32, TagError> {
    tags.iter().try_fold(0u32, |total, tag| {
        tag.size()?
            .checked_add(4)
            .and_then(|item| total.checked_add(item))
            .ok_or_else(|| TagError::TooLarge(format!("sum read of {} tags", tags.len())))
    })
}

pub(crate) fn single_read_payload(tag: &DirectTag) -> Result<AdsPayload, TagError> {
    Ok(AdsPayload::ReadRequest {
        index_group: tag.index_group,
        index_offset: tag.index_offset,
        length: tag.size()?,
    })
}

pub(crate) fn multi_read_payload(tags: &[DirectTag]) -> Result<AdsPayload, TagError> {
    let read_length = multi_read_length(tags)?;
    let mut data = BytesMut::with_capacity(12 * tags.len());
    for tag in tags {
        data.put_u32_le(tag.index_group);
        data.put_u32_le(tag.index_offset);
        data.put_u32_le(tag.size()?);
    }
    Ok(AdsPayload::ReadWriteRequest {
        index_group: ADSIGRP_MULTIPLE_READ,
        index_offset: tags.len() as u32,
        read_length,
        data: data.freeze(),
    })
}

/// Split read data into per-tag results.
///
/// A single tag is answered by a plain read response, which has no status
/// prefix; any other count starts with one status per tag. A tag whose status
/// is not OK still occupies its data slot.
pub(crate) fn decode_multi(tags: &[DirectTag], data: &[u8]) -> Vec<TagValue> {
    if let [tag] = tags {
        return vec![decode_one(tag, data)];
    }

    let status_length = 4 * tags.len();
    let Some((statuses, mut values)) = data.split_at_checked(status_length) else {
        tracing::debug!(
            tags = tags.len(),
            length = data.len(),
            "sum read response shorter than its status block"
        );
        return tags
            .iter()
            .map(|_| TagValue::failed(ResponseCode::InvalidData))
            .collect();
    };

    tags.iter()
        .zip(statuses.chunks_exact(4))
        .map(|(tag, status)| {
            let status = ReturnCode(u32::from_le_bytes([status[0], status[1], status[2], status[3]]));
            let Some((slot, rest)) = tag
                .size()
                .ok()
                .and_then(|size| values.split_at_checked(size as usize))
            else {
                values = &[];
                return TagValue::failed(ResponseCode::InvalidData);
            };
            values = rest;
            if status.is_ok() {
                decode_one(tag, slot)
            } else {
                TagValue::failed(ResponseCode::Remote(status))
            }
        })
        .collect()
}

fn decode_one(tag: &DirectTag, data: &[u8]) -> TagValue {
    match decode_tag(tag, data) {
        Ok(value) => TagValue::ok(value),
        Err(e) => {
            tracing::debug!(error = %e, index_group = tag.index_group, index_offset = tag.index_offset, "decoding tag");
            TagValue::failed(ResponseCode::InvalidData)
        }
    }
}

impl Inner {
    /// Read any number of tags: one through a plain read, more through a sum
    /// read.
    pub(crate) async fn read(&self, request: ReadRequest) -> Result<ReadResponse> {
        if request.is_empty() {
            return Err(Error::Usage("read request contains no tags".to_string()));
        }

        let mut tags = Vec::with_capacity(request.len());
        for (_, tag) in &request.tags {
            tags.push(self.resolve(tag).await?);
        }

        let results = if tags.len() == 1 {
            self.read_data(&tags).await?
        } else {
            self.read_data_batched(&tags).await?
        };

        Ok(ReadResponse {
            items: request
                .tags
                .into_iter()
                .map(|(name, _)| name)
                .zip(results)
                .collect(),
        })
    }

    /// Read exactly one tag.
    pub(crate) async fn read_single(&self, request: ReadRequest) -> Result<ReadResponse> {
        if request.len() != 1 {
            return Err(Error::Usage(format!(
                "single read takes exactly one tag, got {}",
                request.len()
            )));
        }
        self.read(request).await
    }

    async fn read_data(&self, tags: &[DirectTag]) -> Result<Vec<TagValue>> {
        let [tag] = tags else {
            return Err(Error::Usage("plain read takes exactly one tag".to_string()));
        };
        match self.request(single_read_payload(tag)?).await? {
            AdsPayload::ReadResponse { result, .. } if !result.is_ok() => {
                Ok(vec![TagValue::failed(ResponseCode::from_return_code(result))])
            }
            AdsPayload::ReadResponse { data, .. } => Ok(decode_multi(tags, &data)),
            _ => Err(Error::UnexpectedResponse(CommandId::Read)),
        }
    }

    async fn read_data_batched(&self, tags: &[DirectTag]) -> Result<Vec<TagValue>> {
        match self.request(multi_read_payload(tags)?).await? {
            AdsPayload::ReadWriteResponse { result, .. } if !result.is_ok() => Ok(tags
                .iter()
                .map(|_| TagValue::failed(ResponseCode::Remote(result)))
                .collect()),
            AdsPayload::ReadWriteResponse { data, .. } => Ok(decode_multi(tags, &data)),
            _ => Err(Error::UnexpectedResponse(CommandId::ReadWrite)),
        }
    }

    /// Raw bytes at a group and offset.
    pub(crate) async fn read_raw(&self, index_group: u32, index_offset: u32, length: u32) -> Result<Bytes> {
        let payload = AdsPayload::ReadRequest {
            index_group,
            index_offset,
            length,
        };
        match self.request(payload).await? {
            AdsPayload::ReadResponse { result, .. } if !result.is_ok() => Err(Error::Protocol(result)),
            AdsPayload::ReadResponse { data, .. } => Ok(data),
            _ => Err(Error::UnexpectedResponse(CommandId::Read)),
        }
    }
}
