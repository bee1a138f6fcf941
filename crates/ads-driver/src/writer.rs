//! Write requests. ADS writes go out one tag at a time.

use ads_transport::{AdsPayload, CommandId};

use crate::connection::Inner;
use crate::error::{Error, Result, TagError};
use crate::reader::ResponseCode;
use crate::tag::{Tag, parse_tag};
use crate::value::{PlcValue, encode_tag};

/// A named tag and the value to store in it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteRequest {
    tags: Vec<(String, Tag, PlcValue)>,
}

impl WriteRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tag(mut self, name: impl Into<String>, tag: impl Into<Tag>, value: PlcValue) -> Self {
        self.tags.push((name.into(), tag.into(), value));
        self
    }

    pub fn add_address(
        self,
        name: impl Into<String>,
        address: &str,
        value: PlcValue,
    ) -> Result<Self, TagError> {
        Ok(self.add_tag(name, parse_tag(address)?, value))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse {
    items: Vec<(String, ResponseCode)>,
}

impl WriteResponse {
    pub fn code(&self, name: &str) -> Option<ResponseCode> {
        self.items.iter().find(|(n, _)| n == name).map(|(_, c)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ResponseCode)> {
        self.items.iter().map(|(n, c)| (n.as_str(), *c))
    }
}

impl Inner {
    pub(crate) async fn write(&self, request: WriteRequest) -> Result<WriteResponse> {
        let [(name, tag, value)] = <[_; 1]>::try_from(request.tags).map_err(|tags| {
            Error::Usage(format!("write takes exactly one tag, got {}", tags.len()))
        })?;

        let direct = self.resolve(&tag).await?;
        let data = encode_tag(&direct, &value)?;
        let payload = AdsPayload::WriteRequest {
            index_group: direct.index_group,
            index_offset: direct.index_offset,
            data,
        };
        let code = match self.request(payload).await? {
            AdsPayload::WriteResponse { result } if result.is_ok() => ResponseCode::Ok,
            AdsPayload::WriteResponse { result } => ResponseCode::Remote(result),
            _ => return Err(Error::UnexpectedResponse(CommandId::Write)),
        };
        Ok(WriteResponse {
            items: vec![(name, code)],
        })
    }
}
