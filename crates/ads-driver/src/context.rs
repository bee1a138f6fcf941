//! Symbol and data-type tables of the connected runtime.
//!
//! Both tables are uploaded once when the connection is established and are
//! read-only afterwards. Resolution walks a dotted path such as
//! `MAIN.motor.speed` from the symbol `MAIN.motor` through the children of
//! its data type, accumulating byte offsets.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ResolveError, TableError};
use crate::tag::{
    AdsDataType, ArrayInfo, DirectTag, FieldLayout, StructLayout, SymbolicTag, ValueType,
    element_count,
};

/// Nesting limit for data types; the tables come from the device and are not
/// guaranteed to be acyclic.
pub const MAX_TYPE_DEPTH: usize = 64;

/// Byte length of the `ADSIGRP_SYM_UPLOADINFO2` response.
pub const UPLOAD_INFO_LEN: u32 = 0x30;

/// Sizes announced by `ADSIGRP_SYM_UPLOADINFO2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadInfo {
    pub symbol_count: u32,
    pub symbol_length: u32,
    pub data_type_count: u32,
    pub data_type_length: u32,
    pub extra_count: u32,
    pub extra_length: u32,
}

impl UploadInfo {
    pub fn parse(mut data: &[u8]) -> Result<Self, TableError> {
        let buf = &mut data;
        Ok(Self {
            symbol_count: take_u32(buf, "symbol count")?,
            symbol_length: take_u32(buf, "symbol length")?,
            data_type_count: take_u32(buf, "data type count")?,
            data_type_length: take_u32(buf, "data type length")?,
            extra_count: take_u32(buf, "extra count")?,
            extra_length: take_u32(buf, "extra length")?,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.symbol_count);
        dst.put_u32_le(self.symbol_length);
        dst.put_u32_le(self.data_type_count);
        dst.put_u32_le(self.data_type_length);
        dst.put_u32_le(self.extra_count);
        dst.put_u32_le(self.extra_length);
        dst.put_bytes(0, UPLOAD_INFO_LEN as usize - 24);
    }
}

/// A variable exposed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    /// Full name, `Program.Variable` or a single global name.
    pub name: String,
    pub index_group: u32,
    pub index_offset: u32,
    pub size: u32,
    pub data_type_name: String,
    pub comment: String,
    /// ADS type id (`ADST_*`) as reported by the device.
    pub ads_type: u32,
    pub flags: u32,
}

impl SymbolEntry {
    pub fn new(
        name: impl Into<String>,
        index_group: u32,
        index_offset: u32,
        size: u32,
        data_type_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            index_group,
            index_offset,
            size,
            data_type_name: data_type_name.into(),
            comment: String::new(),
            ads_type: 0,
            flags: 0,
        }
    }

    fn parse(buf: &mut &[u8]) -> Result<Self, TableError> {
        let entry_length = take_u32(buf, "symbol entry length")?;
        let mut entry = take_entry(buf, entry_length)?;
        let entry = &mut entry;

        let index_group = take_u32(entry, "index group")?;
        let index_offset = take_u32(entry, "index offset")?;
        let size = take_u32(entry, "size")?;
        let ads_type = take_u32(entry, "data type id")?;
        let flags = take_u32(entry, "flags")?;
        let name_length = take_u16(entry, "name length")?;
        let type_length = take_u16(entry, "type name length")?;
        let comment_length = take_u16(entry, "comment length")?;

        Ok(Self {
            name: take_string(entry, name_length, "name")?,
            data_type_name: take_string(entry, type_length, "type name")?,
            comment: take_string(entry, comment_length, "comment")?,
            index_group,
            index_offset,
            size,
            ads_type,
            flags,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let entry_length =
            30 + self.name.len() + self.data_type_name.len() + self.comment.len() + 3;
        dst.put_u32_le(entry_length as u32);
        dst.put_u32_le(self.index_group);
        dst.put_u32_le(self.index_offset);
        dst.put_u32_le(self.size);
        dst.put_u32_le(self.ads_type);
        dst.put_u32_le(self.flags);
        dst.put_u16_le(self.name.len() as u16);
        dst.put_u16_le(self.data_type_name.len() as u16);
        dst.put_u16_le(self.comment.len() as u16);
        put_string(dst, &self.name);
        put_string(dst, &self.data_type_name);
        put_string(dst, &self.comment);
    }
}

/// A data type, or, when nested in `children`, a member of one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataTypeEntry {
    /// Type name at the top level; property name for children.
    pub name: String,
    /// Base type: element type for arrays, aliased type for aliases and
    /// the member type for children.
    pub type_name: String,
    pub comment: String,
    pub size: u32,
    /// Byte offset inside the parent; zero at the top level.
    pub offset: u32,
    pub ads_type: u32,
    pub flags: u32,
    /// Dimensions as half open ranges.
    pub array_info: Vec<ArrayInfo>,
    pub children: Vec<DataTypeEntry>,
}

impl DataTypeEntry {
    /// A structured type with the given members.
    pub fn structure(name: impl Into<String>, size: u32, children: Vec<DataTypeEntry>) -> Self {
        Self {
            name: name.into(),
            size,
            children,
            ..Default::default()
        }
    }

    /// An array type over `element_type`.
    pub fn array(
        name: impl Into<String>,
        element_type: impl Into<String>,
        size: u32,
        array_info: Vec<ArrayInfo>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: element_type.into(),
            size,
            array_info,
            ..Default::default()
        }
    }

    /// A member of a structured type.
    pub fn member(
        name: impl Into<String>,
        type_name: impl Into<String>,
        offset: u32,
        size: u32,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            offset,
            size,
            ..Default::default()
        }
    }

    fn parse(buf: &mut &[u8], depth: usize) -> Result<Self, TableError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(TableError::TooDeep(MAX_TYPE_DEPTH));
        }
        let entry_length = take_u32(buf, "data type entry length")?;
        let mut entry = take_entry(buf, entry_length)?;
        let entry = &mut entry;

        let _version = take_u32(entry, "version")?;
        let _hash = take_u32(entry, "hash value")?;
        let _type_hash = take_u32(entry, "type hash value")?;
        let size = take_u32(entry, "size")?;
        let offset = take_u32(entry, "offset")?;
        let ads_type = take_u32(entry, "data type id")?;
        let flags = take_u32(entry, "flags")?;
        let name_length = take_u16(entry, "name length")?;
        let type_length = take_u16(entry, "type name length")?;
        let comment_length = take_u16(entry, "comment length")?;
        let array_dimensions = take_u16(entry, "array dimensions")?;
        let child_count = take_u16(entry, "sub item count")?;

        let name = take_string(entry, name_length, "name")?;
        let type_name = take_string(entry, type_length, "type name")?;
        let comment = take_string(entry, comment_length, "comment")?;

        let mut array_info = Vec::with_capacity(array_dimensions.into());
        for _ in 0..array_dimensions {
            let lower_bound = take_u32(entry, "array lower bound")?;
            let elements = take_u32(entry, "array element count")?;
            let upper_bound = lower_bound
                .checked_add(elements)
                .ok_or(TableError::Truncated("array bounds"))?;
            array_info.push(ArrayInfo {
                lower_bound,
                upper_bound,
            });
        }

        let children = (0..child_count)
            .map(|_| DataTypeEntry::parse(entry, depth + 1))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            name,
            type_name,
            comment,
            size,
            offset,
            ads_type,
            flags,
            array_info,
            children,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let mut body = BytesMut::new();
        body.put_u32_le(1); // version
        body.put_u32_le(0); // hash value
        body.put_u32_le(0); // type hash value
        body.put_u32_le(self.size);
        body.put_u32_le(self.offset);
        body.put_u32_le(self.ads_type);
        body.put_u32_le(self.flags);
        body.put_u16_le(self.name.len() as u16);
        body.put_u16_le(self.type_name.len() as u16);
        body.put_u16_le(self.comment.len() as u16);
        body.put_u16_le(self.array_info.len() as u16);
        body.put_u16_le(self.children.len() as u16);
        put_string(&mut body, &self.name);
        put_string(&mut body, &self.type_name);
        put_string(&mut body, &self.comment);
        for dim in &self.array_info {
            body.put_u32_le(dim.lower_bound);
            body.put_u32_le(dim.num_elements());
        }
        for child in &self.children {
            child.encode(&mut body);
        }
        dst.put_u32_le(body.len() as u32 + 4);
        dst.put_slice(&body);
    }
}

/// A symbolic path mapped onto device memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub index_group: u32,
    pub index_offset: u32,
    pub type_name: String,
    pub value_type: ValueType,
    pub string_length: Option<u32>,
    pub array_info: Vec<ArrayInfo>,
}

impl ResolvedSymbol {
    fn into_direct_tag(self) -> DirectTag {
        DirectTag {
            index_group: self.index_group,
            index_offset: self.index_offset,
            value_type: self.value_type,
            string_length: self.string_length,
            array_info: self.array_info,
        }
    }
}

struct Layout {
    value_type: ValueType,
    string_length: Option<u32>,
    array_info: Vec<ArrayInfo>,
}

/// The symbol and data-type tables of one connection.
#[derive(Debug, Clone, Default)]
pub struct DriverContext {
    symbols: HashMap<String, SymbolEntry>,
    data_types: HashMap<String, DataTypeEntry>,
}

impl DriverContext {
    pub fn new(symbols: Vec<SymbolEntry>, data_types: Vec<DataTypeEntry>) -> Self {
        Self {
            symbols: symbols.into_iter().map(|s| (s.name.clone(), s)).collect(),
            data_types: data_types.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    /// Build the context from the raw `SYM_UPLOAD` and `SYM_DT_UPLOAD` data.
    pub fn from_uploads(mut symbols: &[u8], mut data_types: &[u8]) -> Result<Self, TableError> {
        let mut symbol_entries = Vec::new();
        while symbols.has_remaining() {
            symbol_entries.push(SymbolEntry::parse(&mut symbols)?);
        }
        let mut type_entries = Vec::new();
        while data_types.has_remaining() {
            type_entries.push(DataTypeEntry::parse(&mut data_types, 0)?);
        }
        tracing::debug!(
            symbols = symbol_entries.len(),
            data_types = type_entries.len(),
            "parsed symbol tables"
        );
        Ok(Self::new(symbol_entries, type_entries))
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbol(&self, name: &str) -> Option<&SymbolEntry> {
        self.symbols.get(name)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &SymbolEntry> {
        self.symbols.values()
    }

    pub fn data_type(&self, name: &str) -> Option<&DataTypeEntry> {
        self.data_types.get(name)
    }

    /// Follow alias entries (no children, no dimensions, a different base
    /// type) down to the entry that defines the layout.
    pub(crate) fn concrete_type<'a>(&'a self, mut entry: &'a DataTypeEntry) -> &'a DataTypeEntry {
        for _ in 0..MAX_TYPE_DEPTH {
            let is_alias = entry.children.is_empty()
                && entry.array_info.is_empty()
                && !entry.type_name.is_empty()
                && entry.type_name != entry.name;
            match self.data_types.get(&entry.type_name) {
                Some(base) if is_alias => entry = base,
                _ => break,
            }
        }
        entry
    }

    /// Resolve a dotted path to its memory location and type.
    pub fn resolve(&self, address: &str) -> Result<ResolvedSymbol, ResolveError> {
        let segments: Vec<&str> = address.split('.').collect();
        let (symbol_name, rest) = match segments.as_slice() {
            [single] => (single.to_string(), &segments[1..]),
            [program, variable, ..] => (format!("{program}.{variable}"), &segments[2..]),
            [] => return Err(ResolveError::UnknownSymbol(address.to_string())),
        };
        let symbol = self
            .symbols
            .get(&symbol_name)
            .ok_or(ResolveError::UnknownSymbol(symbol_name))?;
        if rest.len() > MAX_TYPE_DEPTH {
            return Err(ResolveError::TooDeep(MAX_TYPE_DEPTH));
        }

        let mut index_offset = symbol.index_offset;
        let mut type_name = symbol.data_type_name.as_str();
        let mut member_dims: &[ArrayInfo] = &[];
        for segment in rest {
            let parent = match self.data_types.get(type_name) {
                Some(entry) => self.concrete_type(entry),
                None if AdsDataType::from_type_name(type_name).is_some() => {
                    return Err(ResolveError::UnknownChild {
                        address: address.to_string(),
                        data_type: type_name.to_string(),
                        child: segment.to_string(),
                    });
                }
                None => {
                    return Err(ResolveError::UnknownDataType {
                        address: address.to_string(),
                        data_type: type_name.to_string(),
                    });
                }
            };
            let child = parent
                .children
                .iter()
                .find(|c| c.name == *segment)
                .ok_or_else(|| ResolveError::UnknownChild {
                    address: address.to_string(),
                    data_type: parent.name.clone(),
                    child: segment.to_string(),
                })?;
            index_offset = index_offset.wrapping_add(child.offset);
            type_name = &child.type_name;
            member_dims = &child.array_info;
        }

        let mut layout = self.layout(type_name, 0, address)?;
        if layout.array_info.is_empty() {
            layout.array_info = member_dims.to_vec();
        }
        Ok(ResolvedSymbol {
            index_group: symbol.index_group,
            index_offset,
            type_name: type_name.to_string(),
            value_type: layout.value_type,
            string_length: layout.string_length,
            array_info: layout.array_info,
        })
    }

    /// Resolve a symbolic tag to a direct tag, applying its array range.
    ///
    /// Only the outermost dimension can be narrowed; further dimensions in the
    /// tag must match the declaration.
    pub fn resolve_tag(&self, tag: &SymbolicTag) -> Result<DirectTag, ResolveError> {
        let address = &tag.symbolic_address;
        let direct = narrow(tag, self.resolve(address)?.into_direct_tag())?;
        // device dimensions are only bounded by the table format
        direct.size().map_err(|_| ResolveError::TooLarge {
            address: address.clone(),
        })?;
        Ok(direct)
    }

    fn layout(&self, type_name: &str, depth: usize, address: &str) -> Result<Layout, ResolveError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(ResolveError::TooDeep(MAX_TYPE_DEPTH));
        }
        let unknown = || ResolveError::UnknownDataType {
            address: address.to_string(),
            data_type: type_name.to_string(),
        };
        let primitive = |name: &str| {
            AdsDataType::from_type_name(name).map(|(data_type, string_length)| Layout {
                value_type: ValueType::Primitive(data_type),
                string_length,
                array_info: Vec::new(),
            })
        };

        let Some(entry) = self.data_types.get(type_name) else {
            return primitive(type_name).ok_or_else(unknown);
        };

        if !entry.array_info.is_empty() {
            let element = self.layout(&entry.type_name, depth + 1, address)?;
            let mut array_info = entry.array_info.clone();
            array_info.extend(element.array_info);
            return Ok(Layout {
                array_info,
                ..element
            });
        }

        if !entry.children.is_empty() {
            let fields = entry
                .children
                .iter()
                .map(|child| {
                    let mut member = self.layout(&child.type_name, depth + 1, address)?;
                    if member.array_info.is_empty() {
                        member.array_info = child.array_info.clone();
                    }
                    Ok(FieldLayout {
                        name: child.name.clone(),
                        offset: child.offset,
                        value_type: member.value_type,
                        string_length: member.string_length,
                        array_info: member.array_info,
                    })
                })
                .collect::<Result<Vec<_>, ResolveError>>()?;
            return Ok(Layout {
                value_type: ValueType::Struct(Arc::new(StructLayout {
                    type_name: entry.name.clone(),
                    size: entry.size,
                    fields,
                })),
                string_length: None,
                array_info: Vec::new(),
            });
        }

        if let Some(layout) = primitive(&entry.name) {
            return Ok(layout);
        }
        if !entry.type_name.is_empty() && entry.type_name != entry.name {
            return self.layout(&entry.type_name, depth + 1, address);
        }
        Err(unknown())
    }
}

/// Apply the array range of a symbolic tag to its resolved variable.
fn narrow(tag: &SymbolicTag, mut direct: DirectTag) -> Result<DirectTag, ResolveError> {
    let address = &tag.symbolic_address;
    let Some((first, rest)) = tag.array_info.split_first() else {
        return Ok(direct);
    };
    if direct.array_info.is_empty() {
        return Err(ResolveError::NotAnArray {
            address: address.clone(),
        });
    }

    let out_of_range = |requested: &ArrayInfo, declared: &ArrayInfo| {
        ResolveError::IndexOutOfRange {
            address: address.clone(),
            requested: requested.to_string(),
            declared: declared.to_string(),
        }
    };
    let declared = direct.array_info[0];
    if !declared.contains(first) {
        return Err(out_of_range(first, &declared));
    }
    for (i, requested) in rest.iter().enumerate() {
        match direct.array_info.get(i + 1) {
            Some(declared) if declared == requested => {}
            Some(declared) => return Err(out_of_range(requested, declared)),
            None => {
                return Err(ResolveError::NotAnArray {
                    address: address.clone(),
                });
            }
        }
    }

    let stride = direct
        .element_size()
        .zip(element_count(&direct.array_info[1..]))
        .and_then(|(size, count)| size.checked_mul(count))
        .ok_or_else(|| ResolveError::TooLarge {
            address: address.clone(),
        })?;
    let skip = (first.lower_bound - declared.lower_bound)
        .checked_mul(stride)
        .and_then(|bytes| direct.index_offset.checked_add(bytes))
        .ok_or_else(|| out_of_range(first, &declared))?;
    direct.index_offset = skip;
    direct.array_info[0] = *first;
    Ok(direct)
}

fn take_entry<'a>(buf: &mut &'a [u8], entry_length: u32) -> Result<&'a [u8], TableError> {
    // the length includes its own four bytes
    let body_length = (entry_length as usize)
        .checked_sub(4)
        .filter(|len| *len > 0)
        .ok_or(TableError::InvalidEntryLength(entry_length))?;
    if buf.len() < body_length {
        return Err(TableError::Truncated("table entry"));
    }
    let (entry, rest) = buf.split_at(body_length);
    *buf = rest;
    Ok(entry)
}

fn take_u16(buf: &mut &[u8], field: &'static str) -> Result<u16, TableError> {
    if buf.remaining() < 2 {
        return Err(TableError::Truncated(field));
    }
    Ok(buf.get_u16_le())
}

fn take_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, TableError> {
    if buf.remaining() < 4 {
        return Err(TableError::Truncated(field));
    }
    Ok(buf.get_u32_le())
}

/// A string of `length` bytes followed by a NUL terminator.
fn take_string(buf: &mut &[u8], length: u16, field: &'static str) -> Result<String, TableError> {
    let length = usize::from(length);
    if buf.remaining() < length + 1 {
        return Err(TableError::Truncated(field));
    }
    let s = String::from_utf8_lossy(&buf[..length]).into_owned();
    buf.advance(length + 1);
    Ok(s)
}

fn put_string(dst: &mut BytesMut, s: &str) {
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
}
