//! Tag addresses and their textual syntax.
//!
//! Three grammars are tried in order of specificity:
//!
//! ```text
//! <group>/<offset>:STRING(<n>)[..]     direct, explicit string length
//! <group>/<offset>:<TYPE>[..]          direct
//! <symbolic address>[..]               symbolic, resolved through the device
//! ```
//!
//! Group and offset are decimal or `0x` hex. Every form takes any number of
//! array suffixes: `[N]` is `0..N`, `[A..B]` is `A..B` and `[A:N]` is
//! `A..A+N`, all upper bounds exclusive.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::TagError;

/// Characters of an unspecified STRING, giving the 256 byte protocol default.
pub const DEFAULT_STRING_LENGTH: u32 = 255;

static DIRECT_WITH_STRING_LENGTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<group>0[xX][0-9a-fA-F]+|\d+)/(?P<offset>0[xX][0-9a-fA-F]+|\d+):(?P<type>STRING|WSTRING)\((?P<length>\d+)\)(?P<arrays>(?:\[[^\]]*\])*)$",
    )
    .expect("valid regex")
});

static DIRECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<group>0[xX][0-9a-fA-F]+|\d+)/(?P<offset>0[xX][0-9a-fA-F]+|\d+):(?P<type>[A-Za-z_][A-Za-z0-9_]*)(?P<arrays>(?:\[[^\]]*\])*)$",
    )
    .expect("valid regex")
});

static SYMBOLIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<address>[^\[\]]+)(?P<arrays>(?:\[[^\]]*\])*)$").expect("valid regex")
});

static ARRAY_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[\s*(?P<first>\d+)\s*(?:(?P<sep>\.\.|:)\s*(?P<second>\d+)\s*)?\]").expect("valid regex")
});

/// Primitive ADS data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdsDataType {
    Bool,
    Byte,
    Word,
    DWord,
    LWord,
    SInt,
    USInt,
    Int,
    UInt,
    DInt,
    UDInt,
    LInt,
    ULInt,
    Real,
    LReal,
    Char,
    WChar,
    String,
    WString,
    Time,
    LTime,
    Date,
    TimeOfDay,
    DateAndTime,
}

impl AdsDataType {
    /// Map an IEC type name to a data type. Names are matched case
    /// insensitively and common aliases are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.trim().to_ascii_uppercase().as_str() {
            "BOOL" | "BIT" => Self::Bool,
            "BYTE" => Self::Byte,
            "WORD" => Self::Word,
            "DWORD" => Self::DWord,
            "LWORD" => Self::LWord,
            "SINT" => Self::SInt,
            "USINT" => Self::USInt,
            "INT" => Self::Int,
            "UINT" => Self::UInt,
            "DINT" => Self::DInt,
            "UDINT" => Self::UDInt,
            "LINT" => Self::LInt,
            "ULINT" => Self::ULInt,
            "REAL" => Self::Real,
            "LREAL" => Self::LReal,
            "CHAR" => Self::Char,
            "WCHAR" => Self::WChar,
            "STRING" => Self::String,
            "WSTRING" => Self::WString,
            "TIME" => Self::Time,
            "LTIME" => Self::LTime,
            "DATE" => Self::Date,
            "TIME_OF_DAY" | "TOD" => Self::TimeOfDay,
            "DATE_AND_TIME" | "DT" => Self::DateAndTime,
            _ => return None,
        })
    }

    /// Parse a device type name such as `INT` or `STRING(80)`, returning the
    /// data type and the declared string length, if any.
    pub fn from_type_name(name: &str) -> Option<(Self, Option<u32>)> {
        let name = name.trim();
        if let Some(open) = name.find('(') {
            let length = name[open + 1..].strip_suffix(')')?.trim().parse().ok()?;
            let data_type = Self::from_name(&name[..open])?;
            return data_type.is_string().then_some((data_type, Some(length)));
        }
        Self::from_name(name).map(|t| (t, None))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::Byte => "BYTE",
            Self::Word => "WORD",
            Self::DWord => "DWORD",
            Self::LWord => "LWORD",
            Self::SInt => "SINT",
            Self::USInt => "USINT",
            Self::Int => "INT",
            Self::UInt => "UINT",
            Self::DInt => "DINT",
            Self::UDInt => "UDINT",
            Self::LInt => "LINT",
            Self::ULInt => "ULINT",
            Self::Real => "REAL",
            Self::LReal => "LREAL",
            Self::Char => "CHAR",
            Self::WChar => "WCHAR",
            Self::String => "STRING",
            Self::WString => "WSTRING",
            Self::Time => "TIME",
            Self::LTime => "LTIME",
            Self::Date => "DATE",
            Self::TimeOfDay => "TIME_OF_DAY",
            Self::DateAndTime => "DATE_AND_TIME",
        }
    }

    pub fn is_string(self) -> bool {
        matches!(self, Self::String | Self::WString)
    }

    /// Size of one value in bytes. Strings take `length + 1` characters,
    /// defaulting to [`DEFAULT_STRING_LENGTH`]. `None` when that overflows.
    pub fn size(self, string_length: Option<u32>) -> Option<u32> {
        let characters = || string_length.unwrap_or(DEFAULT_STRING_LENGTH).checked_add(1);
        let size = match self {
            Self::Bool | Self::Byte | Self::SInt | Self::USInt | Self::Char => 1,
            Self::Word | Self::Int | Self::UInt | Self::WChar => 2,
            Self::DWord
            | Self::DInt
            | Self::UDInt
            | Self::Real
            | Self::Time
            | Self::Date
            | Self::TimeOfDay
            | Self::DateAndTime => 4,
            Self::LWord | Self::LInt | Self::ULInt | Self::LReal | Self::LTime => 8,
            Self::String => characters()?,
            Self::WString => characters()?.checked_mul(2)?,
        };
        Some(size)
    }
}

impl fmt::Display for AdsDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One array dimension as a half open range `lower_bound..upper_bound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayInfo {
    pub lower_bound: u32,
    pub upper_bound: u32,
}

impl ArrayInfo {
    /// Returns `None` when `upper_bound < lower_bound`.
    pub fn new(lower_bound: u32, upper_bound: u32) -> Option<Self> {
        (upper_bound >= lower_bound).then_some(Self {
            lower_bound,
            upper_bound,
        })
    }

    pub fn num_elements(&self) -> u32 {
        self.upper_bound - self.lower_bound
    }

    /// Whether `other` lies within this dimension.
    pub fn contains(&self, other: &ArrayInfo) -> bool {
        other.lower_bound >= self.lower_bound && other.upper_bound <= self.upper_bound
    }
}

impl fmt::Display for ArrayInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}]", self.lower_bound, self.upper_bound)
    }
}

/// Number of elements described by a list of dimensions, `None` past
/// `u32::MAX`.
pub fn element_count(array_info: &[ArrayInfo]) -> Option<u32> {
    array_info
        .iter()
        .try_fold(1u32, |count, dim| count.checked_mul(dim.num_elements()))
}

/// A field of a structured data type, as laid out in device memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldLayout {
    pub name: String,
    /// Byte offset from the start of the parent.
    pub offset: u32,
    pub value_type: ValueType,
    pub string_length: Option<u32>,
    pub array_info: Vec<ArrayInfo>,
}

impl FieldLayout {
    pub fn size(&self) -> Option<u32> {
        self.value_type
            .size(self.string_length)?
            .checked_mul(element_count(&self.array_info)?.max(1))
    }
}

/// Memory layout of a structured data type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructLayout {
    pub type_name: String,
    pub size: u32,
    pub fields: Vec<FieldLayout>,
}

/// What a single element of a direct tag holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Primitive(AdsDataType),
    Struct(Arc<StructLayout>),
}

impl ValueType {
    pub fn size(&self, string_length: Option<u32>) -> Option<u32> {
        match self {
            ValueType::Primitive(t) => t.size(string_length),
            ValueType::Struct(layout) => Some(layout.size),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ValueType::Primitive(t) => t.name(),
            ValueType::Struct(layout) => &layout.type_name,
        }
    }
}

/// A tag addressing device memory by index group and offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectTag {
    pub index_group: u32,
    pub index_offset: u32,
    pub value_type: ValueType,
    /// Only meaningful for STRING and WSTRING.
    pub string_length: Option<u32>,
    pub array_info: Vec<ArrayInfo>,
}

impl DirectTag {
    pub fn new(index_group: u32, index_offset: u32, data_type: AdsDataType) -> Self {
        Self {
            index_group,
            index_offset,
            value_type: ValueType::Primitive(data_type),
            string_length: None,
            array_info: Vec::new(),
        }
    }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> Option<u32> {
        self.value_type.size(self.string_length)
    }

    /// Number of elements addressed; one for scalars.
    pub fn num_elements(&self) -> Option<u32> {
        element_count(&self.array_info)
    }

    /// Bytes to transfer when reading or writing the whole tag.
    pub fn size(&self) -> Result<u32, TagError> {
        self.element_size()
            .zip(self.num_elements())
            .and_then(|(size, count)| size.checked_mul(count))
            .ok_or_else(|| TagError::TooLarge(self.to_string()))
    }
}

/// A tag addressing a variable by name, resolved through the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolicTag {
    pub symbolic_address: String,
    pub array_info: Vec<ArrayInfo>,
}

impl SymbolicTag {
    pub fn new(symbolic_address: impl Into<String>) -> Self {
        Self {
            symbolic_address: symbolic_address.into(),
            array_info: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Direct(DirectTag),
    Symbolic(SymbolicTag),
}

impl Tag {
    pub fn array_info(&self) -> &[ArrayInfo] {
        match self {
            Tag::Direct(tag) => &tag.array_info,
            Tag::Symbolic(tag) => &tag.array_info,
        }
    }
}

impl From<DirectTag> for Tag {
    fn from(tag: DirectTag) -> Self {
        Tag::Direct(tag)
    }
}

impl From<SymbolicTag> for Tag {
    fn from(tag: SymbolicTag) -> Self {
        Tag::Symbolic(tag)
    }
}

impl FromStr for Tag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_tag(s)
    }
}

impl fmt::Display for DirectTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}",
            self.index_group,
            self.index_offset,
            self.value_type.name()
        )?;
        if let Some(length) = self.string_length {
            write!(f, "({length})")?;
        }
        self.array_info.iter().try_for_each(|dim| write!(f, "{dim}"))
    }
}

impl fmt::Display for SymbolicTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbolic_address)?;
        self.array_info.iter().try_for_each(|dim| write!(f, "{dim}"))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Direct(tag) => tag.fmt(f),
            Tag::Symbolic(tag) => tag.fmt(f),
        }
    }
}

/// Parse a textual address into a [`Tag`].
pub fn parse_tag(address: &str) -> Result<Tag, TagError> {
    let invalid = || TagError::InvalidAddress(address.to_string());

    if let Some(caps) = DIRECT_WITH_STRING_LENGTH.captures(address) {
        let data_type = AdsDataType::from_name(&caps["type"]).ok_or_else(invalid)?;
        let string_length = caps["length"].parse().map_err(|_| invalid())?;
        return sized(
            address,
            DirectTag {
                index_group: parse_number(&caps["group"]).ok_or_else(invalid)?,
                index_offset: parse_number(&caps["offset"]).ok_or_else(invalid)?,
                value_type: ValueType::Primitive(data_type),
                string_length: Some(string_length),
                array_info: parse_array_info(&caps["arrays"]).ok_or_else(invalid)?,
            },
        );
    }

    if let Some(caps) = DIRECT.captures(address) {
        let data_type = AdsDataType::from_name(&caps["type"]).ok_or_else(|| {
            TagError::UnknownDataType {
                address: address.to_string(),
                data_type: caps["type"].to_string(),
            }
        })?;
        return sized(
            address,
            DirectTag {
                index_group: parse_number(&caps["group"]).ok_or_else(invalid)?,
                index_offset: parse_number(&caps["offset"]).ok_or_else(invalid)?,
                value_type: ValueType::Primitive(data_type),
                string_length: None,
                array_info: parse_array_info(&caps["arrays"]).ok_or_else(invalid)?,
            },
        );
    }

    if let Some(caps) = SYMBOLIC.captures(address) {
        let symbolic_address = caps["address"].trim();
        if symbolic_address.is_empty() {
            return Err(invalid());
        }
        return Ok(Tag::Symbolic(SymbolicTag {
            symbolic_address: symbolic_address.to_string(),
            array_info: parse_array_info(&caps["arrays"]).ok_or_else(invalid)?,
        }));
    }

    Err(invalid())
}

/// A direct tag is only accepted when its whole size fits a read length.
fn sized(address: &str, tag: DirectTag) -> Result<Tag, TagError> {
    tag.size().map_err(|_| TagError::TooLarge(address.to_string()))?;
    Ok(Tag::Direct(tag))
}

/// Decimal or `0x` hex; hex is zero extended to four bytes.
fn parse_number(s: &str) -> Option<u32> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) if hex.len() <= 8 => u32::from_str_radix(hex, 16).ok(),
        Some(_) => None,
        None => s.parse().ok(),
    }
}

fn parse_array_info(mut suffix: &str) -> Option<Vec<ArrayInfo>> {
    let mut dims = Vec::new();
    while !suffix.is_empty() {
        let caps = ARRAY_SUFFIX.captures(suffix)?;
        let first: u32 = caps["first"].parse().ok()?;
        let dim = match (caps.name("sep").map(|m| m.as_str()), caps.name("second")) {
            (None, _) => ArrayInfo::new(0, first)?,
            (Some(".."), Some(second)) => ArrayInfo::new(first, second.as_str().parse().ok()?)?,
            (Some(_), Some(count)) => {
                ArrayInfo::new(first, first.checked_add(count.as_str().parse().ok()?)?)?
            }
            (Some(_), None) => return None,
        };
        dims.push(dim);
        suffix = &suffix[caps.get(0)?.end()..];
    }
    Some(dims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(address: &str) -> DirectTag {
        match parse_tag(address).unwrap() {
            Tag::Direct(tag) => tag,
            other => panic!("expected direct tag, got {other:?}"),
        }
    }

    fn symbolic(address: &str) -> SymbolicTag {
        match parse_tag(address).unwrap() {
            Tag::Symbolic(tag) => tag,
            other => panic!("expected symbolic tag, got {other:?}"),
        }
    }

    #[test]
    fn decimal_and_hex_are_equivalent() {
        let dec = direct("1234/5678:BOOL");
        let hex = direct("0x04D2/0x162E:BOOL");

        assert_eq!(dec.index_group, 1234);
        assert_eq!(dec.index_offset, 5678);
        assert_eq!(dec.value_type, ValueType::Primitive(AdsDataType::Bool));
        assert_eq!(dec, hex);
    }

    #[test]
    fn short_hex_is_zero_extended() {
        let tag = direct("0x4020/0x4:INT");
        assert_eq!(tag.index_group, 0x4020);
        assert_eq!(tag.index_offset, 4);
    }

    #[test]
    fn hex_wider_than_four_bytes_is_rejected() {
        assert!(parse_tag("0x100000000/0:INT").is_err());
    }

    #[test]
    fn explicit_string_length() {
        let tag = direct("0x4020/16:STRING(80)");
        assert_eq!(tag.value_type, ValueType::Primitive(AdsDataType::String));
        assert_eq!(tag.string_length, Some(80));
        assert_eq!(tag.size(), Ok(81));

        let tag = direct("0x4020/16:WSTRING(10)");
        assert_eq!(tag.size(), Ok(22));
    }

    #[test]
    fn unspecified_string_length_uses_protocol_default() {
        assert_eq!(direct("1/2:STRING").size(), Ok(256));
        assert_eq!(direct("1/2:WSTRING").size(), Ok(512));
    }

    #[test]
    fn array_suffixes() {
        assert_eq!(direct("1/2:INT[42]").array_info, vec![ArrayInfo::new(0, 42).unwrap()]);
        assert_eq!(
            direct("1/2:INT[23..42]").array_info,
            vec![ArrayInfo::new(23, 42).unwrap()]
        );
        assert_eq!(
            direct("1/2:INT[23:42]").array_info,
            vec![ArrayInfo::new(23, 65).unwrap()]
        );
    }

    #[test]
    fn array_suffix_boundaries() {
        let empty = direct("1/2:INT[0]");
        assert_eq!(empty.array_info, vec![ArrayInfo::new(0, 0).unwrap()]);
        assert_eq!(empty.size(), Ok(0));

        let large = direct("1/2:BYTE[4294967295]");
        assert_eq!(large.array_info[0].upper_bound, u32::MAX);
        assert_eq!(large.size(), Ok(u32::MAX));

        assert!(parse_tag("1/2:BYTE[4294967295:1]").is_err());
        assert!(parse_tag("1/2:BYTE[4294967296]").is_err());
    }

    #[test]
    fn sizes_past_u32_are_rejected() {
        for address in [
            "1/2:INT[4294967295]",
            "1/2:STRING(4294967295)",
            "1/2:WSTRING(2147483648)",
            "1/2:DINT[65536][65536]",
        ] {
            assert_eq!(
                parse_tag(address).unwrap_err(),
                TagError::TooLarge(address.to_string())
            );
        }
        assert!(parse_tag("1/2:STRING(4294967294)").is_ok());
        assert!(parse_tag("1/2:WSTRING(2147483646)").is_ok());
    }

    #[test]
    fn oversize_tags_built_by_hand_report_an_error() {
        let mut tag = DirectTag::new(1, 2, AdsDataType::LReal);
        tag.array_info = vec![ArrayInfo::new(0, u32::MAX).unwrap()];
        assert_eq!(tag.element_size(), Some(8));
        assert!(matches!(tag.size(), Err(TagError::TooLarge(_))));
        assert_eq!(AdsDataType::String.size(Some(u32::MAX)), None);
        assert_eq!(element_count(&[ArrayInfo::new(0, u32::MAX).unwrap(); 2]), None);
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = parse_tag("1/2:INT[42..23]").unwrap_err();
        assert_eq!(err, TagError::InvalidAddress("1/2:INT[42..23]".to_string()));
    }

    #[test]
    fn multi_dimensional_arrays_chain() {
        let tag = direct("1/2:INT[2][1..3]");
        assert_eq!(
            tag.array_info,
            vec![ArrayInfo::new(0, 2).unwrap(), ArrayInfo::new(1, 3).unwrap()]
        );
        assert_eq!(tag.num_elements(), Some(4));
        assert_eq!(tag.size(), Ok(8));
    }

    #[test]
    fn symbolic_addresses() {
        let tag = symbolic("MAIN.structVar.field[2]");
        assert_eq!(tag.symbolic_address, "MAIN.structVar.field");
        assert_eq!(tag.array_info, vec![ArrayInfo::new(0, 2).unwrap()]);

        assert_eq!(symbolic("GVL.counter").array_info, vec![]);
    }

    #[test]
    fn direct_with_unknown_type_is_not_symbolic() {
        let err = parse_tag("1234/5678:FANCY").unwrap_err();
        assert!(matches!(err, TagError::UnknownDataType { ref data_type, .. } if data_type == "FANCY"));
    }

    #[test]
    fn invalid_addresses_name_the_input() {
        for address in ["", "[3]", "MAIN.x[abc]", "MAIN.x]", "MAIN.x[1..]"] {
            let err = parse_tag(address).unwrap_err();
            assert_eq!(err, TagError::InvalidAddress(address.to_string()));
            assert!(err.to_string().contains(address));
        }
    }

    #[test]
    fn display_round_trips() {
        for address in ["1234/5678:BOOL", "16416/0:STRING(80)[0..2]", "MAIN.x[1..4]"] {
            let tag = parse_tag(address).unwrap();
            assert_eq!(parse_tag(&tag.to_string()).unwrap(), tag);
        }
    }

    #[test]
    fn type_names_with_string_length() {
        assert_eq!(
            AdsDataType::from_type_name("STRING(80)"),
            Some((AdsDataType::String, Some(80)))
        );
        assert_eq!(
            AdsDataType::from_type_name("WSTRING(5)"),
            Some((AdsDataType::WString, Some(5)))
        );
        assert_eq!(AdsDataType::from_type_name("INT(3)"), None);
        assert_eq!(AdsDataType::from_type_name("dint"), Some((AdsDataType::DInt, None)));
    }
}
