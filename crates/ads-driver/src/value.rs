//! Typed PLC values and their little endian memory representation.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ValueError;
use crate::tag::{AdsDataType, ArrayInfo, DirectTag, StructLayout, ValueType, element_count};

/// A value read from or written to PLC memory.
#[derive(Debug, Clone, PartialEq)]
pub enum PlcValue {
    Bool(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
    LWord(u64),
    SInt(i8),
    USInt(u8),
    Int(i16),
    UInt(u16),
    DInt(i32),
    UDInt(u32),
    LInt(i64),
    ULInt(u64),
    Real(f32),
    LReal(f64),
    Char(char),
    WChar(char),
    String(String),
    WString(String),
    /// Millisecond resolution.
    Time(Duration),
    /// Nanosecond resolution.
    LTime(Duration),
    /// Seconds since the Unix epoch.
    Date(u32),
    /// Milliseconds since midnight.
    TimeOfDay(Duration),
    /// Seconds since the Unix epoch.
    DateAndTime(u32),
    List(Vec<PlcValue>),
    /// Fields in declaration order.
    Struct(Vec<(String, PlcValue)>),
}

impl PlcValue {
    /// Look up a struct field by name.
    pub fn field(&self, name: &str) -> Option<&PlcValue> {
        match self {
            PlcValue::Struct(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PlcValue::Bool(_) => "BOOL",
            PlcValue::Byte(_) => "BYTE",
            PlcValue::Word(_) => "WORD",
            PlcValue::DWord(_) => "DWORD",
            PlcValue::LWord(_) => "LWORD",
            PlcValue::SInt(_) => "SINT",
            PlcValue::USInt(_) => "USINT",
            PlcValue::Int(_) => "INT",
            PlcValue::UInt(_) => "UINT",
            PlcValue::DInt(_) => "DINT",
            PlcValue::UDInt(_) => "UDINT",
            PlcValue::LInt(_) => "LINT",
            PlcValue::ULInt(_) => "ULINT",
            PlcValue::Real(_) => "REAL",
            PlcValue::LReal(_) => "LREAL",
            PlcValue::Char(_) => "CHAR",
            PlcValue::WChar(_) => "WCHAR",
            PlcValue::String(_) => "STRING",
            PlcValue::WString(_) => "WSTRING",
            PlcValue::Time(_) => "TIME",
            PlcValue::LTime(_) => "LTIME",
            PlcValue::Date(_) => "DATE",
            PlcValue::TimeOfDay(_) => "TIME_OF_DAY",
            PlcValue::DateAndTime(_) => "DATE_AND_TIME",
            PlcValue::List(_) => "list",
            PlcValue::Struct(_) => "struct",
        }
    }

    /// Any integer value widened, used to coerce between integer types.
    fn as_integer(&self) -> Option<i128> {
        Some(match *self {
            PlcValue::Byte(v) | PlcValue::USInt(v) => v.into(),
            PlcValue::Word(v) | PlcValue::UInt(v) => v.into(),
            PlcValue::DWord(v) | PlcValue::UDInt(v) => v.into(),
            PlcValue::LWord(v) | PlcValue::ULInt(v) => v.into(),
            PlcValue::SInt(v) => v.into(),
            PlcValue::Int(v) => v.into(),
            PlcValue::DInt(v) => v.into(),
            PlcValue::LInt(v) => v.into(),
            _ => return None,
        })
    }

    fn as_float(&self) -> Option<f64> {
        match *self {
            PlcValue::Real(v) => Some(v.into()),
            PlcValue::LReal(v) => Some(v),
            _ => self.as_integer().map(|v| v as f64),
        }
    }
}

/// Decode the memory of a whole direct tag.
pub fn decode_tag(tag: &DirectTag, data: &[u8]) -> Result<PlcValue, ValueError> {
    decode(&tag.value_type, tag.string_length, &tag.array_info, data)
}

const MAX_EMPTY_ELEMENTS: u32 = u16::MAX as u32;

/// Decode `data` as an element type, repeated over `array_info` when given.
pub fn decode(
    value_type: &ValueType,
    string_length: Option<u32>,
    array_info: &[ArrayInfo],
    data: &[u8],
) -> Result<PlcValue, ValueError> {
    match array_info.split_first() {
        None => decode_element(value_type, string_length, data),
        Some((dim, rest)) => {
            let stride = value_type
                .size(string_length)
                .zip(element_count(rest))
                .and_then(|(size, count)| size.checked_mul(count))
                .ok_or(ValueError::TooLarge)? as usize;
            let needed = stride
                .checked_mul(dim.num_elements() as usize)
                .ok_or(ValueError::TooLarge)?;
            // Empty inner arrays carry no bytes to bound the outer count.
            if stride == 0 && dim.num_elements() > MAX_EMPTY_ELEMENTS {
                return Err(ValueError::TooLarge);
            }
            ensure(data, needed)?;
            let items = (0..dim.num_elements() as usize)
                .map(|i| decode(value_type, string_length, rest, &data[i * stride..]))
                .collect::<Result<_, _>>()?;
            Ok(PlcValue::List(items))
        }
    }
}

fn decode_element(
    value_type: &ValueType,
    string_length: Option<u32>,
    data: &[u8],
) -> Result<PlcValue, ValueError> {
    match value_type {
        ValueType::Primitive(t) => decode_primitive(*t, string_length, data),
        ValueType::Struct(layout) => decode_struct(layout, data),
    }
}

fn decode_struct(layout: &StructLayout, data: &[u8]) -> Result<PlcValue, ValueError> {
    ensure(data, layout.size as usize)?;
    let fields = layout
        .fields
        .iter()
        .map(|field| {
            let start = field.offset as usize;
            let end = field
                .size()
                .and_then(|size| start.checked_add(size as usize))
                .ok_or(ValueError::TooLarge)?;
            ensure(data, end)?;
            let value = decode(
                &field.value_type,
                field.string_length,
                &field.array_info,
                &data[start..end],
            )?;
            Ok((field.name.clone(), value))
        })
        .collect::<Result<_, ValueError>>()?;
    Ok(PlcValue::Struct(fields))
}

fn decode_primitive(
    data_type: AdsDataType,
    string_length: Option<u32>,
    data: &[u8],
) -> Result<PlcValue, ValueError> {
    let size = data_type.size(string_length).ok_or(ValueError::TooLarge)? as usize;
    ensure(data, size)?;
    let data = &data[..size];

    macro_rules! le {
        ($ty:ty) => {
            <$ty>::from_le_bytes(data.try_into().map_err(|_| ValueError::Truncated {
                needed: size,
                available: data.len(),
            })?)
        };
    }

    Ok(match data_type {
        AdsDataType::Bool => PlcValue::Bool(data[0] != 0),
        AdsDataType::Byte => PlcValue::Byte(data[0]),
        AdsDataType::Word => PlcValue::Word(le!(u16)),
        AdsDataType::DWord => PlcValue::DWord(le!(u32)),
        AdsDataType::LWord => PlcValue::LWord(le!(u64)),
        AdsDataType::SInt => PlcValue::SInt(le!(i8)),
        AdsDataType::USInt => PlcValue::USInt(data[0]),
        AdsDataType::Int => PlcValue::Int(le!(i16)),
        AdsDataType::UInt => PlcValue::UInt(le!(u16)),
        AdsDataType::DInt => PlcValue::DInt(le!(i32)),
        AdsDataType::UDInt => PlcValue::UDInt(le!(u32)),
        AdsDataType::LInt => PlcValue::LInt(le!(i64)),
        AdsDataType::ULInt => PlcValue::ULInt(le!(u64)),
        AdsDataType::Real => PlcValue::Real(le!(f32)),
        AdsDataType::LReal => PlcValue::LReal(le!(f64)),
        AdsDataType::Char => PlcValue::Char(char::from(data[0])),
        AdsDataType::WChar => {
            let unit = le!(u16);
            PlcValue::WChar(char::from_u32(unit.into()).ok_or(ValueError::InvalidCharacter)?)
        }
        AdsDataType::String => PlcValue::String(decode_string(data)),
        AdsDataType::WString => PlcValue::WString(decode_wstring(data)?),
        AdsDataType::Time => PlcValue::Time(Duration::from_millis(le!(u32).into())),
        AdsDataType::LTime => PlcValue::LTime(Duration::from_nanos(le!(u64))),
        AdsDataType::Date => PlcValue::Date(le!(u32)),
        AdsDataType::TimeOfDay => PlcValue::TimeOfDay(Duration::from_millis(le!(u32).into())),
        AdsDataType::DateAndTime => PlcValue::DateAndTime(le!(u32)),
    })
}

/// Everything up to the first NUL. A buffer without terminator is taken whole:
/// the device string was longer than the requested length and is truncated.
fn decode_string(data: &[u8]) -> String {
    let end = match data.iter().position(|b| *b == 0) {
        Some(end) => end,
        None => {
            tracing::debug!(length = data.len(), "string without terminator, truncating");
            data.len()
        }
    };
    // STRING is single byte Windows-1252 on the device; Latin-1 covers the
    // printable range
    data[..end].iter().map(|b| char::from(*b)).collect()
}

fn decode_wstring(data: &[u8]) -> Result<String, ValueError> {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|u| *u != 0)
        .collect();
    String::from_utf16(&units).map_err(|_| ValueError::InvalidCharacter)
}

fn ensure(data: &[u8], needed: usize) -> Result<(), ValueError> {
    if data.len() < needed {
        return Err(ValueError::Truncated {
            needed,
            available: data.len(),
        });
    }
    Ok(())
}

/// Encode a value for writing to a direct tag.
pub fn encode_tag(tag: &DirectTag, value: &PlcValue) -> Result<Bytes, ValueError> {
    let mut buf = BytesMut::new();
    encode(
        &tag.value_type,
        tag.string_length,
        &tag.array_info,
        value,
        &mut buf,
    )?;
    Ok(buf.freeze())
}

fn encode(
    value_type: &ValueType,
    string_length: Option<u32>,
    array_info: &[ArrayInfo],
    value: &PlcValue,
    dst: &mut BytesMut,
) -> Result<(), ValueError> {
    match (array_info.split_first(), value) {
        (None, _) => match value_type {
            ValueType::Primitive(t) => encode_primitive(*t, string_length, value, dst),
            ValueType::Struct(layout) => Err(ValueError::Unsupported(format!(
                "writing structured type {}",
                layout.type_name
            ))),
        },
        (Some((dim, rest)), PlcValue::List(items)) => {
            if items.len() != dim.num_elements() as usize {
                return Err(ValueError::WrongElementCount {
                    expected: dim.num_elements() as usize,
                    found: items.len(),
                });
            }
            items
                .iter()
                .try_for_each(|item| encode(value_type, string_length, rest, item, dst))
        }
        (Some(_), other) => Err(ValueError::TypeMismatch {
            expected: "list".to_string(),
            found: other.kind(),
        }),
    }
}

fn encode_primitive(
    data_type: AdsDataType,
    string_length: Option<u32>,
    value: &PlcValue,
    dst: &mut BytesMut,
) -> Result<(), ValueError> {
    let mismatch = || ValueError::TypeMismatch {
        expected: data_type.name().to_string(),
        found: value.kind(),
    };

    macro_rules! int {
        ($ty:ty, $put:ident) => {{
            let v = value.as_integer().ok_or_else(mismatch)?;
            let v = <$ty>::try_from(v).map_err(|_| ValueError::OutOfRange {
                data_type: data_type.name(),
                value: v.to_string(),
            })?;
            dst.$put(v);
        }};
    }

    match (data_type, value) {
        (AdsDataType::Bool, PlcValue::Bool(v)) => dst.put_u8(u8::from(*v)),
        (AdsDataType::Bool, _) => return Err(mismatch()),
        (AdsDataType::Byte | AdsDataType::USInt, _) => int!(u8, put_u8),
        (AdsDataType::SInt, _) => int!(i8, put_i8),
        (AdsDataType::Word | AdsDataType::UInt, _) => int!(u16, put_u16_le),
        (AdsDataType::Int, _) => int!(i16, put_i16_le),
        (AdsDataType::DWord | AdsDataType::UDInt, _) => int!(u32, put_u32_le),
        (AdsDataType::DInt, _) => int!(i32, put_i32_le),
        (AdsDataType::LWord | AdsDataType::ULInt, _) => int!(u64, put_u64_le),
        (AdsDataType::LInt, _) => int!(i64, put_i64_le),
        (AdsDataType::Real, _) => dst.put_f32_le(value.as_float().ok_or_else(mismatch)? as f32),
        (AdsDataType::LReal, _) => dst.put_f64_le(value.as_float().ok_or_else(mismatch)?),
        (AdsDataType::Char, PlcValue::Char(c)) => {
            let byte = u8::try_from(u32::from(*c)).map_err(|_| ValueError::InvalidCharacter)?;
            dst.put_u8(byte);
        }
        (AdsDataType::WChar, PlcValue::WChar(c) | PlcValue::Char(c)) => {
            let mut units = [0u16; 2];
            match c.encode_utf16(&mut units) {
                [unit] => dst.put_u16_le(*unit),
                _ => return Err(ValueError::InvalidCharacter),
            }
        }
        (AdsDataType::String, PlcValue::String(s)) => {
            let size = data_type.size(string_length).ok_or(ValueError::TooLarge)? as usize;
            let bytes = s
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| ValueError::InvalidCharacter))
                .collect::<Result<Vec<u8>, _>>()?;
            if bytes.len() >= size {
                return Err(ValueError::StringTooLong {
                    max: size - 1,
                    found: bytes.len(),
                });
            }
            dst.put_slice(&bytes);
            dst.put_bytes(0, size - bytes.len());
        }
        (AdsDataType::WString, PlcValue::WString(s) | PlcValue::String(s)) => {
            let size = data_type.size(string_length).ok_or(ValueError::TooLarge)? as usize / 2;
            let units: Vec<u16> = s.encode_utf16().collect();
            if units.len() >= size {
                return Err(ValueError::StringTooLong {
                    max: size - 1,
                    found: units.len(),
                });
            }
            for unit in &units {
                dst.put_u16_le(*unit);
            }
            dst.put_bytes(0, (size - units.len()) * 2);
        }
        (AdsDataType::Time, PlcValue::Time(d)) | (AdsDataType::TimeOfDay, PlcValue::TimeOfDay(d)) => {
            let ms = u32::try_from(d.as_millis()).map_err(|_| ValueError::OutOfRange {
                data_type: data_type.name(),
                value: format!("{d:?}"),
            })?;
            dst.put_u32_le(ms);
        }
        (AdsDataType::LTime, PlcValue::LTime(d)) => {
            let ns = u64::try_from(d.as_nanos()).map_err(|_| ValueError::OutOfRange {
                data_type: data_type.name(),
                value: format!("{d:?}"),
            })?;
            dst.put_u64_le(ns);
        }
        (AdsDataType::Date, PlcValue::Date(s)) | (AdsDataType::DateAndTime, PlcValue::DateAndTime(s)) => {
            dst.put_u32_le(*s)
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::{FieldLayout, parse_tag, Tag};
    use std::sync::Arc;

    fn tag(address: &str) -> DirectTag {
        match parse_tag(address).unwrap() {
            Tag::Direct(tag) => tag,
            _ => unreachable!(),
        }
    }

    #[test]
    fn decode_scalars() {
        assert_eq!(decode_tag(&tag("1/0:BOOL"), &[1]).unwrap(), PlcValue::Bool(true));
        assert_eq!(
            decode_tag(&tag("1/0:INT"), &[0xfe, 0xff]).unwrap(),
            PlcValue::Int(-2)
        );
        assert_eq!(
            decode_tag(&tag("1/0:REAL"), &1.5f32.to_le_bytes()).unwrap(),
            PlcValue::Real(1.5)
        );
        assert_eq!(
            decode_tag(&tag("1/0:TIME"), &1500u32.to_le_bytes()).unwrap(),
            PlcValue::Time(Duration::from_millis(1500))
        );
    }

    #[test]
    fn decode_truncated_data() {
        let err = decode_tag(&tag("1/0:DINT"), &[1, 2]).unwrap_err();
        assert_eq!(
            err,
            ValueError::Truncated {
                needed: 4,
                available: 2
            }
        );
    }

    #[test]
    fn decode_array() {
        let data = [1, 0, 2, 0, 3, 0];
        assert_eq!(
            decode_tag(&tag("1/0:INT[3]"), &data).unwrap(),
            PlcValue::List(vec![PlcValue::Int(1), PlcValue::Int(2), PlcValue::Int(3)])
        );
    }

    #[test]
    fn decode_two_dimensional_array() {
        let data = [1, 2, 3, 4, 5, 6];
        assert_eq!(
            decode_tag(&tag("1/0:BYTE[2][3]"), &data).unwrap(),
            PlcValue::List(vec![
                PlcValue::List(vec![PlcValue::Byte(1), PlcValue::Byte(2), PlcValue::Byte(3)]),
                PlcValue::List(vec![PlcValue::Byte(4), PlcValue::Byte(5), PlcValue::Byte(6)]),
            ])
        );
    }

    #[test]
    fn decode_string_stops_at_terminator() {
        let mut data = b"hello\0garbage".to_vec();
        data.resize(11, 0);
        assert_eq!(
            decode_tag(&tag("1/0:STRING(10)"), &data).unwrap(),
            PlcValue::String("hello".to_string())
        );
    }

    #[test]
    fn longer_device_string_is_truncated_to_requested_length() {
        // STRING(4) reads five bytes; the device sent no terminator within them
        let data = b"abcdefgh";
        assert_eq!(
            decode_tag(&tag("1/0:STRING(4)"), data).unwrap(),
            PlcValue::String("abcde".to_string())
        );
    }

    #[test]
    fn layouts_past_u32_are_errors() {
        let mut string = DirectTag::new(1, 0, AdsDataType::String);
        string.string_length = Some(u32::MAX);
        assert_eq!(decode_tag(&string, b"abc"), Err(ValueError::TooLarge));
        assert_eq!(
            encode_tag(&string, &PlcValue::String("abc".to_string())),
            Err(ValueError::TooLarge)
        );

        let mut nested = DirectTag::new(1, 0, AdsDataType::LReal);
        nested.array_info = vec![
            ArrayInfo::new(0, 2).unwrap(),
            ArrayInfo::new(0, u32::MAX).unwrap(),
            ArrayInfo::new(0, 2).unwrap(),
        ];
        assert_eq!(decode_tag(&nested, &[0; 16]), Err(ValueError::TooLarge));
    }

    #[test]
    fn empty_inner_arrays_bound_the_outer_count() {
        assert_eq!(
            decode_tag(&tag("1/0:INT[2][0]"), &[]),
            Ok(PlcValue::List(vec![PlcValue::List(vec![]), PlcValue::List(vec![])]))
        );
        assert_eq!(
            decode_tag(&tag("1/0:INT[4294967295][0]"), &[]),
            Err(ValueError::TooLarge)
        );
    }

    #[test]
    fn decode_wstring() {
        let mut data = Vec::new();
        for unit in "hé".encode_utf16() {
            data.extend(unit.to_le_bytes());
        }
        data.resize(12, 0);
        assert_eq!(
            decode_tag(&tag("1/0:WSTRING(5)"), &data).unwrap(),
            PlcValue::WString("hé".to_string())
        );
    }

    #[test]
    fn decode_struct_fields_at_offsets() {
        let layout = StructLayout {
            type_name: "ST_Motor".to_string(),
            size: 8,
            fields: vec![
                FieldLayout {
                    name: "running".to_string(),
                    offset: 0,
                    value_type: ValueType::Primitive(AdsDataType::Bool),
                    string_length: None,
                    array_info: vec![],
                },
                FieldLayout {
                    name: "speed".to_string(),
                    offset: 4,
                    value_type: ValueType::Primitive(AdsDataType::Real),
                    string_length: None,
                    array_info: vec![],
                },
            ],
        };
        let mut data = vec![1, 0, 0, 0];
        data.extend(2.5f32.to_le_bytes());

        let value = decode(&ValueType::Struct(Arc::new(layout)), None, &[], &data).unwrap();
        assert_eq!(value.field("running"), Some(&PlcValue::Bool(true)));
        assert_eq!(value.field("speed"), Some(&PlcValue::Real(2.5)));
    }

    #[test]
    fn encode_coerces_integers() {
        let bytes = encode_tag(&tag("1/0:INT"), &PlcValue::DInt(-300)).unwrap();
        assert_eq!(&bytes[..], &(-300i16).to_le_bytes());

        let err = encode_tag(&tag("1/0:SINT"), &PlcValue::DInt(300)).unwrap_err();
        assert!(matches!(err, ValueError::OutOfRange { .. }));
    }

    #[test]
    fn encode_bool_requires_bool() {
        assert_eq!(&encode_tag(&tag("1/0:BOOL"), &PlcValue::Bool(true)).unwrap()[..], &[1]);
        assert!(encode_tag(&tag("1/0:BOOL"), &PlcValue::Int(1)).is_err());
    }

    #[test]
    fn encode_string_pads_to_declared_length() {
        let bytes = encode_tag(&tag("1/0:STRING(5)"), &PlcValue::String("abc".into())).unwrap();
        assert_eq!(&bytes[..], b"abc\0\0\0");

        let err = encode_tag(&tag("1/0:STRING(2)"), &PlcValue::String("abc".into())).unwrap_err();
        assert_eq!(err, ValueError::StringTooLong { max: 2, found: 3 });
    }

    #[test]
    fn encode_array_checks_element_count() {
        let value = PlcValue::List(vec![PlcValue::Int(1), PlcValue::Int(2)]);
        let bytes = encode_tag(&tag("1/0:INT[2]"), &value).unwrap();
        assert_eq!(&bytes[..], &[1, 0, 2, 0]);

        let err = encode_tag(&tag("1/0:INT[3]"), &value).unwrap_err();
        assert_eq!(
            err,
            ValueError::WrongElementCount {
                expected: 3,
                found: 2
            }
        );
    }
}
