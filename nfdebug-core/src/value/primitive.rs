//! Primitive values copied out of a descriptor.

use super::handle::DataType;
use crate::error::{Error, Result, WireError};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Bool(bool),
    I8(i8),
    U8(u8),
    /// UTF-16 code unit.
    Char(u16),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    I64(i64),
    U64(u64),
    F64(f64),
    /// Ticks since 0001-01-01.
    DateTime(u64),
    /// Ticks.
    TimeSpan(i64),
}

impl Primitive {
    /// Decode a primitive of type `data_type` from the start of `bytes`.
    pub fn decode(data_type: DataType, bytes: &[u8]) -> Result<Self> {
        let size = data_type.primitive_size().ok_or(Error::UnknownDataType(data_type.tag()))?;
        if bytes.len() < size {
            return Err(Error::malformed(
                crate::wire::Command::VALUE_GET_BLOCK,
                WireError::Truncated { needed: size, remaining: bytes.len() },
            ));
        }
        let mut raw = [0u8; 8];
        raw[..size].copy_from_slice(&bytes[..size]);
        let [b0, b1, b2, b3, ..] = raw;
        let value = match data_type {
            DataType::Boolean => Self::Bool(b0 != 0),
            DataType::I1 => Self::I8(i8::from_le_bytes([b0])),
            DataType::U1 => Self::U8(b0),
            DataType::Char => Self::Char(u16::from_le_bytes([b0, b1])),
            DataType::I2 => Self::I16(i16::from_le_bytes([b0, b1])),
            DataType::U2 => Self::U16(u16::from_le_bytes([b0, b1])),
            DataType::I4 => Self::I32(i32::from_le_bytes([b0, b1, b2, b3])),
            DataType::U4 => Self::U32(u32::from_le_bytes([b0, b1, b2, b3])),
            DataType::R4 => Self::F32(f32::from_le_bytes([b0, b1, b2, b3])),
            DataType::I8 => Self::I64(i64::from_le_bytes(raw)),
            DataType::U8 => Self::U64(u64::from_le_bytes(raw)),
            DataType::R8 => Self::F64(f64::from_le_bytes(raw)),
            DataType::DateTime => Self::DateTime(u64::from_le_bytes(raw)),
            DataType::TimeSpan => Self::TimeSpan(i64::from_le_bytes(raw)),
            other => return Err(Error::UnknownDataType(other.tag())),
        };
        Ok(value)
    }

    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Boolean,
            Self::I8(_) => DataType::I1,
            Self::U8(_) => DataType::U1,
            Self::Char(_) => DataType::Char,
            Self::I16(_) => DataType::I2,
            Self::U16(_) => DataType::U2,
            Self::I32(_) => DataType::I4,
            Self::U32(_) => DataType::U4,
            Self::F32(_) => DataType::R4,
            Self::I64(_) => DataType::I8,
            Self::U64(_) => DataType::U8,
            Self::F64(_) => DataType::R8,
            Self::DateTime(_) => DataType::DateTime,
            Self::TimeSpan(_) => DataType::TimeSpan,
        }
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::I8(_) => "sbyte",
            Self::U8(_) => "byte",
            Self::Char(_) => "char",
            Self::I16(_) => "short",
            Self::U16(_) => "ushort",
            Self::I32(_) => "int",
            Self::U32(_) => "uint",
            Self::F32(_) => "float",
            Self::I64(_) => "long",
            Self::U64(_) => "ulong",
            Self::F64(_) => "double",
            Self::DateTime(_) => "DateTime",
            Self::TimeSpan(_) => "TimeSpan",
        }
    }

    /// Little-endian encoding at the primitive's natural width.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Self::Bool(v) => vec![u8::from(v)],
            Self::I8(v) => v.to_le_bytes().to_vec(),
            Self::U8(v) => vec![v],
            Self::Char(v) | Self::U16(v) => v.to_le_bytes().to_vec(),
            Self::I16(v) => v.to_le_bytes().to_vec(),
            Self::I32(v) => v.to_le_bytes().to_vec(),
            Self::U32(v) => v.to_le_bytes().to_vec(),
            Self::F32(v) => v.to_le_bytes().to_vec(),
            Self::I64(v) | Self::TimeSpan(v) => v.to_le_bytes().to_vec(),
            Self::U64(v) | Self::DateTime(v) => v.to_le_bytes().to_vec(),
            Self::F64(v) => v.to_le_bytes().to_vec(),
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::Char(v) => match char::from_u32(u32::from(v)) {
                Some(c) => write!(f, "'{c}'"),
                None => write!(f, "'\\u{v:04X}'"),
            },
            Self::I16(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::DateTime(ticks) => write!(f, "DateTime({ticks} ticks)"),
            Self::TimeSpan(ticks) => write!(f, "TimeSpan({ticks} ticks)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_widths() {
        let bytes = [0xFE, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0];
        assert_eq!(Primitive::decode(DataType::I4, &bytes).unwrap(), Primitive::I32(-2));
        assert_eq!(Primitive::decode(DataType::U1, &bytes).unwrap(), Primitive::U8(0xFE));
        assert_eq!(Primitive::decode(DataType::I8, &bytes).unwrap(), Primitive::I64(0xFFFF_FFFE));
        assert_eq!(Primitive::decode(DataType::Boolean, &[0, 1]).unwrap(), Primitive::Bool(false));
    }

    #[test]
    fn test_decode_rejects_non_primitives() {
        assert!(matches!(Primitive::decode(DataType::String, &[0; 8]), Err(Error::UnknownDataType(0x0F))));
        assert!(Primitive::decode(DataType::R8, &[0; 4]).is_err());
    }

    #[test]
    fn test_bytes_match_data_type_width() {
        let values = [Primitive::Bool(true), Primitive::Char(0x41), Primitive::F32(1.5), Primitive::DateTime(1)];
        for value in values {
            let bytes = value.to_bytes();
            assert_eq!(Some(bytes.len()), value.data_type().primitive_size());
            assert_eq!(Primitive::decode(value.data_type(), &bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Primitive::Char(0x41).to_string(), "'A'");
        assert_eq!(Primitive::I32(-7).to_string(), "-7");
    }
}
