//! Raw value descriptors as sent by the runtime.

use crate::error::{Error, WireError};
use crate::wire::{Decode, Encode, WireReader, WireWriter};

/// Bytes of value data carried inline in every descriptor.
pub const INLINE_SIZE: usize = 128;

/// Runtime data type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Void,
    Boolean,
    I1,
    U1,
    Char,
    I2,
    U2,
    I4,
    U4,
    R4,
    I8,
    U8,
    R8,
    DateTime,
    TimeSpan,
    String,
    Object,
    Class,
    ValueType,
    SzArray,
    ByRef,
    FreeBlock,
    CachedBlock,
    Assembly,
    WeakClass,
    Reflection,
    ArrayByRef,
    GenericInst,
}

impl DataType {
    pub fn from_tag(tag: u32) -> Result<Self, Error> {
        let data_type = match tag {
            0x00 => Self::Void,
            0x01 => Self::Boolean,
            0x02 => Self::I1,
            0x03 => Self::U1,
            0x04 => Self::Char,
            0x05 => Self::I2,
            0x06 => Self::U2,
            0x07 => Self::I4,
            0x08 => Self::U4,
            0x09 => Self::R4,
            0x0A => Self::I8,
            0x0B => Self::U8,
            0x0C => Self::R8,
            0x0D => Self::DateTime,
            0x0E => Self::TimeSpan,
            0x0F => Self::String,
            0x10 => Self::Object,
            0x11 => Self::Class,
            0x12 => Self::ValueType,
            0x13 => Self::SzArray,
            0x14 => Self::ByRef,
            0x15 => Self::FreeBlock,
            0x16 => Self::CachedBlock,
            0x17 => Self::Assembly,
            0x18 => Self::WeakClass,
            0x19 => Self::Reflection,
            0x1A => Self::ArrayByRef,
            0x30 => Self::GenericInst,
            other => return Err(Error::UnknownDataType(other)),
        };
        Ok(data_type)
    }

    pub const fn tag(self) -> u32 {
        match self {
            Self::Void => 0x00,
            Self::Boolean => 0x01,
            Self::I1 => 0x02,
            Self::U1 => 0x03,
            Self::Char => 0x04,
            Self::I2 => 0x05,
            Self::U2 => 0x06,
            Self::I4 => 0x07,
            Self::U4 => 0x08,
            Self::R4 => 0x09,
            Self::I8 => 0x0A,
            Self::U8 => 0x0B,
            Self::R8 => 0x0C,
            Self::DateTime => 0x0D,
            Self::TimeSpan => 0x0E,
            Self::String => 0x0F,
            Self::Object => 0x10,
            Self::Class => 0x11,
            Self::ValueType => 0x12,
            Self::SzArray => 0x13,
            Self::ByRef => 0x14,
            Self::FreeBlock => 0x15,
            Self::CachedBlock => 0x16,
            Self::Assembly => 0x17,
            Self::WeakClass => 0x18,
            Self::Reflection => 0x19,
            Self::ArrayByRef => 0x1A,
            Self::GenericInst => 0x30,
        }
    }

    /// Width of a primitive, `None` for everything else.
    pub const fn primitive_size(self) -> Option<usize> {
        match self {
            Self::Boolean | Self::I1 | Self::U1 => Some(1),
            Self::Char | Self::I2 | Self::U2 => Some(2),
            Self::I4 | Self::U4 | Self::R4 => Some(4),
            Self::I8 | Self::U8 | Self::R8 | Self::DateTime | Self::TimeSpan => Some(8),
            _ => None,
        }
    }

    pub const fn is_primitive(self) -> bool {
        self.primitive_size().is_some()
    }
}

/// Everything the runtime reports about one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueHandle {
    /// Heap address of the value; 0 for null or for values held only inline.
    pub reference: u64,
    pub data_type: u32,
    pub flags: u32,
    pub size: u32,
    pub inline: [u8; INLINE_SIZE],
    /// Full UTF-8 length of a string, of which `inline` holds the start.
    pub bytes_in_string: u32,
    pub string_address: u64,
    pub type_index: u32,
    pub array_reference: u64,
    pub array_data_type: u32,
    pub array_type_index: u32,
    pub array_length: u32,
    pub array_depth: u32,
    /// For a by-ref into an array, the element it refers to.
    pub array_index: u32,
}

impl ValueHandle {
    /// The value is a boxed instance of a value type.
    pub const FLAG_BOXED: u32 = 0x0000_0001;

    pub fn data_type(&self) -> Result<DataType, Error> {
        DataType::from_tag(self.data_type)
    }

    pub const fn is_boxed(&self) -> bool {
        self.flags & Self::FLAG_BOXED != 0
    }
}

impl Default for ValueHandle {
    fn default() -> Self {
        Self {
            reference: 0,
            data_type: DataType::Void.tag(),
            flags: 0,
            size: 0,
            inline: [0; INLINE_SIZE],
            bytes_in_string: 0,
            string_address: 0,
            type_index: 0,
            array_reference: 0,
            array_data_type: 0,
            array_type_index: 0,
            array_length: 0,
            array_depth: 0,
            array_index: 0,
        }
    }
}

impl Decode for ValueHandle {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let reference = r.handle()?;
        let data_type = r.u32()?;
        let flags = r.u32()?;
        let size = r.u32()?;
        let mut inline = [0u8; INLINE_SIZE];
        inline.copy_from_slice(r.bytes(INLINE_SIZE)?);
        Ok(Self {
            reference,
            data_type,
            flags,
            size,
            inline,
            bytes_in_string: r.u32()?,
            string_address: r.handle()?,
            type_index: r.u32()?,
            array_reference: r.handle()?,
            array_data_type: r.u32()?,
            array_type_index: r.u32()?,
            array_length: r.u32()?,
            array_depth: r.u32()?,
            array_index: r.u32()?,
        })
    }
}

impl Encode for ValueHandle {
    fn encode(&self, w: &mut WireWriter) {
        w.handle(self.reference)
            .u32(self.data_type)
            .u32(self.flags)
            .u32(self.size)
            .bytes(&self.inline)
            .u32(self.bytes_in_string)
            .handle(self.string_address)
            .u32(self.type_index)
            .handle(self.array_reference)
            .u32(self.array_data_type)
            .u32(self.array_type_index)
            .u32(self.array_length)
            .u32(self.array_depth)
            .u32(self.array_index);
    }
}
