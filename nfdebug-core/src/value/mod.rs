//! Runtime value model.
//!
//! A [`RuntimeValue`] is a typed view of one value on the device heap. Scalars
//! are copied locally; everything reachable from a value (array elements,
//! fields, the target of a by-ref) is fetched on demand, one round trip at a
//! time. Values borrow the [`Engine`] that produced them and refuse to talk
//! to the device once that session has ended.

pub mod cache;
pub mod handle;
pub mod primitive;

pub use handle::{DataType, ValueHandle, INLINE_SIZE};
pub use primitive::Primitive;

use crate::cancel::CancelToken;
use crate::commands::FieldInfo;
use crate::engine::Engine;
use crate::error::{Error, Result, ValidationError, WireError};
use crate::wire::{Command, Encode, WireWriter};
use log::warn;
use std::cell::OnceCell;
use std::fmt;

/// By-ref chains longer than this are treated as corrupt.
const MAX_INDIRECTION: usize = 8;

/// The one thing a value is, looking through any indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    Null,
    Primitive,
    String,
    Array,
    Object,
    Generic,
    Reflection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionKind {
    Invalid,
    Assembly,
    Type,
    TypeDelayed,
    Constructor,
    Method,
    Field,
    Other(u8),
}

impl ReflectionKind {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Invalid,
            1 => Self::Assembly,
            2 => Self::Type,
            3 => Self::TypeDelayed,
            4 => Self::Constructor,
            5 => Self::Method,
            6 => Self::Field,
            other => Self::Other(other),
        }
    }
}

/// Drop a multi-byte character cut off at the end of `bytes`.
fn without_partial_char(bytes: &[u8]) -> &[u8] {
    let tail = bytes.len().saturating_sub(4);
    let Some(lead) = (tail..bytes.len()).rev().find(|&i| bytes[i] & 0xC0 != 0x80) else {
        return bytes;
    };
    let width = match bytes[lead] {
        0xF0..=0xFF => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    };
    if lead + width > bytes.len() {
        &bytes[..lead]
    } else {
        bytes
    }
}

/// A string, with the part captured inline and the means to fetch the rest.
pub struct StringValue {
    preview: String,
    length: usize,
    address: u64,
    full: OnceCell<String>,
}

impl StringValue {
    fn from_handle(handle: &ValueHandle) -> Self {
        let length = handle.bytes_in_string as usize;
        let captured = length.min(INLINE_SIZE);
        let mut inline = &handle.inline[..captured];
        if captured < length {
            inline = without_partial_char(inline);
        }
        Self {
            preview: String::from_utf8_lossy(inline).into_owned(),
            length,
            address: handle.string_address,
            full: OnceCell::new(),
        }
    }

    /// Length of the full string in UTF-8 bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether the inline capture holds less than the whole string.
    pub fn is_truncated(&self) -> bool {
        self.length > INLINE_SIZE
    }

    pub fn preview(&self) -> &str {
        &self.preview
    }
}

impl fmt::Debug for StringValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringValue")
            .field("preview", &self.preview)
            .field("length", &self.length)
            .field("truncated", &self.is_truncated())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ValueKind<'e> {
    Null,
    Primitive(Primitive),
    String(StringValue),
    Array { element_type: u32, element_type_index: u32, length: u32, depth: u32 },
    Object { type_index: u32, boxed: bool, value_type: bool },
    Generic { type_index: u32 },
    Reflection { kind: ReflectionKind, levels: u16, index: u32 },
    /// A by-ref; owns the value it points at.
    Indirect(Box<RuntimeValue<'e>>),
}

impl ValueKind<'_> {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Primitive(_) => "primitive",
            Self::String(_) => "string",
            Self::Array { .. } => "array",
            Self::Object { .. } => "object",
            Self::Generic { .. } => "generic instance",
            Self::Reflection { .. } => "reflection handle",
            Self::Indirect(_) => "reference",
        }
    }
}

pub struct RuntimeValue<'e> {
    engine: &'e Engine,
    generation: u64,
    handle: ValueHandle,
    kind: ValueKind<'e>,
}

struct Reference(u64);

impl Encode for Reference {
    fn encode(&self, w: &mut WireWriter) {
        w.handle(self.0);
    }
}

struct ElementRequest {
    array: u64,
    index: u32,
}

impl Encode for ElementRequest {
    fn encode(&self, w: &mut WireWriter) {
        w.handle(self.array).u32(self.index);
    }
}

struct FieldRequest {
    object: u64,
    offset: u32,
    field_index: u32,
}

impl Encode for FieldRequest {
    fn encode(&self, w: &mut WireWriter) {
        w.handle(self.object).u32(self.offset).u32(self.field_index);
    }
}

struct SetBlock<'a> {
    reference: u64,
    data_type: u32,
    data: &'a [u8],
}

impl Encode for SetBlock<'_> {
    fn encode(&self, w: &mut WireWriter) {
        w.handle(self.reference).u32(self.data_type).bytes(self.data);
    }
}

impl Engine {
    /// Issue a value query and wrap the first descriptor of the reply.
    pub(crate) fn fetch_value<Req: Encode + ?Sized>(
        &self,
        command: Command,
        request: &Req,
        cancel: &CancelToken,
    ) -> Result<RuntimeValue<'_>> {
        self.fetch_value_at(command, request, 0, cancel)
    }

    fn fetch_value_at<Req: Encode + ?Sized>(
        &self,
        command: Command,
        request: &Req,
        depth: usize,
        cancel: &CancelToken,
    ) -> Result<RuntimeValue<'_>> {
        let generation = self.generation();
        let handles: Vec<ValueHandle> = self.call(command, request, self.config().request_timeout(), cancel)?;
        let handle = handles
            .into_iter()
            .next()
            .ok_or_else(|| Error::malformed(command, WireError::Invalid("reply carries no value".to_string())))?;
        RuntimeValue::build(self, generation, handle, depth, cancel)
    }
}

impl<'e> RuntimeValue<'e> {
    /// Wrap a descriptor received in session `generation`.
    pub fn from_handle(
        engine: &'e Engine,
        generation: u64,
        handle: ValueHandle,
        cancel: &CancelToken,
    ) -> Result<Self> {
        Self::build(engine, generation, handle, 0, cancel)
    }

    fn build(engine: &'e Engine, generation: u64, handle: ValueHandle, depth: usize, cancel: &CancelToken) -> Result<Self> {
        let data_type = handle.data_type()?;
        let kind = match data_type {
            DataType::Void => ValueKind::Null,
            t if t.is_primitive() => ValueKind::Primitive(Primitive::decode(t, &handle.inline)?),
            DataType::String if handle.reference == 0 && handle.string_address == 0 => ValueKind::Null,
            DataType::String => ValueKind::String(StringValue::from_handle(&handle)),
            DataType::Object | DataType::Class | DataType::WeakClass | DataType::SzArray if handle.reference == 0 => {
                ValueKind::Null
            }
            DataType::Object | DataType::Class | DataType::WeakClass => {
                ValueKind::Object { type_index: handle.type_index, boxed: handle.is_boxed(), value_type: false }
            }
            DataType::ValueType => {
                ValueKind::Object { type_index: handle.type_index, boxed: handle.is_boxed(), value_type: true }
            }
            DataType::SzArray => ValueKind::Array {
                element_type: handle.array_data_type,
                element_type_index: handle.array_type_index,
                length: handle.array_length,
                depth: handle.array_depth,
            },
            DataType::GenericInst => ValueKind::Generic { type_index: handle.type_index },
            DataType::Reflection | DataType::Assembly => {
                let raw = &handle.inline;
                ValueKind::Reflection {
                    kind: ReflectionKind::from_raw(raw[0]),
                    levels: u16::from_le_bytes([raw[2], raw[3]]),
                    index: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
                }
            }
            DataType::ByRef | DataType::ArrayByRef => {
                if depth >= MAX_INDIRECTION {
                    return Err(Error::malformed(
                        Command::VALUE_GET_BLOCK,
                        WireError::Invalid(format!("more than {MAX_INDIRECTION} levels of indirection")),
                    ));
                }
                let target = if data_type == DataType::ByRef {
                    engine.fetch_value_at(Command::VALUE_GET_BLOCK, &Reference(handle.reference), depth + 1, cancel)?
                } else {
                    let request = ElementRequest { array: handle.array_reference, index: handle.array_index };
                    engine.fetch_value_at(Command::VALUE_GET_ARRAY, &request, depth + 1, cancel)?
                };
                ValueKind::Indirect(Box::new(target))
            }
            other => return Err(Error::UnknownDataType(other.tag())),
        };
        Ok(Self { engine, generation, handle, kind })
    }

    pub fn kind(&self) -> &ValueKind<'e> {
        &self.kind
    }

    pub fn handle(&self) -> &ValueHandle {
        &self.handle
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Follow by-refs to the value they ultimately point at.
    pub fn resolved(&self) -> &Self {
        match &self.kind {
            ValueKind::Indirect(target) => target.resolved(),
            _ => self,
        }
    }

    pub fn class(&self) -> ValueClass {
        match &self.resolved().kind {
            ValueKind::Null => ValueClass::Null,
            ValueKind::Primitive(_) => ValueClass::Primitive,
            ValueKind::String(_) => ValueClass::String,
            ValueKind::Array { .. } => ValueClass::Array,
            ValueKind::Object { .. } => ValueClass::Object,
            ValueKind::Generic { .. } => ValueClass::Generic,
            ValueKind::Reflection { .. } => ValueClass::Reflection,
            ValueKind::Indirect(_) => unreachable!("resolved() never stops at a by-ref"),
        }
    }

    /// True only for by-refs; the other predicates look through them.
    pub fn is_reference(&self) -> bool {
        matches!(self.kind, ValueKind::Indirect(_))
    }

    pub fn is_null(&self) -> bool {
        self.class() == ValueClass::Null
    }

    pub fn is_primitive(&self) -> bool {
        self.class() == ValueClass::Primitive
    }

    pub fn is_array(&self) -> bool {
        self.class() == ValueClass::Array
    }

    pub fn is_string(&self) -> bool {
        self.class() == ValueClass::String
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self.resolved().kind {
            ValueKind::Primitive(value) => Some(value),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<&StringValue> {
        match &self.resolved().kind {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Full text of a string value.
    ///
    /// A string longer than the inline capture costs exactly one extra
    /// memory read, made on first use. If that read fails the inline preview
    /// is returned instead. `None` if this is not a string.
    pub fn text(&self, cancel: &CancelToken) -> Option<&str> {
        let target = self.resolved();
        let ValueKind::String(s) = &target.kind else {
            return None;
        };
        if !s.is_truncated() {
            return Some(&s.preview);
        }
        Some(s.full.get_or_init(|| target.fetch_string(s, cancel)).as_str())
    }

    fn fetch_string(&self, s: &StringValue, cancel: &CancelToken) -> String {
        let fetched = self.engine.ensure_generation(self.generation).and_then(|()| {
            let address = u32::try_from(s.address).map_err(|_| Error::CapabilityMissing("64-bit memory access"))?;
            self.engine.read_block(address, s.length, self.engine.config().string_fetch_timeout(), cancel)
        });
        match fetched {
            Ok(bytes) if bytes.len() >= s.length => String::from_utf8_lossy(&bytes[..s.length]).into_owned(),
            Ok(bytes) => {
                warn!("String at 0x{:X} came back short ({} of {} bytes)", s.address, bytes.len(), s.length);
                s.preview.clone()
            }
            Err(e) => {
                warn!("Could not fetch string at 0x{:X}: {e}", s.address);
                s.preview.clone()
            }
        }
    }

    /// Number of elements, for arrays.
    pub fn array_length(&self) -> Option<u32> {
        match self.resolved().kind {
            ValueKind::Array { length, .. } => Some(length),
            _ => None,
        }
    }

    /// Fetch one array element. The index is checked locally first.
    pub fn element(&self, index: u32, cancel: &CancelToken) -> Result<RuntimeValue<'e>> {
        let target = self.resolved();
        let ValueKind::Array { length, .. } = target.kind else {
            return Err(ValidationError::WrongKind { operation: "element access", kind: target.kind.name() }.into());
        };
        if index >= length {
            return Err(ValidationError::IndexOutOfRange { index, length }.into());
        }
        self.engine.ensure_generation(self.generation)?;
        self.engine.fetch_value(Command::VALUE_GET_ARRAY, &ElementRequest { array: target.handle.reference, index }, cancel)
    }

    /// Fetch a field of an object, by its resolved descriptor.
    pub fn field(&self, field: &FieldInfo, cancel: &CancelToken) -> Result<RuntimeValue<'e>> {
        self.field_request(field.offset, field.index, cancel)
    }

    /// Fetch a field of an object by instance offset alone.
    pub fn field_at(&self, offset: u32, cancel: &CancelToken) -> Result<RuntimeValue<'e>> {
        self.field_request(offset, 0, cancel)
    }

    fn field_request(&self, offset: u32, field_index: u32, cancel: &CancelToken) -> Result<RuntimeValue<'e>> {
        let target = self.resolved();
        if !matches!(target.kind, ValueKind::Object { .. } | ValueKind::Generic { .. }) {
            return Err(ValidationError::WrongKind { operation: "field access", kind: target.kind.name() }.into());
        }
        self.engine.ensure_generation(self.generation)?;
        let request = FieldRequest { object: target.handle.reference, offset, field_index };
        self.engine.fetch_value(Command::VALUE_GET_FIELD, &request, cancel)
    }

    /// Name of the value's type.
    pub fn type_name(&self, cancel: &CancelToken) -> Result<String> {
        let target = self.resolved();
        match &target.kind {
            ValueKind::Null => Ok("null".to_string()),
            ValueKind::Primitive(value) => Ok(value.type_name().to_string()),
            ValueKind::String(_) => Ok("System.String".to_string()),
            ValueKind::Reflection { .. } => Ok("System.Reflection".to_string()),
            ValueKind::Array { element_type_index, .. } => {
                self.engine.ensure_generation(self.generation)?;
                Ok(format!("{}[]", self.engine.resolve_type(*element_type_index, cancel)?.name))
            }
            ValueKind::Object { type_index, .. } | ValueKind::Generic { type_index } => {
                self.engine.ensure_generation(self.generation)?;
                Ok(self.engine.resolve_type(*type_index, cancel)?.name)
            }
            ValueKind::Indirect(_) => unreachable!("resolved() never stops at a by-ref"),
        }
    }

    /// Overwrite a primitive on the device. The new value must have the same type.
    pub fn set_primitive(&mut self, value: Primitive, cancel: &CancelToken) -> Result<()> {
        if let ValueKind::Indirect(target) = &mut self.kind {
            return target.set_primitive(value, cancel);
        }
        let ValueKind::Primitive(current) = self.kind else {
            return Err(ValidationError::WrongKind { operation: "set_primitive", kind: self.kind.name() }.into());
        };
        if current.data_type() != value.data_type() {
            return Err(ValidationError::TypeMismatch { expected: current.type_name(), actual: value.type_name() }.into());
        }
        if self.handle.reference == 0 {
            return Err(ValidationError::NullReference.into());
        }
        self.engine.ensure_generation(self.generation)?;

        let data = value.to_bytes();
        let request = SetBlock { reference: self.handle.reference, data_type: value.data_type().tag(), data: &data };
        self.engine.call::<_, ()>(Command::VALUE_SET_BLOCK, &request, self.engine.config().request_timeout(), cancel)?;

        self.handle.inline[..data.len()].copy_from_slice(&data);
        self.kind = ValueKind::Primitive(value);
        Ok(())
    }

    /// Overwrite a string in place. The new text must have exactly the same
    /// UTF-8 length; anything else is rejected without contacting the device.
    pub fn set_string(&mut self, text: &str, cancel: &CancelToken) -> Result<()> {
        if let ValueKind::Indirect(target) = &mut self.kind {
            return target.set_string(text, cancel);
        }
        let ValueKind::String(s) = &self.kind else {
            return Err(ValidationError::WrongKind { operation: "set_string", kind: self.kind.name() }.into());
        };
        if text.len() != s.length {
            return Err(ValidationError::StringLengthMismatch { expected: s.length, actual: text.len() }.into());
        }
        self.engine.ensure_generation(self.generation)?;
        let address = u32::try_from(s.address).map_err(|_| Error::CapabilityMissing("64-bit memory access"))?;
        self.engine.write_memory(address, text.as_bytes(), cancel)?;

        let captured = text.len().min(INLINE_SIZE);
        self.handle.inline[..captured].copy_from_slice(&text.as_bytes()[..captured]);
        let updated = StringValue::from_handle(&self.handle);
        // Set at once: the whole text is already known.
        let _ = updated.full.set(text.to_string());
        self.kind = ValueKind::String(updated);
        Ok(())
    }
}

impl fmt::Debug for RuntimeValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeValue")
            .field("generation", &self.generation)
            .field("reference", &format_args!("0x{:X}", self.handle.reference))
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_preview_capture() {
        let mut handle = ValueHandle { data_type: DataType::String.tag(), bytes_in_string: 5, ..Default::default() };
        handle.inline[..5].copy_from_slice(b"hello");
        let s = StringValue::from_handle(&handle);
        assert_eq!(s.preview(), "hello");
        assert!(!s.is_truncated());

        handle.bytes_in_string = 300;
        handle.inline = [b'x'; INLINE_SIZE];
        let long = StringValue::from_handle(&handle);
        assert!(long.is_truncated());
        assert_eq!(long.preview().len(), INLINE_SIZE);
        assert_eq!(long.len(), 300);
    }

    #[test]
    fn test_truncated_preview_ends_on_a_char_boundary() {
        let euro = "\u{20AC}".as_bytes();
        let mut handle = ValueHandle { data_type: DataType::String.tag(), bytes_in_string: 200, ..Default::default() };
        // The inline cut splits a 3-byte character after its first 2 bytes.
        handle.inline[..126].fill(b'a');
        handle.inline[126..].copy_from_slice(&euro[..2]);
        let s = StringValue::from_handle(&handle);
        assert_eq!(s.preview().len(), 126);
        assert!(!s.preview().contains(char::REPLACEMENT_CHARACTER));

        handle.inline[125..].copy_from_slice(euro);
        let whole = StringValue::from_handle(&handle);
        assert!(whole.preview().ends_with('\u{20AC}'));
        assert_eq!(whole.preview().len(), INLINE_SIZE);
    }

    #[test]
    fn test_reflection_kinds() {
        assert_eq!(ReflectionKind::from_raw(2), ReflectionKind::Type);
        assert_eq!(ReflectionKind::from_raw(6), ReflectionKind::Field);
        assert_eq!(ReflectionKind::from_raw(40), ReflectionKind::Other(40));
    }
}
