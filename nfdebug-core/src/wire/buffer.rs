//! Little-endian payload readers and writers.
//!
//! Heap references are written at the width negotiated with the device, so
//! both sides of the codec carry a [`HandleWidth`].

use crate::error::WireError;

/// Width of heap references in payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandleWidth {
    #[default]
    Narrow,
    Wide,
}

impl HandleWidth {
    pub const fn size(self) -> usize {
        match self {
            Self::Narrow => 4,
            Self::Wide => 8,
        }
    }
}

/// A value that can be written into a payload.
pub trait Encode {
    fn encode(&self, w: &mut WireWriter);
}

/// A value that can be read from a payload.
pub trait Decode: Sized {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError>;
}

impl Encode for () {
    fn encode(&self, _w: &mut WireWriter) {}
}

impl Decode for () {
    fn decode(_r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(())
    }
}

impl Encode for u32 {
    fn encode(&self, w: &mut WireWriter) {
        w.u32(*self);
    }
}

impl Decode for u32 {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.u32()
    }
}

/// A list filling the rest of the payload.
impl<T: Decode> Decode for Vec<T> {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.read_all()
    }
}

#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
    handles: HandleWidth,
}

impl WireWriter {
    pub fn new(handles: HandleWidth) -> Self {
        Self { buf: Vec::new(), handles }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a heap reference at the negotiated width. Narrow handles keep
    /// the low 32 bits.
    pub fn handle(&mut self, value: u64) -> &mut Self {
        match self.handles {
            #[allow(clippy::cast_possible_truncation)]
            HandleWidth::Narrow => self.u32(value as u32),
            HandleWidth::Wide => self.u64(value),
        }
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// Write `text` into a zero-padded slot of `len` bytes, truncating if needed.
    /// The slot always ends with at least one zero.
    pub fn fixed_str(&mut self, text: &str, len: usize) -> &mut Self {
        let bytes = text.as_bytes();
        let take = bytes.len().min(len.saturating_sub(1));
        self.buf.extend_from_slice(&bytes[..take]);
        self.buf.resize(self.buf.len() + (len - take), 0);
        self
    }

    /// Write `text` followed by a terminating zero.
    pub fn cstr(&mut self, text: &str) -> &mut Self {
        self.buf.extend_from_slice(text.as_bytes());
        self.buf.push(0);
        self
    }

    pub fn put<T: Encode + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.encode(self);
        self
    }

    pub fn handle_width(&self) -> HandleWidth {
        self.handles
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
    handles: HandleWidth,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8], handles: HandleWidth) -> Self {
        Self { data, pos: 0, handles }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn handle_width(&self) -> HandleWidth {
        self.handles
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Truncated { needed: len, remaining: self.remaining() });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, WireError> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, WireError> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn u64(&mut self) -> Result<u64, WireError> {
        self.array().map(u64::from_le_bytes)
    }

    pub fn handle(&mut self) -> Result<u64, WireError> {
        match self.handles {
            HandleWidth::Narrow => self.u32().map(u64::from),
            HandleWidth::Wide => self.u64(),
        }
    }

    /// Everything not yet consumed.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    /// A zero-padded text slot of exactly `len` bytes.
    pub fn fixed_str(&mut self, len: usize) -> Result<String, WireError> {
        self.bytes(len).map(text_until_nul)
    }

    /// Zero-terminated text. A missing terminator consumes the rest of the payload.
    pub fn cstr(&mut self) -> Result<String, WireError> {
        let tail = &self.data[self.pos..];
        let (text, used) = match tail.iter().position(|&b| b == 0) {
            Some(end) => (&tail[..end], end + 1),
            None => (tail, tail.len()),
        };
        self.pos += used;
        Ok(String::from_utf8_lossy(text).into_owned())
    }

    /// Decode values until the payload is exhausted.
    pub fn read_all<T: Decode>(&mut self) -> Result<Vec<T>, WireError> {
        let mut items = Vec::new();
        while !self.is_empty() {
            let before = self.pos;
            items.push(T::decode(self)?);
            // An element that reads nothing would repeat forever.
            if self.pos == before {
                break;
            }
        }
        Ok(items)
    }

    pub fn get<T: Decode>(&mut self) -> Result<T, WireError> {
        T::decode(self)
    }
}

/// UTF-8 text up to the first zero byte.
pub fn text_until_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
