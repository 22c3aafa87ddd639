//! Memory access module.
//!
//! Handles reading, writing, erasing and checksumming device memory. Large
//! transfers are split into blocks no larger than the configured chunk size.

use crate::cancel::CancelToken;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::wire::{Command, Encode, Flags, WireWriter, MAX_PAYLOAD_SIZE};
use log::{debug, warn};
use std::time::Duration;

/// Room left in a write payload for the address and length.
const WRITE_OVERHEAD: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Range {
    address: u32,
    length: u32,
}

impl Encode for Range {
    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.address).u32(self.length);
    }
}

/// Outcome of a read: the bytes that were actually obtained.
///
/// A device that refuses part of the range leaves `data` shorter than
/// `requested`. Nothing is padded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRead {
    pub address: u32,
    pub requested: usize,
    pub data: Vec<u8>,
}

impl MemoryRead {
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.requested
    }

    /// The data, or [`Error::PartialRead`] if the device refused part of it.
    pub fn into_exact(self) -> Result<Vec<u8>> {
        if self.is_complete() {
            Ok(self.data)
        } else {
            Err(Error::PartialRead { address: self.address, obtained: self.data.len(), requested: self.requested })
        }
    }
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

impl Engine {
    fn chunk_size(&self, configured: usize) -> usize {
        configured.clamp(1, MAX_PAYLOAD_SIZE - WRITE_OVERHEAD)
    }

    /// Read `length` bytes starting at `address`.
    ///
    /// Stops at the first block the device refuses or answers short, and
    /// reports exactly what was obtained up to that point.
    pub fn read_memory(&self, address: u32, length: usize, cancel: &CancelToken) -> Result<MemoryRead> {
        let chunk = self.chunk_size(self.config().memory_chunk_size);
        let timeout = self.config().request_timeout();
        let mut data = Vec::with_capacity(length);

        while data.len() < length {
            let offset = data.len();
            let want = chunk.min(length - offset);
            let at = address.wrapping_add(to_u32(offset));
            match self.read_block(at, want, timeout, cancel) {
                Ok(block) => {
                    let got = block.len().min(want);
                    data.extend_from_slice(&block[..got]);
                    if got < want {
                        warn!("Short read at 0x{at:08X}: {got} of {want} bytes");
                        break;
                    }
                }
                Err(Error::Nack { .. }) => {
                    warn!("Device refused read at 0x{at:08X}");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        debug!("Read {} of {length} bytes at 0x{address:08X}", data.len());
        Ok(MemoryRead { address, requested: length, data })
    }

    /// Read exactly `length` bytes or fail with [`Error::PartialRead`].
    pub fn read_exact(&self, address: u32, length: usize, cancel: &CancelToken) -> Result<Vec<u8>> {
        self.read_memory(address, length, cancel)?.into_exact()
    }

    pub fn read_u32(&self, address: u32, cancel: &CancelToken) -> Result<u32> {
        let bytes = self.read_exact(address, 4, cancel)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// One read request, no chunking.
    pub(crate) fn read_block(
        &self,
        address: u32,
        length: usize,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        let mut w = WireWriter::new(self.handle_width());
        w.put(&Range { address, length: to_u32(length.min(MAX_PAYLOAD_SIZE)) });
        let reply = self.transact(Command::READ_MEMORY, Flags::NONE, w.into_bytes(), timeout, cancel)?;
        Ok(reply.payload)
    }

    /// Write `data` at `address`.
    ///
    /// A refused block fails with [`Error::PartialWrite`] carrying how many
    /// bytes had been written before it.
    pub fn write_memory(&self, address: u32, data: &[u8], cancel: &CancelToken) -> Result<()> {
        let chunk = self.chunk_size(self.config().memory_chunk_size);
        let timeout = self.config().request_timeout();
        for (i, block) in data.chunks(chunk).enumerate() {
            let offset = i * chunk;
            match self.write_block(address.wrapping_add(to_u32(offset)), block, timeout, cancel) {
                Ok(()) => {}
                Err(Error::Nack { .. }) => {
                    return Err(Error::PartialWrite { address, written: offset, requested: data.len() });
                }
                Err(e) => return Err(e),
            }
        }
        debug!("Wrote {} bytes at 0x{address:08X}", data.len());
        Ok(())
    }

    pub fn write_u32(&self, address: u32, value: u32, cancel: &CancelToken) -> Result<()> {
        self.write_memory(address, &value.to_le_bytes(), cancel)
    }

    /// One write request, no chunking.
    pub(crate) fn write_block(&self, address: u32, data: &[u8], timeout: Duration, cancel: &CancelToken) -> Result<()> {
        let mut w = WireWriter::new(self.handle_width());
        w.put(&Range { address, length: to_u32(data.len()) }).bytes(data);
        self.transact(Command::WRITE_MEMORY, Flags::NONE, w.into_bytes(), timeout, cancel)?;
        Ok(())
    }

    /// Checksum of a memory range, computed by the device with the wire CRC.
    pub fn check_memory(&self, address: u32, length: usize, cancel: &CancelToken) -> Result<u32> {
        let range = Range { address, length: to_u32(length) };
        self.call(Command::CHECK_MEMORY, &range, self.config().erase_timeout(), cancel)
    }

    pub fn erase_memory(&self, address: u32, length: usize, cancel: &CancelToken) -> Result<()> {
        let range = Range { address, length: to_u32(length) };
        self.call(Command::ERASE_MEMORY, &range, self.config().erase_timeout(), cancel)
    }
}
