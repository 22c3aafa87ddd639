//! Monitor commands, answered by both the bootloader and the runtime.

use super::Version;
use crate::cancel::CancelToken;
use crate::engine::{ConnectionSource, Engine};
use crate::error::{Error, Result, WireError};
use crate::wire::{Command, Decode, Encode, Flags, WireReader, WireWriter};
use log::{info, warn};
use serde::Serialize;

/// Source marker identifying the host side in a ping.
const HOST_SOURCE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRequest {
    pub source: u32,
    pub flags: u32,
}

impl PingRequest {
    pub const fn from_host() -> Self {
        Self { source: HOST_SOURCE, flags: 0 }
    }
}

impl Encode for PingRequest {
    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.source).u32(self.flags);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReply {
    /// 0 for the runtime, 1 for the bootloader.
    pub source: u32,
    pub flags: u32,
}

impl PingReply {
    pub const fn source(&self) -> ConnectionSource {
        ConnectionSource::from_marker(self.source)
    }
}

impl Decode for PingReply {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        // Some bootloaders answer with an empty payload.
        if r.is_empty() {
            return Ok(Self { source: u32::MAX, flags: 0 });
        }
        Ok(Self { source: r.u32()?, flags: r.u32().unwrap_or(0) })
    }
}

/// One entry of the device memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryRegion {
    pub address: u32,
    pub length: u32,
    pub flags: u32,
}

impl MemoryRegion {
    pub const RAM: u32 = 0x1;
    pub const FLASH: u32 = 0x2;

    pub const fn is_ram(&self) -> bool {
        self.flags & Self::RAM != 0
    }

    pub const fn is_flash(&self) -> bool {
        self.flags & Self::FLASH != 0
    }
}

impl Decode for MemoryRegion {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { address: r.u32()?, length: r.u32()?, flags: r.u32()? })
    }
}

/// What a flash block range is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SectorUsage {
    Bootstrap,
    Code,
    Config,
    FileSystem,
    Deployment,
    Other(u32),
}

impl SectorUsage {
    const MASK: u32 = 0xF0;

    pub const fn from_flags(flags: u32) -> Self {
        match flags & Self::MASK {
            0x10 => Self::Bootstrap,
            0x20 => Self::Code,
            0x30 => Self::Config,
            0x40 => Self::FileSystem,
            0x50 => Self::Deployment,
            other => Self::Other(other),
        }
    }
}

/// A run of equally sized flash blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlashSector {
    pub start: u32,
    pub num_blocks: u32,
    pub bytes_per_block: u32,
    pub flags: u32,
}

impl FlashSector {
    pub const fn usage(&self) -> SectorUsage {
        SectorUsage::from_flags(self.flags)
    }

    pub const fn len(&self) -> u32 {
        self.num_blocks.saturating_mul(self.bytes_per_block)
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn end(&self) -> u32 {
        self.start.saturating_add(self.len())
    }
}

impl Decode for FlashSector {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { start: r.u32()?, num_blocks: r.u32()?, bytes_per_block: r.u32()?, flags: r.u32()? })
    }
}

/// Address and length spanning every deployment sector, if there are any.
pub fn deployment_range(sectors: &[FlashSector]) -> Option<(u32, u32)> {
    let deployment = sectors.iter().filter(|s| s.usage() == SectorUsage::Deployment && !s.is_empty());
    let (start, end) = deployment.fold(None, |range: Option<(u32, u32)>, s| match range {
        None => Some((s.start, s.end())),
        Some((start, end)) => Some((start.min(s.start), end.max(s.end()))),
    })?;
    Some((start, end - start))
}

/// Firmware identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetInfo {
    pub booter_version: Version,
    pub clr_version: Version,
    pub info: String,
    pub target: String,
    pub platform: String,
}

impl Decode for TargetInfo {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            booter_version: r.get()?,
            clr_version: r.get()?,
            info: r.fixed_str(128)?,
            target: r.fixed_str(32)?,
            platform: r.fixed_str(32)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootMode {
    /// Full device reset.
    Normal,
    /// Reset and stay in the bootloader.
    EnterBootloader,
    /// Restart the CLR only.
    ClrOnly,
}

impl RebootMode {
    const fn bits(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::EnterBootloader => 1,
            Self::ClrOnly => 2,
        }
    }
}

impl Engine {
    pub fn memory_map(&self, cancel: &CancelToken) -> Result<Vec<MemoryRegion>> {
        self.call(Command::MEMORY_MAP, &(), self.config().request_timeout(), cancel)
    }

    pub fn flash_sector_map(&self, cancel: &CancelToken) -> Result<Vec<FlashSector>> {
        self.call(Command::FLASH_SECTOR_MAP, &(), self.config().request_timeout(), cancel)
    }

    pub fn target_info(&self, cancel: &CancelToken) -> Result<TargetInfo> {
        self.call(Command::TARGET_INFO, &(), self.config().request_timeout(), cancel)
    }

    /// Start execution at `address`.
    pub fn execute(&self, address: u32, cancel: &CancelToken) -> Result<()> {
        self.call(Command::EXECUTE, &address, self.config().request_timeout(), cancel)
    }

    /// Reboot the device and drop the session.
    ///
    /// The device may reset before it answers, so a missing reply is not an error.
    pub fn reboot(&self, mode: RebootMode, cancel: &CancelToken) -> Result<()> {
        let mut w = WireWriter::new(self.handle_width());
        w.u32(mode.bits());
        let result = self.transact(
            Command::REBOOT,
            Flags::NON_CRITICAL,
            w.into_bytes(),
            self.config().ping_timeout(),
            cancel,
        );
        match result {
            Ok(_) => {}
            Err(Error::Timeout { .. }) => warn!("Reboot was not acknowledged"),
            Err(e) => return Err(e),
        }
        info!("Device rebooting ({mode:?})");
        self.disconnect();
        Ok(())
    }
}
