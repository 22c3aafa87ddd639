//! Capability negotiation.
//!
//! The runtime is asked once per session for each capability block. Blocks
//! the device refuses or cannot encode are left at their defaults; only
//! session-ending failures abort the handshake.

use super::{Version, NAME_SIZE};
use crate::cancel::CancelToken;
use crate::engine::Engine;
use crate::error::{ErrorKind, Result, WireError};
use crate::wire::{Command, Decode, HandleWidth, WireReader};
use log::{debug, warn};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Query {
    Flags = 1,
    Software = 2,
    Hal = 5,
    Clr = 6,
    NativeAssemblies = 8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SoftwareInfo {
    pub build_date: String,
    pub compiler_info: String,
    pub compiler_version: u32,
}

impl Decode for SoftwareInfo {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { build_date: r.fixed_str(22)?, compiler_info: r.fixed_str(16)?, compiler_version: r.u32()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct HalInfo {
    pub version: Version,
    pub vendor: String,
    pub oem: u8,
    pub model: u8,
    pub sku: u16,
    pub target: String,
    pub platform: String,
}

impl Decode for HalInfo {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            version: r.get()?,
            vendor: r.fixed_str(NAME_SIZE)?,
            oem: r.u8()?,
            model: r.u8()?,
            sku: r.u16()?,
            target: r.fixed_str(32)?,
            platform: r.fixed_str(32)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ClrInfo {
    pub version: Version,
    pub vendor: String,
    pub target_framework: Version,
}

impl Decode for ClrInfo {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { version: r.get()?, vendor: r.fixed_str(NAME_SIZE)?, target_framework: r.get()? })
    }
}

/// An interop assembly compiled into the firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NativeAssembly {
    pub checksum: u32,
    pub name: String,
    pub version: Version,
}

impl Decode for NativeAssembly {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { checksum: r.u32()?, name: r.fixed_str(NAME_SIZE)?, version: r.get()? })
    }
}

/// What the connected runtime supports. Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    pub flags: u32,
    pub software: Option<SoftwareInfo>,
    pub hal: Option<HalInfo>,
    pub clr: Option<ClrInfo>,
    pub native_assemblies: Vec<NativeAssembly>,
}

impl Capabilities {
    pub const SOURCE_LEVEL_DEBUGGING: u32 = 0x0000_0001;
    pub const PROFILING: u32 = 0x0000_0002;
    pub const APP_DOMAINS: u32 = 0x0000_0004;
    pub const EXCEPTION_FILTERS: u32 = 0x0000_0008;
    pub const INCREMENTAL_DEPLOYMENT: u32 = 0x0000_0010;
    pub const SOFT_REBOOT: u32 = 0x0000_0020;
    pub const CONFIG_BLOCK_REQUIRES_ERASE: u32 = 0x0000_0080;
    pub const HAS_BOOTLOADER: u32 = 0x0000_0100;
    /// Heap references are 64 bits wide.
    pub const WIDE_HANDLES: u32 = 0x0001_0000;

    pub const fn has(&self, flag: u32) -> bool {
        self.flags & flag == flag
    }

    pub const fn app_domains(&self) -> bool {
        self.has(Self::APP_DOMAINS)
    }

    pub const fn handle_width(&self) -> HandleWidth {
        if self.has(Self::WIDE_HANDLES) {
            HandleWidth::Wide
        } else {
            HandleWidth::Narrow
        }
    }
}

/// Keep a capability block the device could not provide at its default.
fn optional<T>(result: Result<T>, what: Query) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if matches!(e.kind(), ErrorKind::Protocol | ErrorKind::Framing | ErrorKind::Timeout) => {
            warn!("Capability query {what:?} failed: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl Engine {
    fn query_capability<T: Decode>(&self, what: Query, cancel: &CancelToken) -> Result<T> {
        self.call(Command::EXECUTION_QUERY_CAPABILITIES, &(what as u32), self.config().request_timeout(), cancel)
    }

    /// Ask the runtime for every capability block.
    pub(crate) fn fetch_capabilities(&self, cancel: &CancelToken) -> Result<Capabilities> {
        let flags = optional(self.query_capability::<u32>(Query::Flags, cancel), Query::Flags)?.unwrap_or(0);
        let capabilities = Capabilities {
            flags,
            software: optional(self.query_capability(Query::Software, cancel), Query::Software)?,
            hal: optional(self.query_capability(Query::Hal, cancel), Query::Hal)?,
            clr: optional(self.query_capability(Query::Clr, cancel), Query::Clr)?,
            native_assemblies: optional(self.query_capability(Query::NativeAssemblies, cancel), Query::NativeAssemblies)?
                .unwrap_or_default(),
        };
        debug!(
            "Capabilities: flags 0x{:08X}, {} native assemblies",
            capabilities.flags,
            capabilities.native_assemblies.len()
        );
        Ok(capabilities)
    }
}
