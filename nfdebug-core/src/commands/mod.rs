//! Command catalog.
//!
//! Typed request and reply pairs, one submodule per protocol area. Each
//! submodule extends [`Engine`](crate::Engine) with the operations it covers.

pub mod capabilities;
pub mod execution;
pub mod messaging;
pub mod monitor;
pub mod thread;
pub mod typesys;

pub use capabilities::{Capabilities, ClrInfo, HalInfo, NativeAssembly, SoftwareInfo};
pub use execution::ExecutionConditions;
pub use messaging::MessagingAddress;
pub use monitor::{FlashSector, MemoryRegion, PingReply, RebootMode, SectorUsage, TargetInfo};
pub use thread::{StackFrame, StackSlot, ThreadStack};
pub use typesys::{AppDomainInfo, AssemblyInfo, DeviceInfo, FieldInfo, MethodInfo, TypeInfo};

use crate::error::WireError;
use crate::wire::{Decode, Encode, WireReader, WireWriter};
use serde::Serialize;
use std::fmt;

/// Four-part version number as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self { major, minor, build, revision }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.revision)
    }
}

impl Encode for Version {
    fn encode(&self, w: &mut WireWriter) {
        w.u16(self.major).u16(self.minor).u16(self.build).u16(self.revision);
    }
}

impl Decode for Version {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { major: r.u16()?, minor: r.u16()?, build: r.u16()?, revision: r.u16()? })
    }
}

/// Size of the fixed name slots used throughout the type system replies.
pub(crate) const NAME_SIZE: usize = 128;
