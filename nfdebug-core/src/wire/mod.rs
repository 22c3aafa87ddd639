//! Wire protocol: command codes, packet flags, framing and payload encoding.
//!
//! Packet layout (little-endian):
//! ```text
//! ┌──────────────────────┐
//! │ marker:      [u8; 4] │  <- "MSdb"
//! │ command:     u32     │
//! │ flags:       u16     │
//! │ seq:         u16     │
//! │ seq_reply:   u16     │  <- seq of the request being answered, 0 otherwise
//! │ size:        u32     │  <- payload length
//! │ crc_payload: u32     │
//! │ crc_header:  u32     │  <- computed with this field zeroed
//! ├──────────────────────┤
//! │ payload...           │
//! └──────────────────────┘
//! ```

pub mod buffer;
pub mod crc;
pub mod decoder;
pub mod packet;

pub use buffer::{Decode, Encode, HandleWidth, WireReader, WireWriter};
pub use decoder::{Frame, FrameDecoder};
pub use packet::{FrameError, Header, Packet, HEADER_SIZE, MARKER, MAX_PAYLOAD_SIZE};

use std::fmt;

/// A protocol command code.
///
/// Codes below `0x0002_0000` are monitor commands, understood by both the
/// bootloader and the runtime. Everything above belongs to the debugger
/// interface of the running CLR.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Command(pub u32);

impl Command {
    pub const PING: Self = Self(0x0000_0000);
    pub const MESSAGE: Self = Self(0x0000_0001);
    pub const READ_MEMORY: Self = Self(0x0000_0002);
    pub const WRITE_MEMORY: Self = Self(0x0000_0003);
    pub const CHECK_MEMORY: Self = Self(0x0000_0004);
    pub const ERASE_MEMORY: Self = Self(0x0000_0005);
    pub const EXECUTE: Self = Self(0x0000_0006);
    pub const REBOOT: Self = Self(0x0000_0007);
    pub const MEMORY_MAP: Self = Self(0x0000_0008);
    pub const PROGRAM_EXIT: Self = Self(0x0000_0009);
    pub const FLASH_SECTOR_MAP: Self = Self(0x0000_000C);
    pub const TARGET_INFO: Self = Self(0x0000_000E);

    pub const EXECUTION_CHANGE_CONDITIONS: Self = Self(0x0002_0001);
    pub const EXECUTION_BREAKPOINT_HIT: Self = Self(0x0002_0007);
    pub const EXECUTION_QUERY_CAPABILITIES: Self = Self(0x0002_000F);

    pub const THREAD_LIST: Self = Self(0x0002_0021);
    pub const THREAD_STACK: Self = Self(0x0002_0022);
    pub const THREAD_GET: Self = Self(0x0002_0029);

    pub const VALUE_GET_STACK: Self = Self(0x0002_0040);
    pub const VALUE_GET_FIELD: Self = Self(0x0002_0041);
    pub const VALUE_GET_ARRAY: Self = Self(0x0002_0042);
    pub const VALUE_GET_BLOCK: Self = Self(0x0002_0043);
    pub const VALUE_SET_BLOCK: Self = Self(0x0002_0045);

    pub const TYPESYS_ASSEMBLIES: Self = Self(0x0002_0050);
    pub const TYPESYS_APPDOMAINS: Self = Self(0x0002_0051);

    pub const RESOLVE_ASSEMBLY: Self = Self(0x0002_0060);
    pub const RESOLVE_TYPE: Self = Self(0x0002_0061);
    pub const RESOLVE_FIELD: Self = Self(0x0002_0062);
    pub const RESOLVE_METHOD: Self = Self(0x0002_0063);
    pub const RESOLVE_APPDOMAIN: Self = Self(0x0002_0068);

    pub const MESSAGING_QUERY: Self = Self(0x0002_0090);

    const RUNTIME_BASE: u32 = 0x0002_0000;

    /// Whether only a running CLR can answer this command.
    pub const fn requires_runtime(self) -> bool {
        self.0 >= Self::RUNTIME_BASE
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::PING => "Ping",
            Self::MESSAGE => "Message",
            Self::READ_MEMORY => "ReadMemory",
            Self::WRITE_MEMORY => "WriteMemory",
            Self::CHECK_MEMORY => "CheckMemory",
            Self::ERASE_MEMORY => "EraseMemory",
            Self::EXECUTE => "Execute",
            Self::REBOOT => "Reboot",
            Self::MEMORY_MAP => "MemoryMap",
            Self::PROGRAM_EXIT => "ProgramExit",
            Self::FLASH_SECTOR_MAP => "FlashSectorMap",
            Self::TARGET_INFO => "TargetInfo",
            Self::EXECUTION_CHANGE_CONDITIONS => "Execution.ChangeConditions",
            Self::EXECUTION_BREAKPOINT_HIT => "Execution.BreakpointHit",
            Self::EXECUTION_QUERY_CAPABILITIES => "Execution.QueryCapabilities",
            Self::THREAD_LIST => "Thread.List",
            Self::THREAD_STACK => "Thread.Stack",
            Self::THREAD_GET => "Thread.Get",
            Self::VALUE_GET_STACK => "Value.GetStack",
            Self::VALUE_GET_FIELD => "Value.GetField",
            Self::VALUE_GET_ARRAY => "Value.GetArray",
            Self::VALUE_GET_BLOCK => "Value.GetBlock",
            Self::VALUE_SET_BLOCK => "Value.SetBlock",
            Self::TYPESYS_ASSEMBLIES => "TypeSys.Assemblies",
            Self::TYPESYS_APPDOMAINS => "TypeSys.AppDomains",
            Self::RESOLVE_ASSEMBLY => "Resolve.Assembly",
            Self::RESOLVE_TYPE => "Resolve.Type",
            Self::RESOLVE_FIELD => "Resolve.Field",
            Self::RESOLVE_METHOD => "Resolve.Method",
            Self::RESOLVE_APPDOMAIN => "Resolve.AppDomain",
            Self::MESSAGING_QUERY => "Messaging.Query",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "command 0x{:08X}", self.0),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({self})")
    }
}

/// Packet flag bits. Unknown bits are carried through untouched.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(pub u16);

impl Flags {
    pub const NONE: Self = Self(0);
    pub const NON_CRITICAL: Self = Self(0x0001);
    pub const REPLY: Self = Self(0x0002);
    pub const BAD_HEADER: Self = Self(0x0004);
    pub const BAD_PAYLOAD: Self = Self(0x0008);
    pub const NO_CACHING: Self = Self(0x2000);
    pub const NACK: Self = Self(0x4000);
    pub const ACK: Self = Self(0x8000);

    const NAMED: [(Self, &'static str); 7] = [
        (Self::NON_CRITICAL, "NonCritical"),
        (Self::REPLY, "Reply"),
        (Self::BAD_HEADER, "BadHeader"),
        (Self::BAD_PAYLOAD, "BadPayload"),
        (Self::NO_CACHING, "NoCaching"),
        (Self::NACK, "Nack"),
        (Self::ACK, "Ack"),
    ];

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        let mut rest = self.0;
        for (flag, name) in Self::NAMED {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
                rest &= !flag.0;
            }
        }
        if rest != 0 {
            set.entry(&format_args!("0x{rest:04X}"));
        }
        set.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_commands() {
        assert!(!Command::PING.requires_runtime());
        assert!(!Command::WRITE_MEMORY.requires_runtime());
        assert!(!Command::FLASH_SECTOR_MAP.requires_runtime());
        assert!(Command::TYPESYS_ASSEMBLIES.requires_runtime());
        assert!(Command::VALUE_GET_FIELD.requires_runtime());
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::RESOLVE_ASSEMBLY.to_string(), "Resolve.Assembly");
        assert_eq!(Command(0x1234_5678).to_string(), "command 0x12345678");
    }

    #[test]
    fn test_flags() {
        let flags = Flags::REPLY | Flags::NACK;
        assert!(flags.contains(Flags::REPLY));
        assert!(flags.contains(Flags::NACK));
        assert!(!flags.contains(Flags::ACK));
        assert_eq!(format!("{flags:?}"), "{Reply, Nack}");
        assert_eq!(format!("{:?}", Flags(0x0102)), "{Reply, 0x0100}");
    }
}
