//! nfdebug Core - wire-protocol engine for nanoFramework devices.
//!
//! This crate frames and checksums debugger packets, correlates replies with
//! requests over a single byte stream, manages the bootloader/runtime session
//! lifecycle and decodes values living on the device heap.

pub mod cancel;
pub mod commands;
pub mod config;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod memory;
pub mod transport;
pub mod value;
pub mod wire;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use commands::{AppDomainInfo, AssemblyInfo, Capabilities, DeviceInfo, Version};
pub use config::EngineConfig;
pub use deploy::{ChannelProgress, DeployImage, DeployProgress, DeployReport, DeployStage, ProgressSink};
pub use engine::{ConnectionSource, ConnectionState, DeviceEvent, Engine, LinkStats, SessionInfo};
pub use error::{Error, ErrorKind, Result, ValidationError};
pub use memory::MemoryRead;
pub use transport::{MemoryTransport, TcpTransport, Transport};
pub use value::{Primitive, RuntimeValue, ValueClass, ValueKind};
pub use wire::{Command, Flags, Packet};
