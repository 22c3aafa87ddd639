//! Connection state and per-session bookkeeping.

use crate::commands::capabilities::Capabilities;
use crate::wire::HandleWidth;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Bootloader,
    Runtime,
}

impl ConnectionState {
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Bootloader | Self::Runtime)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Bootloader => "connected to the bootloader",
            Self::Runtime => "connected to the runtime",
        })
    }
}

/// What the device reported itself to be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionSource {
    Unknown,
    Bootloader,
    Runtime,
}

impl ConnectionSource {
    /// Decode the source marker carried in a ping reply.
    pub const fn from_marker(marker: u32) -> Self {
        match marker {
            0 => Self::Runtime,
            1 => Self::Bootloader,
            _ => Self::Unknown,
        }
    }
}

/// Everything known about the current session. Replaced wholesale on every
/// connect, never patched across a reconnect.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub state: ConnectionState,
    pub source: ConnectionSource,
    pub capabilities: Option<Arc<Capabilities>>,
    /// Incremented on every connect; values captured under an older
    /// generation are stale.
    pub generation: u64,
    pub last_activity: Option<Instant>,
}

impl SessionInfo {
    pub(crate) fn disconnected(generation: u64) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            source: ConnectionSource::Unknown,
            capabilities: None,
            generation,
            last_activity: None,
        }
    }

    pub fn handle_width(&self) -> HandleWidth {
        self.capabilities.as_ref().map_or(HandleWidth::Narrow, |caps| caps.handle_width())
    }
}
