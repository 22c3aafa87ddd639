//! Notifications raised by the device, and link health counters.

use super::state::ConnectionSource;
use crate::error::WireError;
use crate::wire::{Command, Decode, Flags, WireReader};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Connected(ConnectionSource),
    Disconnected,
    /// Text output from the device (debug log, `Console` output).
    Message(String),
    ProgramExit,
    BreakpointHit(BreakpointEvent),
    /// Anything else the device sent unprompted, including replies that
    /// arrived after their request gave up.
    Unsolicited { command: Command, flags: Flags, payload: Vec<u8> },
}

/// Payload of an execution stop reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointEvent {
    pub pid: u32,
    pub depth: u32,
    pub method_index: u32,
    pub ip: u32,
    pub flags: u32,
}

impl BreakpointEvent {
    pub const STEP_IN: u32 = 0x0001;
    pub const STEP_OVER: u32 = 0x0002;
    pub const STEP_OUT: u32 = 0x0004;
    pub const HARD: u32 = 0x0008;
    pub const EXCEPTION_THROWN: u32 = 0x0010;
    pub const EXCEPTION_CAUGHT: u32 = 0x0020;
    pub const EXCEPTION_UNCAUGHT: u32 = 0x0040;
    pub const THREAD_TERMINATED: u32 = 0x0080;
    pub const THREAD_CREATED: u32 = 0x0100;
    pub const ASSEMBLIES_LOADED: u32 = 0x0200;
    pub const BREAK: u32 = 0x1000;

    pub const fn has(&self, flag: u32) -> bool {
        self.flags & flag == flag
    }
}

impl Decode for BreakpointEvent {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { pid: r.u32()?, depth: r.u32()?, method_index: r.u32()?, ip: r.u32()?, flags: r.u32()? })
    }
}

/// Callback receiving device text output. Runs on the read loop thread and
/// must not issue requests on the same engine.
pub type MessageListener = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Default)]
pub(crate) struct LinkCounters {
    spurious_bytes: AtomicU64,
    bad_headers: AtomicU64,
    bad_payloads: AtomicU64,
    unmatched_replies: AtomicU64,
    nacks_sent: AtomicU64,
    packets_received: AtomicU64,
}

/// Point-in-time copy of the link counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub spurious_bytes: u64,
    pub bad_headers: u64,
    pub bad_payloads: u64,
    pub unmatched_replies: u64,
    pub nacks_sent: u64,
    pub packets_received: u64,
}

impl LinkCounters {
    pub(crate) fn add_spurious(&self, count: usize) {
        self.spurious_bytes.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn bad_header(&self) {
        self.bad_headers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bad_payload(&self) {
        self.bad_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unmatched(&self) {
        self.unmatched_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn nack_sent(&self) {
        self.nacks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LinkStats {
        LinkStats {
            spurious_bytes: self.spurious_bytes.load(Ordering::Relaxed),
            bad_headers: self.bad_headers.load(Ordering::Relaxed),
            bad_payloads: self.bad_payloads.load(Ordering::Relaxed),
            unmatched_replies: self.unmatched_replies.load(Ordering::Relaxed),
            nacks_sent: self.nacks_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{HandleWidth, WireWriter};

    #[test]
    fn test_breakpoint_decode() {
        let mut w = WireWriter::default();
        w.u32(3).u32(1).u32(0x0400_0012).u32(0x1C).u32(BreakpointEvent::THREAD_CREATED);
        let bytes = w.into_bytes();
        let event = BreakpointEvent::decode(&mut WireReader::new(&bytes, HandleWidth::Narrow)).unwrap();
        assert_eq!(event.pid, 3);
        assert_eq!(event.ip, 0x1C);
        assert!(event.has(BreakpointEvent::THREAD_CREATED));
        assert!(!event.has(BreakpointEvent::HARD));
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = LinkCounters::default();
        counters.add_spurious(5);
        counters.bad_header();
        counters.bad_payload();
        counters.bad_payload();
        let stats = counters.snapshot();
        assert_eq!(stats.spurious_bytes, 5);
        assert_eq!(stats.bad_headers, 1);
        assert_eq!(stats.bad_payloads, 2);
        assert_eq!(stats.unmatched_replies, 0);
    }
}
