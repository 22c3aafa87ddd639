//! Transport abstraction.
//!
//! The engine talks to the device through a duplex byte channel. USB, serial
//! and TCP back-ends all reduce to this contract.

pub mod memory;
pub mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

use crate::cancel::CancelToken;
use std::io;
use std::time::Duration;

/// A duplex byte channel to one device.
///
/// Implementations are shared between the engine's read loop and request
/// senders, so every method takes `&self`. The engine guarantees a single
/// reader and serializes writers.
pub trait Transport: Send + Sync {
    /// Open the channel.
    fn connect(&self) -> io::Result<()>;

    /// Close the channel. Closing an already closed channel is a no-op.
    fn disconnect(&self);

    /// Write all of `bytes`, returning the number written.
    fn send(&self, bytes: &[u8], timeout: Duration, cancel: &CancelToken) -> io::Result<usize>;

    /// Read exactly `count` bytes.
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] or [`io::ErrorKind::Interrupted`]
    /// (cancellation) without consuming anything: bytes that arrived before the
    /// failure stay buffered for the next call.
    fn read_exactly(&self, count: usize, timeout: Duration, cancel: &CancelToken) -> io::Result<Vec<u8>>;

    /// Short human-readable description, for logs.
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

pub(crate) fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "read timed out")
}

pub(crate) fn cancelled() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "cancelled")
}

pub(crate) fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is not connected")
}
