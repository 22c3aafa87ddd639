//! In-process transport pair, for simulators and tests.

use super::{cancelled, not_connected, timed_out, Transport};
use crate::cancel::CancelToken;
use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One end of an in-memory duplex channel.
pub struct MemoryTransport {
    name: String,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: Mutex<VecDeque<u8>>,
    connected: AtomicBool,
}

impl MemoryTransport {
    /// Create two connected ends: `(host, device)`.
    pub fn pair() -> (Self, Self) {
        let (host_tx, device_rx) = crossbeam_channel::unbounded();
        let (device_tx, host_rx) = crossbeam_channel::unbounded();
        (Self::new("memory:host", host_tx, host_rx), Self::new("memory:device", device_tx, device_rx))
    }

    fn new(name: &str, tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            tx,
            rx,
            pending: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> io::Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn send(&self, bytes: &[u8], _timeout: Duration, cancel: &CancelToken) -> io::Result<usize> {
        if !self.is_connected() {
            return Err(not_connected());
        }
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))?;
        Ok(bytes.len())
    }

    fn read_exactly(&self, count: usize, timeout: Duration, cancel: &CancelToken) -> io::Result<Vec<u8>> {
        if !self.is_connected() {
            return Err(not_connected());
        }
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock().map_err(|_| io::Error::other("poisoned buffer"))?;

        while pending.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            crossbeam_channel::select! {
                recv(self.rx) -> chunk => match chunk {
                    Ok(chunk) => pending.extend(chunk),
                    Err(_) => return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "peer dropped")),
                },
                recv(cancel.signal()) -> _ => return Err(cancelled()),
                default(remaining) => return Err(timed_out()),
            }
            if !self.is_connected() {
                return Err(not_connected());
            }
        }
        Ok(pending.drain(..count).collect())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
