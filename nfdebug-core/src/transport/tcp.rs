//! TCP transport, for devices reachable over the network or through a
//! serial-to-TCP bridge.

use super::{cancelled, not_connected, timed_out, Transport};
use crate::cancel::CancelToken;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Longest single blocking socket read, so cancellation is noticed promptly.
const READ_SLICE: Duration = Duration::from_millis(50);

pub struct TcpTransport {
    address: SocketAddr,
    connect_timeout: Duration,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<ReadHalf>,
}

#[derive(Default)]
struct ReadHalf {
    stream: Option<TcpStream>,
    buffered: Vec<u8>,
}

impl TcpTransport {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            connect_timeout: Duration::from_secs(5),
            writer: Mutex::new(None),
            reader: Mutex::new(ReadHalf::default()),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

fn poisoned() -> io::Error {
    io::Error::other("transport lock poisoned")
}

impl Transport for TcpTransport {
    fn connect(&self) -> io::Result<()> {
        let stream = TcpStream::connect_timeout(&self.address, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        let read_stream = stream.try_clone()?;

        *self.writer.lock().map_err(|_| poisoned())? = Some(stream);
        let mut reader = self.reader.lock().map_err(|_| poisoned())?;
        reader.stream = Some(read_stream);
        reader.buffered.clear();
        log::info!("Connected to {}", self.address);
        Ok(())
    }

    fn disconnect(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            if let Some(stream) = writer.take() {
                let _ = stream.shutdown(Shutdown::Both);
                log::info!("Disconnected from {}", self.address);
            }
        }
        // The read half may be held by a blocked reader; the shutdown above
        // wakes it, and it is dropped on the next connect.
    }

    fn send(&self, bytes: &[u8], timeout: Duration, cancel: &CancelToken) -> io::Result<usize> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        let stream = writer.as_mut().ok_or_else(not_connected)?;
        stream.set_write_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(bytes.len())
    }

    fn read_exactly(&self, count: usize, timeout: Duration, cancel: &CancelToken) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.reader.lock().map_err(|_| poisoned())?;
        let half = &mut *guard;
        let stream = half.stream.as_mut().ok_or_else(not_connected)?;
        let mut chunk = [0u8; 512];

        while half.buffered.len() < count {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }
            stream.set_read_timeout(Some(remaining.min(READ_SLICE)))?;
            match stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "device closed the connection"))
                }
                Ok(n) => half.buffered.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(half.buffered.drain(..count).collect())
    }

    fn describe(&self) -> String {
        format!("tcp:{}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(&buf).unwrap();
        });

        let transport = TcpTransport::new(address);
        transport.connect().expect("connect");
        let cancel = CancelToken::new();
        transport.send(b"ping", Duration::from_secs(1), &cancel).unwrap();
        let echoed = transport.read_exactly(4, Duration::from_secs(2), &cancel).unwrap();
        assert_eq!(echoed, b"ping");
        server.join().unwrap();
        transport.disconnect();
        transport.disconnect();
    }

    #[test]
    fn test_read_before_connect() {
        let transport = TcpTransport::new("127.0.0.1:9".parse().unwrap());
        let err = transport
            .read_exactly(1, Duration::from_millis(10), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
