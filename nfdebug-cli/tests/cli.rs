use nfdebug_core::wire::{Command as WireCommand, Flags, Frame, FrameDecoder, HandleWidth, Packet, WireWriter};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::process::Command;
use std::thread;

const NFDEBUG: &str = env!("CARGO_BIN_EXE_nfdebug");

/// A bootloader that answers pings and memory map queries on one connection.
/// The thread returns how many pings it answered.
fn spawn_bootloader() -> (SocketAddr, thread::JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 512];
        let mut seq = 0x8000u16;
        let mut pings = 0;
        loop {
            let n = match socket.read(&mut buf) {
                Ok(0) | Err(_) => return pings,
                Ok(n) => n,
            };
            decoder.push(&buf[..n]);
            while let Some(frame) = decoder.next_frame() {
                let Frame::Packet(request) = frame else { continue };
                let mut w = WireWriter::new(HandleWidth::Narrow);
                match request.command() {
                    WireCommand::PING => {
                        pings += 1;
                        w.u32(1).u32(0);
                    }
                    WireCommand::MEMORY_MAP => {
                        w.u32(0x2000_0000).u32(0x2_0000).u32(1);
                    }
                    _ => {}
                }
                seq = seq.wrapping_add(1);
                let reply = Packet::reply(&request.header, seq, Flags::NONE, w.into_bytes());
                if socket.write_all(&reply.to_bytes()).is_err() {
                    return pings;
                }
            }
        }
    });
    (address, handle)
}

#[test]
fn test_cli_help() {
    let output = Command::new(NFDEBUG).arg("--help").output().expect("Failed to run nfdebug");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: nfdebug"));
    assert!(stdout.contains("deploy"));
}

#[test]
fn test_ping_bootloader() {
    let (address, device) = spawn_bootloader();

    let output = Command::new(NFDEBUG)
        .args(["--address", &address.to_string(), "ping"])
        .output()
        .expect("Failed to run nfdebug");

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("connected to the bootloader"));
    device.join().unwrap();
}

#[test]
fn test_memory_map_json() {
    let (address, device) = spawn_bootloader();

    let output = Command::new(NFDEBUG)
        .args(["--address", &address.to_string(), "--json", "memory-map"])
        .output()
        .expect("Failed to run nfdebug");

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let regions: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(regions[0]["address"], 0x2000_0000);
    assert_eq!(regions[0]["flags"], 1);
    device.join().unwrap();
}

#[test]
fn test_listen_keeps_the_session_alive() {
    let (address, device) = spawn_bootloader();

    let output = Command::new(NFDEBUG)
        .args(["--address", &address.to_string(), "listen", "--seconds", "6"])
        .output()
        .expect("Failed to run nfdebug");

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    // The handshake ping plus at least one keepalive.
    assert!(device.join().unwrap() >= 2);
}

#[test]
fn test_unreachable_device() {
    // Bind and drop to find a port nobody listens on.
    let address = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

    let output = Command::new(NFDEBUG)
        .args(["--address", &address.to_string(), "ping"])
        .output()
        .expect("Failed to run nfdebug");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to connect"));
}
