//! Scripted device simulator shared by the integration tests.
//!
//! The simulator sits on the device end of a [`MemoryTransport`] pair,
//! decodes every host request and answers it from a [`Device`] model that
//! tests can adjust while the engine is connected.

#![allow(dead_code)]

use nfdebug_core::commands::Version;
use nfdebug_core::value::{DataType, ValueHandle, INLINE_SIZE};
use nfdebug_core::wire::{crc, Command, Flags, Frame, FrameDecoder, HandleWidth, Header, Packet, WireReader, WireWriter};
use nfdebug_core::{CancelToken, Capabilities, Engine, EngineConfig, MemoryTransport, Transport};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const MEMORY_BASE: u32 = 0x2000_0000;
pub const MEMORY_SIZE: usize = 0x1_0000;

/// How the device answers one request.
pub enum Response {
    Reply(Vec<u8>),
    Nack,
    Ignore,
    Delayed(Duration, Vec<u8>),
}

/// Behaviour of the simulated device.
pub struct Device {
    /// 0 = runtime, 1 = bootloader.
    pub source: u32,
    pub capability_flags: u32,
    pub memory: Vec<u8>,
    /// Reads at or beyond this address are refused; reads crossing it come back short.
    pub readable_until: u32,
    /// Number of writes accepted before every further write is refused.
    pub writes_before_nack: Option<usize>,
    pub writes_done: usize,
    pub assemblies: Vec<(String, Version)>,
    pub unresolvable_assemblies: HashSet<u32>,
    pub app_domains: Vec<(u32, String, Vec<u32>)>,
    pub type_names: HashMap<u32, String>,
    pub threads: Vec<u32>,
    pub stack: Vec<(u32, u32)>,
    pub conditions: u32,
    /// Value replies keyed by command and the request's selector (index, offset, reference or pid).
    pub values: HashMap<(Command, u32), ValueHandle>,
    pub set_blocks: Vec<(u32, u32, Vec<u8>)>,
    pub silent: HashSet<Command>,
    pub delays: HashMap<Command, Duration>,
    pub nacked: HashSet<Command>,
}

impl Device {
    pub fn runtime() -> Self {
        Self {
            source: 0,
            capability_flags: Capabilities::APP_DOMAINS | Capabilities::SOURCE_LEVEL_DEBUGGING,
            memory: vec![0; MEMORY_SIZE],
            readable_until: MEMORY_BASE + MEMORY_SIZE as u32,
            writes_before_nack: None,
            writes_done: 0,
            assemblies: vec![
                ("mscorlib".to_string(), Version::new(1, 15, 5, 0)),
                ("nanoFramework.Runtime.Events".to_string(), Version::new(1, 11, 6, 0)),
                ("Blinky".to_string(), Version::new(1, 0, 0, 0)),
            ],
            unresolvable_assemblies: HashSet::new(),
            app_domains: vec![(1, "default".to_string(), vec![0, 1, 2])],
            type_names: HashMap::new(),
            threads: vec![1, 3],
            stack: vec![(0x0600_0012, 0x1C), (0x0600_0001, 0x04)],
            conditions: 0x2,
            values: HashMap::new(),
            set_blocks: Vec::new(),
            silent: HashSet::new(),
            delays: HashMap::new(),
            nacked: HashSet::new(),
        }
    }

    pub fn bootloader() -> Self {
        Self { source: 1, ..Self::runtime() }
    }

    pub fn mem(&self, address: u32, length: usize) -> &[u8] {
        let start = (address - MEMORY_BASE) as usize;
        &self.memory[start..start + length]
    }

    pub fn mem_mut(&mut self, address: u32, length: usize) -> &mut [u8] {
        let start = (address - MEMORY_BASE) as usize;
        &mut self.memory[start..start + length]
    }

    fn in_range(address: u32, length: u32) -> bool {
        address >= MEMORY_BASE && u64::from(address) + u64::from(length) <= u64::from(MEMORY_BASE) + MEMORY_SIZE as u64
    }

    pub fn handle(&mut self, packet: &Packet) -> Response {
        let command = packet.command();
        if self.silent.contains(&command) {
            return Response::Ignore;
        }
        if self.nacked.contains(&command) {
            return Response::Nack;
        }
        let response = self.answer(command, &packet.payload);
        match (response, self.delays.get(&command)) {
            (Response::Reply(payload), Some(delay)) => Response::Delayed(*delay, payload),
            (response, _) => response,
        }
    }

    fn answer(&mut self, command: Command, payload: &[u8]) -> Response {
        let mut r = WireReader::new(payload, HandleWidth::Narrow);
        let mut w = WireWriter::new(HandleWidth::Narrow);

        match command {
            Command::PING => {
                w.u32(self.source).u32(0);
            }
            Command::EXECUTION_QUERY_CAPABILITIES => match word(&mut r) {
                1 => {
                    w.u32(self.capability_flags);
                }
                6 => {
                    w.put(&Version::new(1, 15, 0, 0)).fixed_str("nanoFramework", 128).put(&Version::new(1, 0, 0, 0));
                }
                _ => return Response::Nack,
            },
            Command::READ_MEMORY => {
                let (address, length) = (word(&mut r), word(&mut r));
                if !Self::in_range(address, length) || address >= self.readable_until {
                    return Response::Nack;
                }
                let available = (self.readable_until - address).min(length) as usize;
                w.bytes(self.mem(address, available));
            }
            Command::WRITE_MEMORY => {
                let (address, length) = (word(&mut r), word(&mut r));
                let data = r.rest().to_vec();
                if !Self::in_range(address, length) || data.len() != length as usize {
                    return Response::Nack;
                }
                if self.writes_before_nack.is_some_and(|limit| self.writes_done >= limit) {
                    return Response::Nack;
                }
                self.writes_done += 1;
                self.mem_mut(address, data.len()).copy_from_slice(&data);
            }
            Command::ERASE_MEMORY => {
                let (address, length) = (word(&mut r), word(&mut r));
                if !Self::in_range(address, length) {
                    return Response::Nack;
                }
                self.mem_mut(address, length as usize).fill(0xFF);
            }
            Command::CHECK_MEMORY => {
                let (address, length) = (word(&mut r), word(&mut r));
                if !Self::in_range(address, length) {
                    return Response::Nack;
                }
                w.u32(crc::checksum(self.mem(address, length as usize)));
            }
            Command::MEMORY_MAP => {
                w.u32(MEMORY_BASE).u32(MEMORY_SIZE as u32).u32(1);
                w.u32(0x0800_0000).u32(0x10_0000).u32(2);
            }
            Command::FLASH_SECTOR_MAP => {
                w.u32(0x0800_0000).u32(2).u32(0x4000).u32(0x10);
                w.u32(0x0800_8000).u32(4).u32(0x4000).u32(0x20);
                w.u32(MEMORY_BASE).u32(4).u32(0x1000).u32(0x50);
            }
            Command::TARGET_INFO => {
                w.put(&Version::new(1, 0, 0, 0))
                    .put(&Version::new(1, 15, 0, 0))
                    .fixed_str("simulated", 128)
                    .fixed_str("SIM_TARGET", 32)
                    .fixed_str("SIM", 32);
            }
            Command::REBOOT => return Response::Ignore,
            Command::EXECUTE => {}
            Command::TYPESYS_ASSEMBLIES => {
                for index in 0..self.assemblies.len() as u32 {
                    w.u32(index);
                }
            }
            Command::RESOLVE_ASSEMBLY => {
                let index = word(&mut r);
                if self.unresolvable_assemblies.contains(&index) {
                    return Response::Nack;
                }
                let Some((name, version)) = self.assemblies.get(index as usize) else {
                    return Response::Nack;
                };
                w.u32(0).fixed_str(name, 128).put(version);
            }
            Command::TYPESYS_APPDOMAINS => {
                for (id, _, _) in &self.app_domains {
                    w.u32(*id);
                }
            }
            Command::RESOLVE_APPDOMAIN => {
                let id = word(&mut r);
                let Some((_, name, assemblies)) = self.app_domains.iter().find(|(d, _, _)| *d == id) else {
                    return Response::Nack;
                };
                w.u32(0).cstr(name);
                for index in assemblies {
                    w.u32(*index);
                }
            }
            Command::RESOLVE_TYPE => {
                let index = word(&mut r);
                let name = self.type_names.get(&index).cloned().unwrap_or_else(|| format!("Type{index}"));
                w.fixed_str(&name, 128);
            }
            Command::RESOLVE_METHOD => {
                let index = word(&mut r);
                w.u32(0x0200_0001).fixed_str(&format!("Method{index:X}"), 128);
            }
            Command::RESOLVE_FIELD => {
                let index = word(&mut r);
                w.u32(0x0200_0001).u32(index * 4).fixed_str(&format!("field{index}"), 128);
            }
            Command::THREAD_LIST => {
                for pid in &self.threads {
                    w.u32(*pid);
                }
            }
            Command::THREAD_STACK => {
                w.u32(0).u32(1);
                for (method, ip) in &self.stack {
                    w.u32(*method).u32(*ip);
                }
            }
            Command::EXECUTION_CHANGE_CONDITIONS => {
                let (set, reset) = (word(&mut r), word(&mut r));
                self.conditions = (self.conditions | set) & !reset;
                w.u32(self.conditions);
            }
            Command::MESSAGING_QUERY => {
                let selector = word(&mut r);
                w.u32(u32::from(selector == 1));
            }
            Command::VALUE_GET_BLOCK | Command::THREAD_GET => return self.value_reply(command, word(&mut r)),
            Command::VALUE_GET_ARRAY | Command::VALUE_GET_FIELD => {
                let _reference = word(&mut r);
                return self.value_reply(command, word(&mut r));
            }
            Command::VALUE_GET_STACK => {
                let _ = (word(&mut r), word(&mut r), word(&mut r));
                return self.value_reply(command, word(&mut r));
            }
            Command::VALUE_SET_BLOCK => {
                let (reference, data_type) = (word(&mut r), word(&mut r));
                self.set_blocks.push((reference, data_type, r.rest().to_vec()));
            }
            _ => return Response::Nack,
        }
        Response::Reply(w.into_bytes())
    }

    fn value_reply(&self, command: Command, key: u32) -> Response {
        match self.values.get(&(command, key)) {
            Some(handle) => {
                let mut w = WireWriter::new(HandleWidth::Narrow);
                w.put(handle);
                Response::Reply(w.into_bytes())
            }
            None => Response::Nack,
        }
    }
}

fn word(r: &mut WireReader<'_>) -> u32 {
    r.u32().unwrap_or(0)
}

#[derive(Default)]
struct Log {
    requests: Vec<Header>,
    host_replies: Vec<Header>,
}

pub struct Simulator {
    device: Arc<MemoryTransport>,
    model: Arc<Mutex<Device>>,
    log: Arc<Mutex<Log>>,
    stop: CancelToken,
    thread: Option<JoinHandle<()>>,
}

/// Timeouts short enough to keep failure-path tests quick.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        request_timeout_ms: 300,
        ping_timeout_ms: 100,
        ping_retries: 2,
        keepalive_failures: 2,
        memory_chunk_size: 64,
        deploy_chunk_size: 64,
        deploy_timeout_ms: 300,
        erase_timeout_ms: 300,
        string_fetch_timeout_ms: 200,
        read_poll_ms: 20,
        event_capacity: 64,
    }
}

/// Start a simulator and an engine wired to it. The engine is not connected yet.
pub fn start(model: Device) -> (Engine, Simulator) {
    start_with_config(model, fast_config())
}

pub fn start_with_config(model: Device, config: EngineConfig) -> (Engine, Simulator) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (host, device) = MemoryTransport::pair();
    let device = Arc::new(device);
    device.connect().expect("device end connects");

    let model = Arc::new(Mutex::new(model));
    let log = Arc::new(Mutex::new(Log::default()));
    let stop = CancelToken::new();
    let thread = {
        let (device, model, log, stop) = (device.clone(), model.clone(), log.clone(), stop.clone());
        thread::spawn(move || serve(&device, &model, &log, &stop))
    };

    let engine = Engine::new(Arc::new(host), config);
    (engine, Simulator { device, model, log, stop, thread: Some(thread) })
}

/// Start and connect, asserting the handshake succeeds.
pub fn connected(model: Device) -> (Engine, Simulator) {
    let (engine, sim) = start(model);
    engine.connect(&CancelToken::new()).expect("handshake succeeds");
    (engine, sim)
}

fn serve(device: &Arc<MemoryTransport>, model: &Mutex<Device>, log: &Mutex<Log>, stop: &CancelToken) {
    let mut decoder = FrameDecoder::new();
    let mut seq: u16 = 0x8000;
    loop {
        match device.read_exactly(decoder.needed(), Duration::from_millis(20), stop) {
            Ok(bytes) => decoder.push(&bytes),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(_) => return,
        }
        while let Some(frame) = decoder.next_frame() {
            let Frame::Packet(packet) = frame else { continue };
            let flags = packet.flags();
            if flags.contains(Flags::REPLY) || flags.contains(Flags::NACK) || flags.contains(Flags::ACK) {
                log.lock().unwrap().host_replies.push(packet.header);
                continue;
            }
            log.lock().unwrap().requests.push(packet.header);
            let response = model.lock().unwrap().handle(&packet);
            seq = seq.wrapping_add(1);
            respond(device, &packet.header, seq, response);
        }
    }
}

fn respond(device: &Arc<MemoryTransport>, request: &Header, seq: u16, response: Response) {
    let reply = match response {
        Response::Ignore => return,
        Response::Nack => Packet::reply(request, seq, Flags::NACK, Vec::new()),
        Response::Reply(payload) => Packet::reply(request, seq, Flags::NONE, payload),
        Response::Delayed(delay, payload) => {
            let reply = Packet::reply(request, seq, Flags::NONE, payload);
            let device = device.clone();
            thread::spawn(move || {
                thread::sleep(delay);
                let _ = device.send(&reply.to_bytes(), Duration::from_secs(1), &CancelToken::new());
            });
            return;
        }
    };
    let _ = device.send(&reply.to_bytes(), Duration::from_secs(1), &CancelToken::new());
}

impl Simulator {
    pub fn with_model<R>(&self, f: impl FnOnce(&mut Device) -> R) -> R {
        f(&mut self.model.lock().unwrap())
    }

    /// How many requests with `command` the device has received.
    pub fn count(&self, command: Command) -> usize {
        self.log.lock().unwrap().requests.iter().filter(|h| h.command == command).count()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log.lock().unwrap().requests.iter().map(|h| h.command).collect()
    }

    /// ACKs and NACKs the host has sent.
    pub fn host_replies(&self) -> Vec<Header> {
        self.log.lock().unwrap().host_replies.clone()
    }

    pub fn clear_log(&self) {
        let mut log = self.log.lock().unwrap();
        log.requests.clear();
        log.host_replies.clear();
    }

    /// Send a packet to the host unprompted.
    pub fn send(&self, packet: &Packet) {
        self.send_bytes(&packet.to_bytes());
    }

    pub fn send_bytes(&self, bytes: &[u8]) {
        self.device.send(bytes, Duration::from_secs(1), &CancelToken::new()).expect("device send");
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Wait until `condition` holds, polling for up to a second.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

pub fn primitive_handle(reference: u32, data_type: DataType, bytes: &[u8]) -> ValueHandle {
    let mut handle = ValueHandle {
        reference: u64::from(reference),
        data_type: data_type.tag(),
        size: bytes.len() as u32,
        ..Default::default()
    };
    handle.inline[..bytes.len()].copy_from_slice(bytes);
    handle
}

pub fn string_handle(reference: u32, address: u32, text: &str) -> ValueHandle {
    let bytes = text.as_bytes();
    let captured = bytes.len().min(INLINE_SIZE);
    let mut handle = ValueHandle {
        reference: u64::from(reference),
        data_type: DataType::String.tag(),
        bytes_in_string: bytes.len() as u32,
        string_address: u64::from(address),
        ..Default::default()
    };
    handle.inline[..captured].copy_from_slice(&bytes[..captured]);
    handle
}

pub fn array_handle(reference: u32, element_type: DataType, length: u32) -> ValueHandle {
    ValueHandle {
        reference: u64::from(reference),
        data_type: DataType::SzArray.tag(),
        array_reference: u64::from(reference),
        array_data_type: element_type.tag(),
        array_type_index: 0x0100_0004,
        array_length: length,
        array_depth: 1,
        ..Default::default()
    }
}

pub fn object_handle(reference: u32, type_index: u32) -> ValueHandle {
    ValueHandle {
        reference: u64::from(reference),
        data_type: DataType::Class.tag(),
        type_index,
        ..Default::default()
    }
}
