//! Session engine.
//!
//! Owns one transport, runs the background read loop, correlates replies with
//! requests and drives the connection state machine:
//!
//! ```text
//! Disconnected -> Connecting -> { Bootloader | Runtime } -> Disconnected
//! ```
//!
//! Requests may be issued from any number of threads. Each one blocks on its
//! own reply slot until the reply, its timeout or its cancellation token fires.

pub mod events;
mod pending;
mod reader;
pub mod state;

pub use events::{BreakpointEvent, DeviceEvent, LinkStats, MessageListener};
pub use state::{ConnectionSource, ConnectionState, SessionInfo};

use crate::cancel::CancelToken;
use crate::commands::capabilities::Capabilities;
use crate::commands::monitor::{PingReply, PingRequest};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::value::cache::TypeCache;
use crate::wire::{Command, Decode, Encode, Flags, HandleWidth, Packet, WireReader, WireWriter, MAX_PAYLOAD_SIZE};
use events::LinkCounters;
use log::{debug, info, warn};
use pending::{Outcome, PendingTable};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// State shared between the engine handle and its read loop.
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: EngineConfig,
    pub(crate) pending: PendingTable,
    pub(crate) counters: LinkCounters,
    pub(crate) types: TypeCache,
    send_lock: Mutex<()>,
    session: RwLock<SessionInfo>,
    events: broadcast::Sender<DeviceEvent>,
    listeners: Mutex<Vec<MessageListener>>,
    failed_pings: AtomicU32,
}

impl Shared {
    fn session(&self) -> RwLockReadGuard<'_, SessionInfo> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn session_mut(&self) -> RwLockWriteGuard<'_, SessionInfo> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn handle_width(&self) -> HandleWidth {
        self.session().handle_width()
    }

    pub(crate) fn touch(&self) {
        self.session_mut().last_activity = Some(Instant::now());
    }

    pub(crate) fn emit(&self, event: DeviceEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    pub(crate) fn notify_message(&self, text: &str) {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(text);
        }
    }

    /// Write one packet. Writers are serialized so packets never interleave.
    pub(crate) fn send_packet(&self, packet: &Packet, cancel: &CancelToken) -> io::Result<()> {
        let bytes = packet.to_bytes();
        let _guard = self.send_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.transport.send(&bytes, self.config.request_timeout(), cancel)?;
        Ok(())
    }

    /// Drop the session: release the transport, fail every waiter and clear
    /// per-session caches. Runs once per session no matter how many paths
    /// reach it.
    pub(crate) fn teardown(&self, reason: &str) {
        let mut session = self.session_mut();
        if session.state == ConnectionState::Disconnected {
            return;
        }
        *session = SessionInfo::disconnected(session.generation);
        self.transport.disconnect();
        drop(session);

        let failed = self.pending.fail_all(|| Error::ConnectionLost);
        self.types.clear();
        self.failed_pings.store(0, Ordering::SeqCst);
        info!("Disconnected from {} ({reason}), {failed} pending requests failed", self.transport.describe());
        self.emit(DeviceEvent::Disconnected);
    }

    fn check_allowed(&self, command: Command) -> Result<()> {
        let state = self.session().state;
        match state {
            ConnectionState::Disconnected => Err(Error::NotConnected),
            ConnectionState::Bootloader if command.requires_runtime() => {
                Err(Error::NotSupportedInState { command, state })
            }
            _ => Ok(()),
        }
    }
}

struct Lifecycle {
    reader: Option<JoinHandle<()>>,
    token: CancelToken,
}

impl Lifecycle {
    /// Stop the read loop and wait for it to exit.
    fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.reader.take() {
            // A listener running on the read loop may end the session itself.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Read loop panicked");
            }
        }
    }
}

/// A debugging session with one device.
pub struct Engine {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                pending: PendingTable::new(),
                counters: LinkCounters::default(),
                types: TypeCache::new(),
                send_lock: Mutex::new(()),
                session: RwLock::new(SessionInfo::disconnected(0)),
                events,
                listeners: Mutex::new(Vec::new()),
                failed_pings: AtomicU32::new(0),
            }),
            lifecycle: Mutex::new(Lifecycle { reader: None, token: CancelToken::new() }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Snapshot of the current session.
    pub fn session_info(&self) -> SessionInfo {
        self.shared.session().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.session().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn source(&self) -> ConnectionSource {
        self.shared.session().source
    }

    /// Capabilities negotiated at connect. `None` unless connected to the runtime.
    pub fn capabilities(&self) -> Option<Arc<Capabilities>> {
        self.shared.session().capabilities.clone()
    }

    pub fn handle_width(&self) -> HandleWidth {
        self.shared.handle_width()
    }

    /// Session counter; bumped on every connect.
    pub fn generation(&self) -> u64 {
        self.shared.session().generation
    }

    pub(crate) fn ensure_generation(&self, generation: u64) -> Result<()> {
        let session = self.shared.session();
        if session.generation == generation && session.state.is_connected() {
            Ok(())
        } else {
            Err(Error::StaleSession)
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.shared.counters.snapshot()
    }

    /// Number of requests currently waiting for a reply.
    pub fn outstanding_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Subscribe to device notifications and session changes.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.shared.events.subscribe()
    }

    /// Register a callback for device text output. Listeners run on the read
    /// loop in arrival order.
    pub fn on_message(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.listeners.lock().unwrap_or_else(PoisonError::into_inner).push(Box::new(listener));
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the transport and perform the handshake.
    ///
    /// Returns what the device is running. Connecting while connected returns
    /// the current source without touching the link.
    pub fn connect(&self, cancel: &CancelToken) -> Result<ConnectionSource> {
        let mut lifecycle = self.lifecycle();
        {
            let session = self.shared.session();
            if session.state.is_connected() {
                return Ok(session.source);
            }
        }
        lifecycle.stop();

        let generation = {
            let mut session = self.shared.session_mut();
            let generation = session.generation + 1;
            *session = SessionInfo { state: ConnectionState::Connecting, ..SessionInfo::disconnected(generation) };
            generation
        };
        info!("Connecting to {} (session {generation})", self.shared.transport.describe());

        if let Err(e) = self.shared.transport.connect() {
            self.shared.session_mut().state = ConnectionState::Disconnected;
            return Err(e.into());
        }

        let token = CancelToken::new();
        let shared = Arc::clone(&self.shared);
        let loop_token = token.clone();
        let spawned = thread::Builder::new()
            .name("nfdebug-reader".to_string())
            .spawn(move || reader::run(&shared, &loop_token));
        match spawned {
            Ok(handle) => {
                lifecycle.reader = Some(handle);
                lifecycle.token = token;
            }
            Err(e) => {
                self.shared.teardown("could not start the read loop");
                return Err(e.into());
            }
        }

        match self.handshake(cancel) {
            Ok(source) => Ok(source),
            Err(e) => {
                warn!("Handshake failed: {e}");
                lifecycle.token.cancel();
                self.shared.teardown("handshake failed");
                lifecycle.stop();
                Err(e)
            }
        }
    }

    fn handshake(&self, cancel: &CancelToken) -> Result<ConnectionSource> {
        let reply = match self.ping_with_retries(cancel) {
            Ok(reply) => reply,
            Err(e) if e.is_timeout() => return Err(Error::DeviceNoResponse),
            Err(e) => return Err(e),
        };

        let source = ConnectionSource::from_marker(reply.source);
        let (state, capabilities) = match source {
            ConnectionSource::Runtime => {
                (ConnectionState::Runtime, Some(Arc::new(self.fetch_capabilities(cancel)?)))
            }
            ConnectionSource::Bootloader => (ConnectionState::Bootloader, None),
            ConnectionSource::Unknown => {
                warn!("Unrecognized source marker {}, restricting to monitor commands", reply.source);
                (ConnectionState::Bootloader, None)
            }
        };

        {
            let mut session = self.shared.session_mut();
            session.state = state;
            session.source = source;
            session.capabilities = capabilities;
        }
        self.shared.failed_pings.store(0, Ordering::SeqCst);
        info!("Connected to {}: {state}", self.shared.transport.describe());
        self.shared.emit(DeviceEvent::Connected(source));
        Ok(source)
    }

    /// Close the session. Safe to call at any time, any number of times.
    pub fn disconnect(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.token.cancel();
        self.shared.teardown("disconnect requested");
        lifecycle.stop();
    }

    /// Liveness probe.
    ///
    /// Unanswered pings are resent up to the configured retry count. After the
    /// configured number of consecutive failed probes the session is dropped
    /// and [`Error::DeviceNoResponse`] is returned.
    pub fn ping(&self, cancel: &CancelToken) -> Result<PingReply> {
        match self.ping_with_retries(cancel) {
            Ok(reply) => {
                self.shared.failed_pings.store(0, Ordering::SeqCst);
                Ok(reply)
            }
            Err(e) if e.is_timeout() => {
                let failures = self.shared.failed_pings.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.shared.config.keepalive_failures {
                    warn!("{failures} consecutive pings unanswered, dropping the session");
                    self.shared.teardown("device stopped responding");
                    return Err(Error::DeviceNoResponse);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn ping_with_retries(&self, cancel: &CancelToken) -> Result<PingReply> {
        let attempts = self.shared.config.ping_retries.max(1);
        let timeout = self.shared.config.ping_timeout();
        let mut last = Error::DeviceNoResponse;
        for attempt in 1..=attempts {
            match self.call(Command::PING, &PingRequest::from_host(), timeout, cancel) {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_timeout() => {
                    debug!("Ping attempt {attempt}/{attempts} unanswered");
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    /// Send a request and wait for its reply.
    ///
    /// The waiter is registered before the first byte goes out. On timeout or
    /// cancellation the waiter is withdrawn; a reply that wins that race is
    /// still returned.
    pub(crate) fn transact(
        &self,
        command: Command,
        flags: Flags,
        payload: Vec<u8>,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Packet> {
        self.shared.check_allowed(command)?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::malformed(
                command,
                crate::error::WireError::Invalid(format!("payload of {} bytes exceeds the frame limit", payload.len())),
            ));
        }

        let (seq, rx) = self.shared.pending.register();
        let packet = Packet::new(command, flags, seq, 0, payload);
        debug!("Sending {command} (seq {seq}, {} bytes)", packet.payload.len());
        if let Err(e) = self.shared.send_packet(&packet, cancel) {
            self.shared.pending.remove(seq);
            if e.kind() == io::ErrorKind::Interrupted {
                return Err(Error::Cancelled { command });
            }
            self.shared.teardown("write failed");
            return Err(e.into());
        }

        crossbeam_channel::select! {
            recv(rx) -> outcome => Self::finish(command, outcome.ok()),
            recv(cancel.signal()) -> _ => self.abandon(command, seq, &rx, Error::Cancelled { command }),
            default(timeout) => self.abandon(command, seq, &rx, Error::Timeout { command, timeout }),
        }
    }

    fn abandon(
        &self,
        command: Command,
        seq: u16,
        rx: &crossbeam_channel::Receiver<Outcome>,
        error: Error,
    ) -> Result<Packet> {
        if self.shared.pending.remove(seq) {
            debug!("{error}");
            return Err(error);
        }
        // Already completed: the outcome is in the slot or about to be.
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(outcome) => Self::finish(command, Some(outcome)),
            Err(_) => Err(error),
        }
    }

    fn finish(command: Command, outcome: Option<Outcome>) -> Result<Packet> {
        let packet = outcome.ok_or(Error::ConnectionLost)??;
        if packet.header.is_nack() {
            return Err(Error::Nack { command });
        }
        Ok(packet)
    }

    /// Typed request: encode `request`, wait for the reply and decode it,
    /// both at the session's handle width.
    pub(crate) fn call<Req, Rep>(
        &self,
        command: Command,
        request: &Req,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Rep>
    where
        Req: Encode + ?Sized,
        Rep: Decode,
    {
        let width = self.handle_width();
        let mut writer = WireWriter::new(width);
        writer.put(request);
        let reply = self.transact(command, Flags::NONE, writer.into_bytes(), timeout, cancel)?;
        decode_reply(command, &reply.payload, width)
    }
}

pub(crate) fn decode_reply<T: Decode>(command: Command, payload: &[u8], width: HandleWidth) -> Result<T> {
    let mut reader = WireReader::new(payload, width);
    T::decode(&mut reader).map_err(|e| Error::malformed(command, e))
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.disconnect();
    }
}
