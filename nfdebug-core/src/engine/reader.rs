//! Background read loop.
//!
//! The only reader of the transport. It turns bytes into frames, hands replies
//! to their waiters and turns everything else into [`DeviceEvent`]s.

use super::events::{BreakpointEvent, DeviceEvent};
use super::Shared;
use crate::cancel::CancelToken;
use crate::wire::{buffer::text_until_nul, Command, Decode, Flags, Frame, FrameDecoder, Packet, WireReader};
use log::{debug, error, trace, warn};
use std::io;
use std::time::Instant;

pub(super) fn run(shared: &Shared, token: &CancelToken) {
    let mut decoder = FrameDecoder::new();
    let poll = shared.config.read_poll();
    let stall_limit = shared.config.request_timeout();
    let mut stalled_since: Option<Instant> = None;

    debug!("Read loop started on {}", shared.transport.describe());
    while !token.is_cancelled() {
        match shared.transport.read_exactly(decoder.needed(), poll, token) {
            Ok(bytes) => {
                stalled_since = None;
                decoder.push(&bytes);
                while let Some(frame) = decoder.next_frame() {
                    dispatch(shared, frame, token);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                if !decoder.has_partial() {
                    continue;
                }
                // A frame that never completes would block every later packet.
                let since = *stalled_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= stall_limit {
                    let dropped = decoder.reset();
                    warn!("Dropped {dropped} bytes of an incomplete frame");
                    shared.counters.bad_payload();
                    stalled_since = None;
                }
            }
            Err(_) if token.is_cancelled() => break,
            Err(e) => {
                error!("Read loop stopped: {e}");
                shared.teardown("transport failure");
                break;
            }
        }
    }
    debug!("Read loop finished");
}

fn dispatch(shared: &Shared, frame: Frame, token: &CancelToken) {
    match frame {
        Frame::Packet(packet) => {
            shared.counters.received();
            shared.touch();
            if packet.header.is_reply() {
                deliver_reply(shared, packet);
            } else {
                handle_request(shared, packet, token);
            }
        }
        Frame::Spurious(count) => {
            shared.counters.add_spurious(count);
            trace!("Skipped {count} spurious bytes");
        }
        Frame::BadHeader => {
            shared.counters.bad_header();
            warn!("Discarded a packet with a bad header");
            let nack = Packet::new(Command::PING, Flags::NACK | Flags::BAD_HEADER, shared.pending.next_seq(), 0, Vec::new());
            send_nack(shared, &nack, token);
        }
        Frame::BadPayload(header) => {
            shared.counters.bad_payload();
            warn!("Discarded {} (seq {}) with a bad payload", header.command, header.seq);
            let nack = Packet::reply(&header, shared.pending.next_seq(), Flags::NACK | Flags::BAD_PAYLOAD, Vec::new());
            send_nack(shared, &nack, token);
        }
    }
}

fn send_nack(shared: &Shared, nack: &Packet, token: &CancelToken) {
    shared.counters.nack_sent();
    if let Err(e) = shared.send_packet(nack, token) {
        debug!("Could not send NACK: {e}");
    }
}

fn deliver_reply(shared: &Shared, packet: Packet) {
    let seq = packet.header.seq_reply;
    debug!("Received reply to {} (seq {seq}, flags {:?})", packet.command(), packet.flags());
    if let Err(packet) = shared.pending.complete(seq, packet) {
        shared.counters.unmatched();
        debug!("Reply to {} (seq {seq}) matched no pending request", packet.command());
        shared.emit(DeviceEvent::Unsolicited {
            command: packet.command(),
            flags: packet.flags(),
            payload: packet.payload,
        });
    }
}

fn handle_request(shared: &Shared, packet: Packet, token: &CancelToken) {
    let header = packet.header;
    if !header.flags.contains(Flags::NON_CRITICAL) {
        let ack = Packet::reply(&header, shared.pending.next_seq(), Flags::ACK, Vec::new());
        if let Err(e) = shared.send_packet(&ack, token) {
            debug!("Could not acknowledge {}: {e}", header.command);
        }
    }

    let event = match header.command {
        Command::MESSAGE => {
            let text = text_until_nul(&packet.payload);
            shared.notify_message(&text);
            DeviceEvent::Message(text)
        }
        Command::PROGRAM_EXIT => DeviceEvent::ProgramExit,
        Command::EXECUTION_BREAKPOINT_HIT => {
            let mut reader = WireReader::new(&packet.payload, shared.handle_width());
            match BreakpointEvent::decode(&mut reader) {
                Ok(hit) => DeviceEvent::BreakpointHit(hit),
                Err(e) => {
                    warn!("Malformed breakpoint notification: {e}");
                    unsolicited(packet)
                }
            }
        }
        _ => unsolicited(packet),
    };
    shared.emit(event);
}

fn unsolicited(packet: Packet) -> DeviceEvent {
    DeviceEvent::Unsolicited { command: packet.header.command, flags: packet.header.flags, payload: packet.payload }
}
