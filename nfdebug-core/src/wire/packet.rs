//! Packet header and whole-packet encoding.

use super::{crc, Command, Flags};
use thiserror::Error;

/// Marker that opens every packet.
pub const MARKER: [u8; 4] = *b"MSdb";

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 26;

/// Largest payload a header may announce. Anything bigger is treated as a
/// corrupt header even when its checksum happens to match.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

const CRC_HEADER_OFFSET: usize = 22;

/// Why a byte sequence is not a valid packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("missing packet marker")]
    BadMarker,

    #[error("header checksum mismatch")]
    BadHeader,

    #[error("payload of {0} bytes exceeds the protocol limit")]
    Oversized(u32),

    #[error("payload checksum mismatch for {command}")]
    BadPayload { command: Command, seq: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command: Command,
    pub flags: Flags,
    pub seq: u16,
    pub seq_reply: u16,
    pub size: u32,
    pub crc_payload: u32,
    pub crc_header: u32,
}

impl Header {
    /// Serialize, including the stored header checksum.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&MARKER);
        bytes[4..8].copy_from_slice(&self.command.0.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.flags.0.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.seq.to_le_bytes());
        bytes[12..14].copy_from_slice(&self.seq_reply.to_le_bytes());
        bytes[14..18].copy_from_slice(&self.size.to_le_bytes());
        bytes[18..22].copy_from_slice(&self.crc_payload.to_le_bytes());
        bytes[22..26].copy_from_slice(&self.crc_header.to_le_bytes());
        bytes
    }

    /// Parse a header, checking marker, header checksum and size limit.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated { needed: HEADER_SIZE, available: bytes.len() });
        }
        if bytes[0..4] != MARKER {
            return Err(FrameError::BadMarker);
        }

        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at =
            |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        let header = Self {
            command: Command(u32_at(4)),
            flags: Flags(u16_at(8)),
            seq: u16_at(10),
            seq_reply: u16_at(12),
            size: u32_at(14),
            crc_payload: u32_at(18),
            crc_header: u32_at(22),
        };

        if header.compute_crc() != header.crc_header {
            return Err(FrameError::BadHeader);
        }
        if header.size as usize > MAX_PAYLOAD_SIZE {
            return Err(FrameError::Oversized(header.size));
        }
        Ok(header)
    }

    /// Checksum over the serialized header with its checksum field zeroed.
    pub fn compute_crc(&self) -> u32 {
        let mut bytes = self.to_bytes();
        bytes[CRC_HEADER_OFFSET..].fill(0);
        crc::checksum(&bytes)
    }

    pub const fn is_reply(&self) -> bool {
        self.flags.contains(Flags::REPLY)
    }

    pub const fn is_nack(&self) -> bool {
        self.flags.contains(Flags::NACK)
    }
}

/// A complete, checksummed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet and compute both checksums.
    pub fn new(command: Command, flags: Flags, seq: u16, seq_reply: u16, payload: Vec<u8>) -> Self {
        let mut header = Header {
            command,
            flags,
            seq,
            seq_reply,
            size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
            crc_payload: if payload.is_empty() { 0 } else { crc::checksum(&payload) },
            crc_header: 0,
        };
        header.crc_header = header.compute_crc();
        Self { header, payload }
    }

    /// Build a reply to `request`. The reply carries its own sequence number.
    pub fn reply(request: &Header, seq: u16, flags: Flags, payload: Vec<u8>) -> Self {
        Self::new(request.command, flags | Flags::REPLY, seq, request.seq, payload)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decode exactly one packet from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let header = Header::parse(bytes)?;
        let end = HEADER_SIZE + header.size as usize;
        if bytes.len() < end {
            return Err(FrameError::Truncated { needed: end, available: bytes.len() });
        }
        let payload = bytes[HEADER_SIZE..end].to_vec();
        verify_payload(&header, &payload)?;
        Ok(Self { header, payload })
    }

    pub fn command(&self) -> Command {
        self.header.command
    }

    pub fn flags(&self) -> Flags {
        self.header.flags
    }
}

pub(crate) fn verify_payload(header: &Header, payload: &[u8]) -> Result<(), FrameError> {
    let actual = if payload.is_empty() { 0 } else { crc::checksum(payload) };
    if actual == header.crc_payload {
        Ok(())
    } else {
        Err(FrameError::BadPayload { command: header.command, seq: header.seq })
    }
}
