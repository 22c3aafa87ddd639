//! Incremental frame decoder with marker resynchronization.
//!
//! Bytes are pushed in as they arrive and complete frames are pulled out.
//! Garbage between packets is skipped and reported, a corrupt header costs
//! one byte before the scan resumes, and a corrupt payload is reported with
//! its (valid) header so the far end can be told which packet to resend.

use super::packet::{verify_payload, FrameError, Header, Packet, HEADER_SIZE, MARKER};

/// One decoding outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A packet with valid header and payload checksums.
    Packet(Packet),
    /// This many bytes were skipped while looking for a marker.
    Spurious(usize),
    /// A marker was found but the header did not validate.
    BadHeader,
    /// The header was valid but the payload checksum failed.
    BadPayload(Header),
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    header: Option<Header>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// How many more bytes are required before [`next_frame`](Self::next_frame)
    /// can make progress.
    pub fn needed(&self) -> usize {
        match &self.header {
            Some(header) => (header.size as usize).saturating_sub(self.buf.len()).max(1),
            None if self.buf.starts_with(&MARKER) => HEADER_SIZE.saturating_sub(self.buf.len()).max(1),
            None if self.buf.is_empty() => HEADER_SIZE,
            None => MARKER.len().saturating_sub(self.buf.len()).max(1),
        }
    }

    /// True while part of a frame has been consumed but not yet completed.
    pub fn has_partial(&self) -> bool {
        self.header.is_some() || !self.buf.is_empty()
    }

    /// Drop any partially received frame, returning the number of bytes discarded.
    pub fn reset(&mut self) -> usize {
        let dropped = self.buf.len() + self.header.map_or(0, |_| HEADER_SIZE);
        self.buf.clear();
        self.header = None;
        dropped
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(header) = self.header {
                let size = header.size as usize;
                if self.buf.len() < size {
                    return None;
                }
                let payload: Vec<u8> = self.buf.drain(..size).collect();
                self.header = None;
                return Some(match verify_payload(&header, &payload) {
                    Ok(()) => Frame::Packet(Packet { header, payload }),
                    Err(_) => Frame::BadPayload(header),
                });
            }

            match find_marker(&self.buf) {
                Some(0) => {}
                Some(offset) => {
                    self.buf.drain(..offset);
                    return Some(Frame::Spurious(offset));
                }
                None => {
                    // Keep a tail that could still be the start of a marker.
                    let keep = MARKER.len() - 1;
                    if self.buf.len() > keep {
                        let skipped = self.buf.len() - keep;
                        self.buf.drain(..skipped);
                        return Some(Frame::Spurious(skipped));
                    }
                    return None;
                }
            }

            if self.buf.len() < HEADER_SIZE {
                return None;
            }

            match Header::parse(&self.buf[..HEADER_SIZE]) {
                Ok(header) => {
                    self.buf.drain(..HEADER_SIZE);
                    self.header = Some(header);
                }
                Err(FrameError::BadHeader | FrameError::Oversized(_)) => {
                    self.buf.drain(..1);
                    return Some(Frame::BadHeader);
                }
                Err(_) => {
                    self.buf.drain(..1);
                    return Some(Frame::Spurious(1));
                }
            }
        }
    }
}

fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(MARKER.len()).position(|window| window == MARKER)
}
