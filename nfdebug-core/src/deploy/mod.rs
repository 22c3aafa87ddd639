//! Deployment module.
//!
//! Handles erase, chunked program and verify of a deployment image. Each
//! chunk is acknowledged before the next is sent; the first failure aborts
//! the whole deployment.

use crate::cancel::CancelToken;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::wire::{crc, MAX_PAYLOAD_SIZE};
use log::info;
use std::fmt;
use std::sync::mpsc;

/// A contiguous image to be written to device flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployImage {
    pub address: u32,
    pub data: Vec<u8>,
}

impl DeployImage {
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStage {
    Erasing,
    Writing { chunk: usize, chunks: usize },
    Verifying,
    Finished,
}

/// Progress information for a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployProgress {
    pub sent: usize,
    pub total: usize,
    pub stage: DeployStage,
}

impl DeployProgress {
    /// Human-readable status line.
    pub fn status(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DeployProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            DeployStage::Erasing => write!(f, "Erasing {} bytes", self.total),
            DeployStage::Writing { chunk, chunks } => {
                write!(f, "Writing chunk {} of {chunks} ({}/{} bytes)", chunk + 1, self.sent, self.total)
            }
            DeployStage::Verifying => f.write_str("Verifying"),
            DeployStage::Finished => write!(f, "Deployed {} bytes", self.total),
        }
    }
}

/// Receives deployment progress.
pub trait ProgressSink {
    fn report(&self, progress: &DeployProgress);
}

/// Plain callbacks receive `(bytes_sent, total_bytes, status)`.
impl<F: Fn(usize, usize, &str)> ProgressSink for F {
    fn report(&self, progress: &DeployProgress) {
        self(progress.sent, progress.total, &progress.status());
    }
}

/// A progress reporter that sends updates over a channel.
pub struct ChannelProgress {
    sender: mpsc::Sender<DeployProgress>,
}

impl ChannelProgress {
    pub fn new(sender: mpsc::Sender<DeployProgress>) -> Self {
        Self { sender }
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, progress: &DeployProgress) {
        // A receiver that went away only stops the reports.
        let _ = self.sender.send(progress.clone());
    }
}

/// Summary of a completed deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployReport {
    pub address: u32,
    pub bytes: usize,
    pub chunks: usize,
    pub crc: u32,
}

impl Engine {
    /// Erase the target range, write `image` chunk by chunk and verify it.
    ///
    /// A chunk failure is reported as [`Error::DeployFailed`] with the index
    /// of the failed chunk; nothing after it is sent.
    pub fn deploy(&self, image: &DeployImage, progress: &dyn ProgressSink, cancel: &CancelToken) -> Result<DeployReport> {
        let total = image.len();
        let chunk_size = self.config().deploy_chunk_size.clamp(1, MAX_PAYLOAD_SIZE - 8);
        let chunks = total.div_ceil(chunk_size);
        let expected_crc = crc::checksum(&image.data);
        let report = DeployReport { address: image.address, bytes: total, chunks, crc: expected_crc };
        if image.is_empty() {
            progress.report(&DeployProgress { sent: 0, total, stage: DeployStage::Finished });
            return Ok(report);
        }

        info!("Deploying {total} bytes at 0x{:08X} in {chunks} chunks", image.address);
        progress.report(&DeployProgress { sent: 0, total, stage: DeployStage::Erasing });
        self.erase_memory(image.address, total, cancel)?;

        let timeout = self.config().deploy_timeout();
        let mut sent = 0;
        for (chunk, data) in image.data.chunks(chunk_size).enumerate() {
            let address = image.address.wrapping_add(u32::try_from(sent).unwrap_or(u32::MAX));
            self.write_block(address, data, timeout, cancel).map_err(|source| Error::DeployFailed {
                chunk,
                chunks,
                source: Box::new(source),
            })?;
            sent += data.len();
            progress.report(&DeployProgress { sent, total, stage: DeployStage::Writing { chunk, chunks } });
        }

        progress.report(&DeployProgress { sent, total, stage: DeployStage::Verifying });
        let actual = self.check_memory(image.address, total, cancel)?;
        if actual != expected_crc {
            return Err(Error::VerifyMismatch { address: image.address, expected: expected_crc, actual });
        }

        progress.report(&DeployProgress { sent, total, stage: DeployStage::Finished });
        info!("Deployment verified (crc 0x{expected_crc:08X})");
        Ok(report)
    }
}
