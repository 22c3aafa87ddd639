//! Error types for the wire-protocol engine.

use crate::engine::ConnectionState;
use crate::wire::Command;
use std::time::Duration;
use thiserror::Error;

/// Broad classification of an [`Error`], matching how callers are expected to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The byte channel failed; the session is gone.
    Transport,
    /// A corrupt or unparseable frame.
    Framing,
    /// The device refused, or the request is not valid right now.
    Protocol,
    /// Device data did not add up (counts, lengths).
    DataIntegrity,
    /// No reply within the allotted time.
    Timeout,
    /// The caller aborted the operation.
    Cancelled,
    /// Rejected locally before anything went on the wire.
    Validation,
}

/// Local validation failures. These are expected outcomes of user input,
/// not device faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("string must keep its length: slot holds {expected} bytes, new value has {actual}")]
    StringLengthMismatch { expected: usize, actual: usize },

    #[error("cannot store a {actual} into a {expected} slot")]
    TypeMismatch { expected: &'static str, actual: &'static str },

    #[error("index {index} is out of range for an array of {length} elements")]
    IndexOutOfRange { index: u32, length: u32 },

    #[error("{operation} is not available on a {kind} value")]
    WrongKind { operation: &'static str, kind: &'static str },

    #[error("value is null")]
    NullReference,
}

/// Failure while decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("payload truncated: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("connection lost")]
    ConnectionLost,

    #[error("not connected")]
    NotConnected,

    #[error("device did not respond")]
    DeviceNoResponse,

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: Command, timeout: Duration },

    #[error("{command} was cancelled")]
    Cancelled { command: Command },

    #[error("device rejected {command}")]
    Nack { command: Command },

    #[error("{command} is not supported while {state}")]
    NotSupportedInState { command: Command, state: ConnectionState },

    #[error("device lacks capability: {0}")]
    CapabilityMissing(&'static str),

    #[error("malformed {command} payload: {source}")]
    Malformed {
        command: Command,
        #[source]
        source: WireError,
    },

    #[error("resolved {actual} {what} but device reported {expected}")]
    CountMismatch { what: &'static str, expected: usize, actual: usize },

    #[error("read {obtained} of {requested} bytes at 0x{address:08X}")]
    PartialRead { address: u32, obtained: usize, requested: usize },

    #[error("wrote {written} of {requested} bytes at 0x{address:08X}")]
    PartialWrite { address: u32, written: usize, requested: usize },

    #[error("verification failed at 0x{address:08X}: expected crc 0x{expected:08X}, device has 0x{actual:08X}")]
    VerifyMismatch { address: u32, expected: u32, actual: u32 },

    #[error("deploy failed at chunk {} of {chunks}: {source}", .chunk + 1)]
    DeployFailed {
        chunk: usize,
        chunks: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("unknown data type tag 0x{0:02X}")]
    UnknownDataType(u32),

    #[error("value belongs to a session that has ended")]
    StaleSession,

    #[error("invalid value: {0}")]
    Validation(#[from] ValidationError),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::ConnectionLost | Self::NotConnected | Self::DeviceNoResponse => {
                ErrorKind::Transport
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Nack { .. }
            | Self::NotSupportedInState { .. }
            | Self::CapabilityMissing(_)
            | Self::StaleSession => ErrorKind::Protocol,
            Self::Malformed { .. } | Self::UnknownDataType(_) => ErrorKind::Framing,
            Self::CountMismatch { .. }
            | Self::PartialRead { .. }
            | Self::PartialWrite { .. }
            | Self::VerifyMismatch { .. } => ErrorKind::DataIntegrity,
            Self::DeployFailed { source, .. } => source.kind(),
            Self::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Timeouts of idempotent requests may be retried by the caller.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub(crate) fn malformed(command: Command, source: WireError) -> Self {
        Self::Malformed { command, source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
