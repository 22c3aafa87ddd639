//! Execution control.

use crate::cancel::CancelToken;
use crate::engine::Engine;
use crate::error::Result;
use crate::wire::{Command, Encode, WireWriter};

/// Runtime execution condition bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionConditions(pub u32);

impl ExecutionConditions {
    pub const INITIALIZE: u32 = 0x0000_0001;
    pub const PROGRAM_RUNNING: u32 = 0x0000_0002;
    pub const PROGRAM_EXITED: u32 = 0x0000_0004;
    pub const SOURCE_LEVEL_DEBUGGING: u32 = 0x0000_0010;
    pub const STOPPED: u32 = 0x0000_0040;
    pub const BREAKPOINTS_ENABLED: u32 = 0x0000_0100;
    pub const PAUSE_ON_EXCEPTIONS: u32 = 0x0000_0200;

    pub const fn has(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub const fn is_stopped(self) -> bool {
        self.has(Self::STOPPED)
    }
}

struct ChangeConditions {
    set: u32,
    reset: u32,
}

impl Encode for ChangeConditions {
    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.set).u32(self.reset);
    }
}

impl Engine {
    /// Set and clear execution condition bits; returns the resulting conditions.
    pub fn change_conditions(&self, set: u32, reset: u32, cancel: &CancelToken) -> Result<ExecutionConditions> {
        let current: u32 = self.call(
            Command::EXECUTION_CHANGE_CONDITIONS,
            &ChangeConditions { set, reset },
            self.config().request_timeout(),
            cancel,
        )?;
        Ok(ExecutionConditions(current))
    }

    pub fn execution_conditions(&self, cancel: &CancelToken) -> Result<ExecutionConditions> {
        self.change_conditions(0, 0, cancel)
    }

    pub fn pause_execution(&self, cancel: &CancelToken) -> Result<ExecutionConditions> {
        self.change_conditions(ExecutionConditions::STOPPED, 0, cancel)
    }

    pub fn resume_execution(&self, cancel: &CancelToken) -> Result<ExecutionConditions> {
        self.change_conditions(0, ExecutionConditions::STOPPED, cancel)
    }
}
