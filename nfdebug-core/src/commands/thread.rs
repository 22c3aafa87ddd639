//! Thread and call stack inspection.

use crate::cancel::CancelToken;
use crate::engine::Engine;
use crate::error::{Result, WireError};
use crate::value::RuntimeValue;
use crate::wire::{Command, Decode, Encode, WireReader, WireWriter};
use serde::Serialize;

/// One frame of a managed call stack. Depth 0 is the innermost frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub depth: u32,
    pub method_index: u32,
    /// IL offset within the method.
    pub ip: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadStack {
    pub pid: u32,
    pub flags: u32,
    pub status: u32,
    pub frames: Vec<StackFrame>,
}

impl ThreadStack {
    pub const STATUS_READY: u32 = 0x01;
    pub const STATUS_WAITING: u32 = 0x02;
    pub const STATUS_SUSPENDED: u32 = 0x04;
    pub const STATUS_TERMINATED: u32 = 0x08;

    pub fn innermost(&self) -> Option<&StackFrame> {
        self.frames.first()
    }
}

struct StackReply {
    flags: u32,
    status: u32,
    frames: Vec<(u32, u32)>,
}

impl Decode for StackReply {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let flags = r.u32()?;
        let status = r.u32()?;
        let mut frames = Vec::new();
        while !r.is_empty() {
            frames.push((r.u32()?, r.u32()?));
        }
        Ok(Self { flags, status, frames })
    }
}

/// Which slot table of a stack frame to read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackSlot {
    Argument,
    Local,
    EvaluationStack,
}

struct StackValueRequest {
    pid: u32,
    depth: u32,
    slot: StackSlot,
    index: u32,
}

impl Encode for StackValueRequest {
    fn encode(&self, w: &mut WireWriter) {
        let kind = match self.slot {
            StackSlot::Argument => 0,
            StackSlot::Local => 1,
            StackSlot::EvaluationStack => 2,
        };
        w.u32(self.pid).u32(self.depth).u32(kind).u32(self.index);
    }
}

impl Engine {
    /// Ids of all managed threads.
    pub fn threads(&self, cancel: &CancelToken) -> Result<Vec<u32>> {
        self.call(Command::THREAD_LIST, &(), self.config().request_timeout(), cancel)
    }

    pub fn thread_stack(&self, pid: u32, cancel: &CancelToken) -> Result<ThreadStack> {
        let reply: StackReply = self.call(Command::THREAD_STACK, &pid, self.config().request_timeout(), cancel)?;
        let frames = (0u32..)
            .zip(reply.frames)
            .map(|(depth, (method_index, ip))| StackFrame { depth, method_index, ip })
            .collect();
        Ok(ThreadStack { pid, flags: reply.flags, status: reply.status, frames })
    }

    /// The managed `Thread` object of a thread.
    pub fn thread_value(&self, pid: u32, cancel: &CancelToken) -> Result<RuntimeValue<'_>> {
        self.fetch_value(Command::THREAD_GET, &pid, cancel)
    }

    /// An argument, local or evaluation stack entry of a frame.
    pub fn stack_value(
        &self,
        pid: u32,
        depth: u32,
        slot: StackSlot,
        index: u32,
        cancel: &CancelToken,
    ) -> Result<RuntimeValue<'_>> {
        self.fetch_value(Command::VALUE_GET_STACK, &StackValueRequest { pid, depth, slot, index }, cancel)
    }
}
