//! RPC endpoint discovery.

use crate::cancel::CancelToken;
use crate::engine::Engine;
use crate::error::Result;
use crate::wire::{Command, Encode, WireWriter};

/// Identifies a messaging endpoint on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessagingAddress {
    /// Endpoint type selector.
    pub selector: u32,
    /// Endpoint instance.
    pub id: u32,
}

impl Encode for MessagingAddress {
    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.selector).u32(self.id);
    }
}

impl Engine {
    /// Whether the runtime has an endpoint registered at `address`.
    pub fn messaging_query(&self, address: MessagingAddress, cancel: &CancelToken) -> Result<bool> {
        let found: u32 = self.call(Command::MESSAGING_QUERY, &address, self.config().request_timeout(), cancel)?;
        Ok(found != 0)
    }
}
