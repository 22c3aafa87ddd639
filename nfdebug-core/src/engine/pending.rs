//! Table of requests awaiting a reply, keyed by sequence number.
//!
//! The table and the sequence counter live under one lock. Delivery removes
//! the entry before sending, so each waiter receives at most one outcome.

use crate::error::{Error, Result};
use crate::wire::Packet;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::Mutex;

pub(crate) type Outcome = Result<Packet>;

#[derive(Default)]
pub(crate) struct PendingTable {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_seq: u16,
    waiters: HashMap<u16, Sender<Outcome>>,
}

impl Inner {
    /// Next sequence number that is neither zero nor awaiting a reply.
    fn allocate(&mut self) -> u16 {
        loop {
            self.next_seq = self.next_seq.wrapping_add(1);
            if self.next_seq != 0 && !self.waiters.contains_key(&self.next_seq) {
                return self.next_seq;
            }
        }
    }
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate a sequence number and register a waiter for its reply.
    pub(crate) fn register(&self) -> (u16, Receiver<Outcome>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut inner = self.lock();
        let seq = inner.allocate();
        inner.waiters.insert(seq, tx);
        (seq, rx)
    }

    /// Allocate a sequence number for a packet that expects no reply.
    pub(crate) fn next_seq(&self) -> u16 {
        self.lock().allocate()
    }

    /// Hand `packet` to the waiter registered for `seq`. Gives the packet
    /// back when nobody is waiting for it.
    pub(crate) fn complete(&self, seq: u16, packet: Packet) -> std::result::Result<(), Packet> {
        let waiter = self.lock().waiters.remove(&seq);
        match waiter {
            // The receiver may have been dropped by a caller that just gave up.
            Some(tx) => {
                let _ = tx.send(Ok(packet));
                Ok(())
            }
            None => Err(packet),
        }
    }

    /// Withdraw a registration. Returns false if it was already completed.
    pub(crate) fn remove(&self, seq: u16) -> bool {
        self.lock().waiters.remove(&seq).is_some()
    }

    /// Fail every outstanding waiter. Returns how many were failed.
    pub(crate) fn fail_all(&self, make_error: impl Fn() -> Error) -> usize {
        let waiters: Vec<_> = self.lock().waiters.drain().collect();
        let count = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(Err(make_error()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding this lock cannot leave the map inconsistent.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
