//! Correlation table for in-flight requests.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::core::{TetherError, TetherResult};

use super::command::Command;

/// Outstanding requests keyed by serial.
///
/// Serials are issued from a wrapping counter, skipping any value still in
/// flight. The table never blocks; callers hold it behind a mutex for the
/// duration of a lookup only.
pub struct PendingTable {
    next_serial: u32,
    entries: HashMap<u32, oneshot::Sender<TetherResult<Command>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            next_serial: 0,
            entries: HashMap::new(),
        }
    }

    /// Allocate a serial and park the completion sender under it.
    pub fn issue(&mut self, tx: oneshot::Sender<TetherResult<Command>>) -> u32 {
        loop {
            self.next_serial = self.next_serial.wrapping_add(1);
            if !self.entries.contains_key(&self.next_serial) {
                break;
            }
        }
        self.entries.insert(self.next_serial, tx);
        self.next_serial
    }

    /// Claim the completion sender for a serial, if one is outstanding.
    pub fn take(&mut self, serial: u32) -> Option<oneshot::Sender<TetherResult<Command>>> {
        self.entries.remove(&serial)
    }

    /// Reject every outstanding request with a clone of `err`.
    pub fn fail_all(&mut self, err: TetherError) {
        for (_, tx) in self.entries.drain() {
            let _ = tx.send(Err(err.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
