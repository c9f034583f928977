//! Serves key codes to the host over the byte exchange interface.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::trace;

use crate::firmware::queue::KeyCodeConsumer;

/// Byte staged when no key code is waiting.
pub const NO_KEY: u8 = 0x00;

/// The most recent byte the host sent. It is captured and readable; no
/// command protocol is defined on top of it.
#[derive(Clone, Default)]
pub struct HostCommandLatch(Arc<AtomicU8>);

impl HostCommandLatch {
    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, byte: u8) {
        self.0.store(byte, Ordering::Release);
    }
}

/// Transfer-complete handler. Owned by the exchange interrupt; it is the only
/// reader of the key code queue.
pub struct HostResponder {
    keys: KeyCodeConsumer,
    command: HostCommandLatch,
}

impl HostResponder {
    pub fn new(keys: KeyCodeConsumer) -> (Self, HostCommandLatch) {
        let command = HostCommandLatch::default();
        (
            Self {
                keys,
                command: command.clone(),
            },
            command,
        )
    }

    /// Called when a transfer finishes with the byte the host sent. Returns
    /// the byte to load for the next transfer: the oldest key code, or
    /// [`NO_KEY`].
    pub fn on_exchange_complete(&mut self, received: u8) -> u8 {
        self.command.set(received);
        match self.keys.pop() {
            Some(key) => {
                trace!("SPI: staged {key:02X}");
                key
            }
            None => NO_KEY,
        }
    }

    pub fn pending_command(&self) -> u8 {
        self.command.get()
    }

    /// Key codes still waiting in the queue.
    pub fn backlog(&self) -> usize {
        self.keys.len()
    }
}
