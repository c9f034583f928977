//! SPI master that polls the bridge for key codes at a fixed interval.

use tracing::trace;

use crate::firmware::responder::NO_KEY;

pub const DEFAULT_POLL_INTERVAL_US: u32 = 500;

pub struct SpiHost {
    interval_us: u32,
    next_at: u64,
    command: u8,
    received: Vec<u8>,
    exchanges: usize,
}

impl SpiHost {
    pub fn new(interval_us: u32, command: u8) -> Self {
        Self {
            interval_us: interval_us.max(1),
            next_at: interval_us as u64,
            command,
            received: Vec::new(),
            exchanges: 0,
        }
    }

    pub fn due(&self, now: u64) -> bool {
        now >= self.next_at
    }

    /// One full-duplex byte transfer. `miso` is what the bridge had loaded;
    /// returns the byte the host shifts out.
    pub fn exchange(&mut self, now: u64, miso: u8) -> u8 {
        self.next_at = now + self.interval_us as u64;
        self.exchanges += 1;
        if miso != NO_KEY {
            trace!("SPI host: got {miso:02X}");
            self.received.push(miso);
        }
        self.command
    }

    pub fn set_command(&mut self, command: u8) {
        self.command = command;
    }

    /// Key codes seen so far, empty transfers excluded.
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    pub fn take_received(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.received)
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges
    }
}
