//! Simulated board: a PS/2 keyboard on the open-collector clock/data pair,
//! an SPI host polling for key codes, and the two interrupt handlers wired
//! to them. Time advances one microsecond per step.

pub mod ps2_keyboard;
pub mod spi_host;

use tracing::{debug, trace};

use crate::firmware::Interrupts;
use crate::firmware::hal::BusLines;
use crate::firmware::responder::NO_KEY;
use crate::firmware::{Bridge, Step};

use self::ps2_keyboard::{KeyboardTiming, Ps2Keyboard};
use self::spi_host::{DEFAULT_POLL_INTERVAL_US, SpiHost};

#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub keyboard: KeyboardTiming,
    /// With no keyboard the lines just float high
    pub keyboard_connected: bool,
    pub spi_poll_interval_us: u32,
    /// Byte the SPI host shifts out on every transfer
    pub host_command: u8,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            keyboard: KeyboardTiming::default(),
            keyboard_connected: true,
            spi_poll_interval_us: DEFAULT_POLL_INTERVAL_US,
            host_command: 0x00,
        }
    }
}

pub struct Board {
    now: u64,
    keyboard: Ps2Keyboard,
    keyboard_connected: bool,
    host: SpiHost,
    interrupts: Interrupts,
    clock_interrupt: bool,
    host_clock_low: bool,
    host_data_low: bool,
    last_clock: bool,
    /// Byte loaded for the next SPI transfer
    spi_register: u8,
}

impl Board {
    pub fn new(config: BoardConfig, interrupts: Interrupts) -> Self {
        Self {
            now: 0,
            keyboard: Ps2Keyboard::new(config.keyboard),
            keyboard_connected: config.keyboard_connected,
            host: SpiHost::new(config.spi_poll_interval_us, config.host_command),
            interrupts,
            clock_interrupt: false,
            host_clock_low: false,
            host_data_low: false,
            last_clock: true,
            spi_register: NO_KEY,
        }
    }

    /// Advances the board by one microsecond.
    pub fn step(&mut self) {
        if self.keyboard_connected {
            self.keyboard.tick(self.host_clock_low, self.host_data_low);
        }
        self.now += 1;
        self.sample_clock();

        if self.host.due(self.now) {
            let mosi = self.host.exchange(self.now, self.spi_register);
            self.spi_register = self.interrupts.responder.on_exchange_complete(mosi);
        }
    }

    /// Raises the clock interrupt on a falling edge of the resolved line.
    fn sample_clock(&mut self) {
        let level = self.clock();
        if self.last_clock && !level && self.clock_interrupt {
            let data = self.data();
            self.interrupts.receiver.on_clock_edge(data, self.now);
        }
        self.last_clock = level;
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn keyboard(&self) -> &Ps2Keyboard {
        &self.keyboard
    }

    pub fn keyboard_mut(&mut self) -> &mut Ps2Keyboard {
        &mut self.keyboard
    }

    pub fn host(&self) -> &SpiHost {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut SpiHost {
        &mut self.host
    }

    /// Byte the host will read on its next transfer.
    pub fn staged(&self) -> u8 {
        self.spi_register
    }

    pub fn clock_interrupt_enabled(&self) -> bool {
        self.clock_interrupt
    }

    /// Nothing left anywhere between the keyboard and the SPI host.
    pub fn is_quiet(&self, bridge: &Bridge) -> bool {
        (self.keyboard.is_idle() || !self.keyboard_connected)
            && bridge.pending_scan_codes() == 0
            && self.interrupts.responder.backlog() == 0
            && self.spi_register == NO_KEY
    }

    /// Polls the bridge until the board has been quiet for `quiet_us`, or
    /// until `limit_us` has passed. Returns whether it went quiet.
    pub fn run_until_quiet(&mut self, bridge: &mut Bridge, quiet_us: u64, limit_us: u64) -> bool {
        let deadline = self.now + limit_us;
        let mut quiet_since = None;
        while self.now < deadline {
            let step = bridge.poll(self);
            if step != Step::Idle {
                trace!("{step:?}");
            }
            if self.is_quiet(bridge) {
                let since = *quiet_since.get_or_insert(self.now);
                if self.now - since >= quiet_us {
                    debug!("Board quiet at {}us", self.now);
                    return true;
                }
            } else {
                quiet_since = None;
            }
        }
        false
    }
}

impl BusLines for Board {
    fn clock(&mut self) -> bool {
        !(self.host_clock_low || self.keyboard_connected && self.keyboard.clock_low())
    }

    fn data(&mut self) -> bool {
        !(self.host_data_low || self.keyboard_connected && self.keyboard.data_low())
    }

    fn drive_clock_low(&mut self) {
        self.host_clock_low = true;
        self.sample_clock();
    }

    fn release_clock(&mut self) {
        self.host_clock_low = false;
        self.sample_clock();
    }

    fn drive_data_low(&mut self) {
        self.host_data_low = true;
    }

    fn release_data(&mut self) {
        self.host_data_low = false;
    }

    fn set_clock_interrupt(&mut self, enabled: bool) {
        self.clock_interrupt = enabled;
    }

    fn delay_us(&mut self, us: u32) {
        for _ in 0..us {
            self.step();
        }
    }

    fn now_us(&mut self) -> u64 {
        self.now
    }

    fn spin(&mut self) {
        self.step();
    }
}
