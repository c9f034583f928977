//! The bridge firmware: PS/2 keyboard in, SPI key codes out.
//!
//! [`build`] splits the firmware into the two halves that run in different
//! contexts. [`Bridge`] is the foreground loop. [`Interrupts`] holds the two
//! interrupt handlers, which the board calls on a falling PS/2 clock edge and
//! on SPI transfer completion.

pub mod commands;
pub mod error;
pub mod frame;
pub mod hal;
pub mod queue;
pub mod receiver;
pub mod responder;
pub mod transmitter;
pub mod translator;

use tracing::{debug, info, trace, warn};

use self::commands::{CodeSet, KeyboardLink, KeyboardResponse, LockIndicators, LockState, Typematic};
use self::error::{FrameError, Ps2Error};
use self::hal::BusLines;
use self::queue::{QUEUE_SIZE, ScanCodeConsumer};
use self::receiver::{ReceiverHandle, ScanReceiver};
use self::responder::{HostCommandLatch, HostResponder};
use self::transmitter::{ScanTransmitter, TransmitTiming};
use self::translator::{ScanTranslator, Translation};

#[derive(Debug, Clone)]
pub struct Config {
    pub transmit: TransmitTiming,
    /// Bound on waiting for a keyboard reply or a follow-on scan code byte
    pub response_timeout_us: u32,
    /// Edge gap after which the receiver abandons a frame or a latched error
    pub receive_silence_us: u32,
    /// Time given to the keyboard to finish its power-on self test
    pub self_test_delay_us: u32,
    /// Run the LED walk at startup
    pub led_test: bool,
    pub led_test_step_us: u32,
    pub typematic: Typematic,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transmit: TransmitTiming::default(),
            response_timeout_us: 100_000,
            receive_silence_us: 2_000,
            self_test_delay_us: 1_000_000,
            led_test: true,
            led_test_step_us: 200_000,
            typematic: Typematic::SLOWEST,
        }
    }
}

/// Interrupt-context half of the firmware.
pub struct Interrupts {
    pub receiver: ScanReceiver,
    pub responder: HostResponder,
}

/// What one pass of the main loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Idle,
    Scan { raw: u8, result: Translation },
    Leds(LockState),
    Failed(Ps2Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub keys: usize,
    pub dropped: usize,
    pub discarded: usize,
    pub receive_errors: usize,
    pub timeouts: usize,
}

/// Foreground half of the firmware.
pub struct Bridge {
    config: Config,
    scan_codes: ScanCodeConsumer,
    translator: ScanTranslator,
    transmitter: ScanTransmitter,
    receiver: ReceiverHandle,
    locks: LockIndicators,
    applied_locks: LockState,
    host_command: HostCommandLatch,
    reported_error: Option<FrameError>,
    stats: Stats,
}

/// Creates both queues and hands each end to the context that owns it.
pub fn build(config: Config) -> (Bridge, Interrupts) {
    let (scan_tx, scan_rx) = queue::channel::<QUEUE_SIZE>();
    let (key_tx, key_rx) = queue::channel::<QUEUE_SIZE>();
    let (receiver, receiver_handle) = ScanReceiver::new(scan_tx, config.receive_silence_us);
    let (responder, host_command) = HostResponder::new(key_rx);

    let bridge = Bridge {
        transmitter: ScanTransmitter::new(config.transmit),
        config,
        scan_codes: scan_rx,
        translator: ScanTranslator::new(key_tx),
        receiver: receiver_handle,
        locks: LockIndicators::default(),
        applied_locks: LockState::NONE,
        host_command,
        reported_error: None,
        stats: Stats::default(),
    };
    (
        bridge,
        Interrupts {
            receiver,
            responder,
        },
    )
}

impl Bridge {
    /// Access to the keyboard command set from the foreground.
    pub fn keyboard<'a, H: BusLines + ?Sized>(&'a mut self, hal: &'a mut H) -> KeyboardLink<'a, H> {
        KeyboardLink {
            hal,
            transmitter: &mut self.transmitter,
            receiver: &self.receiver,
            scan_codes: &mut self.scan_codes,
            response_timeout_us: self.config.response_timeout_us,
        }
    }

    /// Power-on sequence: let the keyboard finish its self test, optionally
    /// walk the LEDs, then configure typematic and switch to scan code set 1.
    pub fn start<H: BusLines + ?Sized>(&mut self, hal: &mut H) -> Result<(), Ps2Error> {
        info!("Waiting {}us for keyboard self test", self.config.self_test_delay_us);
        hal.delay_us(self.config.self_test_delay_us);

        let led_test = self.config.led_test;
        let led_test_step_us = self.config.led_test_step_us;
        let typematic = self.config.typematic;
        let mut link = self.keyboard(hal);
        if led_test {
            let failed = link.led_self_test(led_test_step_us);
            if failed > 0 {
                warn!("LED self test: {failed} of 10 updates failed");
            }
        }

        let response = link.set_typematic(typematic)?;
        if response != KeyboardResponse::Ack {
            warn!("Keyboard rejected typematic {typematic:?}: {response:?}");
        }
        let response = link.select_code_set(CodeSet::Set1)?;
        if response != KeyboardResponse::Ack {
            warn!("Keyboard rejected scan code set 1: {response:?}");
        }

        hal.set_clock_interrupt(true);
        self.applied_locks = LockState::NONE;
        info!("Keyboard configured");
        Ok(())
    }

    /// One pass of the main loop.
    pub fn poll<H: BusLines + ?Sized>(&mut self, hal: &mut H) -> Step {
        self.report_receiver_error();

        if let Some(raw) = self.scan_codes.pop() {
            let mut link = KeyboardLink {
                hal: &mut *hal,
                transmitter: &mut self.transmitter,
                receiver: &self.receiver,
                scan_codes: &mut self.scan_codes,
                response_timeout_us: self.config.response_timeout_us,
            };
            let result = match self.translator.process(raw, &mut link) {
                Ok(result) => result,
                Err(e) => {
                    self.stats.timeouts += 1;
                    warn!("Scan sequence starting {raw:02X} abandoned: {e}");
                    return Step::Failed(e);
                }
            };
            match result {
                Translation::Key(_) => self.stats.keys += 1,
                Translation::Dropped(key) => {
                    self.stats.dropped += 1;
                    trace!("Key code {key:02X} lost, host is not keeping up");
                }
                Translation::Discarded => self.stats.discarded += 1,
            }
            return Step::Scan { raw, result };
        }

        // LED updates only go out when nothing is waiting, so the command
        // replies don't get mixed up with key traffic
        let desired = self.locks.get();
        if desired != self.applied_locks {
            self.applied_locks = desired;
            debug!("Updating LEDs to {desired:?}");
            return match self.keyboard(hal).set_leds(desired) {
                Ok(KeyboardResponse::Ack) => Step::Leds(desired),
                Ok(response) => {
                    warn!("Keyboard rejected LEDs {desired:?}: {response:?}");
                    Step::Leds(desired)
                }
                Err(e) => {
                    warn!("LED update failed: {e}");
                    Step::Failed(e)
                }
            };
        }

        hal.spin();
        Step::Idle
    }

    /// Runs the main loop forever.
    pub fn run<H: BusLines + ?Sized>(&mut self, hal: &mut H) -> ! {
        loop {
            self.poll(hal);
        }
    }

    fn report_receiver_error(&mut self) {
        let error = self.receiver.error();
        if error != self.reported_error {
            if let Some(error) = error {
                self.stats.receive_errors += 1;
                warn!("PS/2 receive error: {error}, waiting for line to go quiet");
            }
            self.reported_error = error;
        }
    }

    /// Shared handle for the desired lock LED state.
    pub fn lock_indicators(&self) -> LockIndicators {
        self.locks.clone()
    }

    pub fn receiver(&self) -> &ReceiverHandle {
        &self.receiver
    }

    /// Last byte received from the host.
    pub fn host_command(&self) -> u8 {
        self.host_command.get()
    }

    pub fn pending_scan_codes(&self) -> usize {
        self.scan_codes.len()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }
}
