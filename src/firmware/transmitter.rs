//! Host-to-keyboard bit-banged sender.

use tracing::{debug, trace};

use crate::firmware::error::{Ps2Error, WaitPhase};
use crate::firmware::frame;
use crate::firmware::hal::{BusLines, wait_for};
use crate::firmware::receiver::ReceiverHandle;

/// Timing of a host-to-keyboard send, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitTiming {
    /// How long clock is held low to request to send
    pub request_us: u32,
    /// Bound on the keyboard starting to clock after the request
    pub first_clock_timeout_us: u32,
    /// Bound on every later clock edge
    pub bit_timeout_us: u32,
    /// Pause after every send so consecutive sends are spaced apart
    pub recovery_us: u32,
}

impl Default for TransmitTiming {
    fn default() -> Self {
        Self {
            request_us: 100,
            first_clock_timeout_us: 15_000,
            bit_timeout_us: 2_000,
            recovery_us: 20_000,
        }
    }
}

pub struct ScanTransmitter {
    timing: TransmitTiming,
}

impl ScanTransmitter {
    pub fn new(timing: TransmitTiming) -> Self {
        Self { timing }
    }

    pub fn timing(&self) -> &TransmitTiming {
        &self.timing
    }

    /// Sends `byte` to the keyboard and waits for its line acknowledge.
    ///
    /// The clock interrupt is masked and the receiver reset for the duration
    /// of the frame. Whatever the outcome, both lines are released, the
    /// interrupt is unmasked and the recovery delay is observed.
    pub fn send<H: BusLines + ?Sized>(
        &mut self,
        hal: &mut H,
        receiver: &ReceiverHandle,
        byte: u8,
    ) -> Result<(), Ps2Error> {
        hal.set_clock_interrupt(false);
        receiver.reset();

        let result = self.clock_out(hal, byte);

        hal.release_data();
        hal.release_clock();
        hal.set_clock_interrupt(true);
        hal.delay_us(self.timing.recovery_us);

        match result {
            Ok(()) => trace!("PS2 TX: {byte:02X} acknowledged"),
            Err(e) => debug!("PS2 TX: {byte:02X} failed: {e}"),
        }
        result
    }

    fn clock_out<H: BusLines + ?Sized>(&mut self, hal: &mut H, byte: u8) -> Result<(), Ps2Error> {
        let t = self.timing;

        // Request to send: clock low, then the start bit, then hand the clock
        // back to the keyboard
        hal.drive_clock_low();
        hal.delay_us(t.request_us);
        hal.drive_data_low();
        hal.release_clock();

        for (i, bit) in frame::host_bits(byte).into_iter().enumerate() {
            let (limit, phase) = if i == 0 {
                (t.first_clock_timeout_us, WaitPhase::FirstClock)
            } else {
                (t.bit_timeout_us, WaitPhase::ClockLow)
            };
            wait_for(hal, limit, phase, |h| !h.clock())?;
            hal.set_data(bit);
            wait_for(hal, t.bit_timeout_us, WaitPhase::ClockHigh, |h| h.clock())?;
        }

        hal.release_data();
        wait_for(hal, t.bit_timeout_us, WaitPhase::Acknowledge, |h| !h.clock())?;
        let acknowledged = !hal.data();
        wait_for(hal, t.bit_timeout_us, WaitPhase::ClockHigh, |h| h.clock())?;

        if acknowledged {
            Ok(())
        } else {
            Err(Ps2Error::NoAcknowledge)
        }
    }
}
