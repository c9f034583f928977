//! Board interface consumed by the firmware core.

use crate::firmware::error::{Ps2Error, WaitPhase};

/// The PS/2 clock/data pair and the few timing services the core needs.
///
/// Both lines are open collector with pull-ups: "release" lets the line float
/// high unless the keyboard pulls it low, reads return the resulting level.
pub trait BusLines {
    /// Current clock line level (`true` = high).
    fn clock(&mut self) -> bool;
    /// Current data line level (`true` = high).
    fn data(&mut self) -> bool;

    fn drive_clock_low(&mut self);
    fn release_clock(&mut self);
    fn drive_data_low(&mut self);
    fn release_data(&mut self);

    /// Masks or unmasks the falling-clock-edge interrupt.
    fn set_clock_interrupt(&mut self, enabled: bool);

    /// Busy-waits for `us` microseconds. Interrupts keep running.
    fn delay_us(&mut self, us: u32);

    /// Monotonic microsecond counter.
    fn now_us(&mut self) -> u64;

    /// Called once per iteration of every busy loop.
    fn spin(&mut self) {
        std::hint::spin_loop();
    }

    /// Sets the data line to `high` by releasing it or pulling it low.
    fn set_data(&mut self, high: bool) {
        if high {
            self.release_data();
        } else {
            self.drive_data_low();
        }
    }
}

/// Spins until `done` returns true, failing with `Timeout(phase)` once
/// `timeout_us` microseconds have passed.
pub fn wait_for<H: BusLines + ?Sized>(
    hal: &mut H,
    timeout_us: u32,
    phase: WaitPhase,
    mut done: impl FnMut(&mut H) -> bool,
) -> Result<(), Ps2Error> {
    let deadline = hal.now_us() + timeout_us as u64;
    loop {
        if done(hal) {
            return Ok(());
        }
        if hal.now_us() >= deadline {
            return Err(Ps2Error::Timeout(phase));
        }
        hal.spin();
    }
}
