//! Keyboard configuration commands.
//!
//! Every command is a send through [`ScanTransmitter`] followed by a bounded
//! blocking read of the keyboard's reply from the scan code queue. Replies
//! are handed back to the caller as-is; nothing is retried here.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

use crate::firmware::error::{Ps2Error, WaitPhase};
use crate::firmware::hal::BusLines;
use crate::firmware::queue::ScanCodeConsumer;
use crate::firmware::receiver::ReceiverHandle;
use crate::firmware::translator::ScanSource;
use crate::firmware::transmitter::ScanTransmitter;

// Host to keyboard
pub const CMD_SET_LEDS: u8 = 0xED;
pub const CMD_ECHO: u8 = 0xEE;
pub const CMD_SCAN_CODE_SET: u8 = 0xF0;
pub const CMD_TYPEMATIC: u8 = 0xF3;
pub const CMD_ENABLE: u8 = 0xF4;
pub const CMD_DISABLE: u8 = 0xF5;
pub const CMD_SET_DEFAULT: u8 = 0xF6;
pub const CMD_RESEND: u8 = 0xFE;
pub const CMD_RESET: u8 = 0xFF;

// Keyboard to host
pub const RSP_ERROR_SET23: u8 = 0x00;
pub const RSP_SELF_TEST_OK: u8 = 0xAA;
pub const RSP_ERROR: u8 = 0xFC;
pub const RSP_ECHO: u8 = 0xEE;
pub const RSP_BREAK: u8 = 0xF0;
pub const RSP_ACK: u8 = 0xFA;
pub const RSP_RESEND: u8 = 0xFE;
pub const RSP_ERROR_SET1: u8 = 0xFF;

/// A reply byte from the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardResponse {
    Ack,
    Resend,
    Error(u8),
    Echo,
    SelfTestPassed,
    Other(u8),
}

impl From<u8> for KeyboardResponse {
    fn from(byte: u8) -> Self {
        match byte {
            RSP_ACK => KeyboardResponse::Ack,
            RSP_RESEND => KeyboardResponse::Resend,
            RSP_ERROR | RSP_ERROR_SET1 | RSP_ERROR_SET23 => KeyboardResponse::Error(byte),
            RSP_ECHO => KeyboardResponse::Echo,
            RSP_SELF_TEST_OK => KeyboardResponse::SelfTestPassed,
            _ => KeyboardResponse::Other(byte),
        }
    }
}

impl From<KeyboardResponse> for u8 {
    fn from(response: KeyboardResponse) -> u8 {
        match response {
            KeyboardResponse::Ack => RSP_ACK,
            KeyboardResponse::Resend => RSP_RESEND,
            KeyboardResponse::Error(byte) => byte,
            KeyboardResponse::Echo => RSP_ECHO,
            KeyboardResponse::SelfTestPassed => RSP_SELF_TEST_OK,
            KeyboardResponse::Other(byte) => byte,
        }
    }
}

/// Lock indicator bitmask, in the layout of the set-LEDs parameter byte.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct LockState(u8);

impl LockState {
    pub const NONE: LockState = LockState(0);
    pub const SCROLL_LOCK: LockState = LockState(0x01);
    pub const NUM_LOCK: LockState = LockState(0x02);
    pub const CAPS_LOCK: LockState = LockState(0x04);

    pub fn new(bits: u8) -> Self {
        LockState(bits & 0x07)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_scroll_lock(self) -> bool {
        self.0 & 0x01 != 0
    }

    pub fn is_num_lock(self) -> bool {
        self.0 & 0x02 != 0
    }

    pub fn is_caps_lock(self) -> bool {
        self.0 & 0x04 != 0
    }
}

impl std::ops::BitOr for LockState {
    type Output = LockState;
    fn bitor(self, rhs: LockState) -> LockState {
        LockState(self.0 | rhs.0)
    }
}

impl fmt::Debug for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockState({:02X}=", self.0)?;
        let mut first = true;
        for lock in [
            ("Scroll", self.is_scroll_lock()),
            ("Num", self.is_num_lock()),
            ("Caps", self.is_caps_lock()),
        ] {
            if lock.1 {
                if first {
                    first = false;
                } else {
                    write!(f, "+")?;
                }
                write!(f, "{}", lock.0)?;
            }
        }
        write!(f, ")")
    }
}

/// Desired lock state, shared between whoever decides it and the main loop
/// that pushes it to the keyboard.
#[derive(Clone, Default)]
pub struct LockIndicators(Arc<AtomicU8>);

impl LockIndicators {
    pub fn set(&self, state: LockState) {
        self.0.store(state.bits(), Ordering::Release);
    }

    pub fn get(&self) -> LockState {
        LockState::new(self.0.load(Ordering::Acquire))
    }
}

/// Encoded typematic rate/delay: bits 0-4 rate, bits 5-6 delay, bit 7 zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Typematic(u8);

impl Typematic {
    /// 1 second delay, 2 Hz repeat.
    pub const SLOWEST: Typematic = Typematic(0x7F);

    pub fn new(rate: u8, delay: u8) -> Option<Self> {
        if rate <= 0x1F && delay <= 3 {
            Some(Typematic(delay << 5 | rate))
        } else {
            None
        }
    }

    pub fn from_raw(byte: u8) -> Self {
        Typematic(byte & 0x7F)
    }

    pub fn rate(self) -> u8 {
        self.0 & 0x1F
    }

    pub fn delay(self) -> u8 {
        self.0 >> 5
    }

    pub fn as_param_byte(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodeSet {
    Set1 = 1,
    Set2 = 2,
    Set3 = 3,
}

/// Everything needed to talk to the keyboard from the main loop.
pub struct KeyboardLink<'a, H: BusLines + ?Sized> {
    pub hal: &'a mut H,
    pub transmitter: &'a mut ScanTransmitter,
    pub receiver: &'a ReceiverHandle,
    pub scan_codes: &'a mut ScanCodeConsumer,
    pub response_timeout_us: u32,
}

impl<H: BusLines + ?Sized> KeyboardLink<'_, H> {
    pub fn send(&mut self, byte: u8) -> Result<(), Ps2Error> {
        self.transmitter.send(self.hal, self.receiver, byte)
    }

    /// Takes the next byte from the scan code queue, spinning until one
    /// arrives or the response timeout runs out.
    pub fn recv_wait(&mut self) -> Result<u8, Ps2Error> {
        let deadline = self.hal.now_us() + self.response_timeout_us as u64;
        loop {
            if let Some(byte) = self.scan_codes.pop() {
                return Ok(byte);
            }
            if self.hal.now_us() >= deadline {
                return Err(Ps2Error::Timeout(WaitPhase::Response));
            }
            self.hal.spin();
        }
    }

    /// Single-byte command; returns the keyboard's reply.
    pub fn command(&mut self, opcode: u8) -> Result<KeyboardResponse, Ps2Error> {
        self.send(opcode)?;
        let response = KeyboardResponse::from(self.recv_wait()?);
        debug!("KBD: {opcode:02X} -> {response:?}");
        Ok(response)
    }

    /// Command with one parameter byte. The parameter is only sent when the
    /// opcode is acknowledged; the last reply is returned either way.
    pub fn command_with_param(
        &mut self,
        opcode: u8,
        param: u8,
    ) -> Result<KeyboardResponse, Ps2Error> {
        let response = self.command(opcode)?;
        if response != KeyboardResponse::Ack {
            return Ok(response);
        }
        self.send(param)?;
        let response = KeyboardResponse::from(self.recv_wait()?);
        debug!("KBD: {opcode:02X} {param:02X} -> {response:?}");
        Ok(response)
    }

    pub fn set_leds(&mut self, state: LockState) -> Result<KeyboardResponse, Ps2Error> {
        self.command_with_param(CMD_SET_LEDS, state.bits())
    }

    pub fn select_code_set(&mut self, set: CodeSet) -> Result<KeyboardResponse, Ps2Error> {
        self.command_with_param(CMD_SCAN_CODE_SET, set as u8)
    }

    pub fn set_typematic(&mut self, typematic: Typematic) -> Result<KeyboardResponse, Ps2Error> {
        self.command_with_param(CMD_TYPEMATIC, typematic.as_param_byte())
    }

    pub fn echo(&mut self) -> Result<KeyboardResponse, Ps2Error> {
        self.command(CMD_ECHO)
    }

    pub fn enable(&mut self) -> Result<KeyboardResponse, Ps2Error> {
        self.command(CMD_ENABLE)
    }

    pub fn disable(&mut self) -> Result<KeyboardResponse, Ps2Error> {
        self.command(CMD_DISABLE)
    }

    pub fn set_default(&mut self) -> Result<KeyboardResponse, Ps2Error> {
        self.command(CMD_SET_DEFAULT)
    }

    /// Asks the keyboard to resend its last byte and returns that byte.
    pub fn resend(&mut self) -> Result<KeyboardResponse, Ps2Error> {
        self.command(CMD_RESEND)
    }

    /// Resets the keyboard. On Ack, waits for and returns the self-test
    /// result.
    pub fn reset(&mut self) -> Result<KeyboardResponse, Ps2Error> {
        let response = self.command(CMD_RESET)?;
        if response != KeyboardResponse::Ack {
            return Ok(response);
        }
        let result = KeyboardResponse::from(self.recv_wait()?);
        debug!("KBD: self test -> {result:?}");
        Ok(result)
    }

    /// Walks the lock LEDs back and forth. A failed update doesn't stop the
    /// walk; returns how many of the updates failed.
    pub fn led_self_test(&mut self, step_us: u32) -> usize {
        let mut failed = 0;
        for state in [
            LockState::SCROLL_LOCK,
            LockState::CAPS_LOCK,
            LockState::NUM_LOCK,
            LockState::CAPS_LOCK,
            LockState::SCROLL_LOCK,
        ] {
            if let Err(e) = self.set_leds(state) {
                debug!("LED self test: {state:?} failed: {e}");
                failed += 1;
            }
            self.hal.delay_us(step_us);
            if let Err(e) = self.set_leds(LockState::NONE) {
                debug!("LED self test: clear failed: {e}");
                failed += 1;
            }
        }
        failed
    }
}

impl<H: BusLines + ?Sized> ScanSource for KeyboardLink<'_, H> {
    fn next_scan_code(&mut self) -> Result<u8, Ps2Error> {
        self.recv_wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_decode() {
        assert_eq!(KeyboardResponse::from(0xFA), KeyboardResponse::Ack);
        assert_eq!(KeyboardResponse::from(0xFE), KeyboardResponse::Resend);
        assert_eq!(KeyboardResponse::from(0xFC), KeyboardResponse::Error(0xFC));
        assert_eq!(KeyboardResponse::from(0xFF), KeyboardResponse::Error(0xFF));
        assert_eq!(KeyboardResponse::from(0x00), KeyboardResponse::Error(0x00));
        assert_eq!(KeyboardResponse::from(0xEE), KeyboardResponse::Echo);
        assert_eq!(KeyboardResponse::from(0xAA), KeyboardResponse::SelfTestPassed);
        assert_eq!(KeyboardResponse::from(0x1E), KeyboardResponse::Other(0x1E));
        for byte in 0..=255u8 {
            assert_eq!(u8::from(KeyboardResponse::from(byte)), byte);
        }
    }

    #[test]
    fn test_lock_state() {
        let state = LockState::NUM_LOCK | LockState::CAPS_LOCK;
        assert_eq!(state.bits(), 0x06);
        assert!(!state.is_scroll_lock());
        assert!(state.is_num_lock());
        assert!(state.is_caps_lock());
        assert_eq!(LockState::new(0xFF).bits(), 0x07);
        assert_eq!(format!("{state:?}"), "LockState(06=Num+Caps)");

        let shared = LockIndicators::default();
        let other = shared.clone();
        other.set(LockState::SCROLL_LOCK);
        assert_eq!(shared.get(), LockState::SCROLL_LOCK);
    }

    #[test]
    fn test_typematic() {
        assert_eq!(Typematic::SLOWEST.rate(), 0x1F);
        assert_eq!(Typematic::SLOWEST.delay(), 3);
        assert_eq!(Typematic::new(0x1F, 3), Some(Typematic::SLOWEST));
        assert_eq!(Typematic::new(0x20, 0), None);
        assert_eq!(Typematic::new(0, 4), None);
        assert_eq!(Typematic::from_raw(0xFF).as_param_byte(), 0x7F);
        assert_eq!(Typematic::new(0x0B, 1).unwrap().as_param_byte(), 0x2B);
    }
}
