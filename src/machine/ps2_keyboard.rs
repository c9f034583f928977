//! # PS/2 keyboard device model.
//!
//! Wire-level model of an AT/PS/2 keyboard, stepped once per microsecond by
//! the board. The keyboard owns the clock: it frames its own bytes and, when
//! the host requests to send, clocks the host's bits in and acknowledges
//! them.
//!
//! Each bit occupies one slot of `bit_us`. Within a slot the device updates
//! data at the start, pulls clock low at `clock_low_at` and releases it at
//! `clock_high_at`. Bits from the host are sampled on the release.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::firmware::commands::{
    CMD_DISABLE, CMD_ECHO, CMD_ENABLE, CMD_RESEND, CMD_RESET, CMD_SCAN_CODE_SET, CMD_SET_DEFAULT,
    CMD_SET_LEDS, CMD_TYPEMATIC, RSP_ACK, RSP_ECHO, RSP_RESEND, RSP_SELF_TEST_OK,
};
use crate::firmware::frame::{self, FRAME_BITS};

const DEFAULT_TYPEMATIC: u8 = 0x2B;
const DEFAULT_SCAN_CODE_SET: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardTiming {
    pub bit_us: u32,
    pub clock_low_at: u32,
    pub clock_high_at: u32,
    /// Quiet time between consecutive frames
    pub gap_us: u32,
    /// Power-on self test duration, after which 0xAA is sent
    pub self_test_us: u32,
}

impl Default for KeyboardTiming {
    fn default() -> Self {
        Self {
            bit_us: 80,
            clock_low_at: 10,
            clock_high_at: 50,
            gap_us: 500,
            self_test_us: 500_000,
        }
    }
}

/// Commands the keyboard understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardCommand {
    SetLeds,
    Echo,
    ScanCodeSet,
    SetTypematic,
    Enable,
    Disable,
    SetDefault,
    Resend,
    Reset,
    Unknown(u8),
}

impl From<u8> for KeyboardCommand {
    fn from(byte: u8) -> Self {
        match byte {
            CMD_SET_LEDS => KeyboardCommand::SetLeds,
            CMD_ECHO => KeyboardCommand::Echo,
            CMD_SCAN_CODE_SET => KeyboardCommand::ScanCodeSet,
            CMD_TYPEMATIC => KeyboardCommand::SetTypematic,
            CMD_ENABLE => KeyboardCommand::Enable,
            CMD_DISABLE => KeyboardCommand::Disable,
            CMD_SET_DEFAULT => KeyboardCommand::SetDefault,
            CMD_RESEND => KeyboardCommand::Resend,
            CMD_RESET => KeyboardCommand::Reset,
            other => KeyboardCommand::Unknown(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    Response,
    Typed,
}

/// Test hook overriding the reply to the next command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scripted {
    Reply(u8),
    Silent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    SelfTest { remaining: u32 },
    Idle { holdoff: u32 },
    Sending {
        byte: u8,
        source: Source,
        corrupt: bool,
        bit: usize,
        t: u32,
    },
    Receiving { bit: usize, t: u32, bits: u16 },
    Acking { t: u32, bits: u16 },
}

pub struct Ps2Keyboard {
    timing: KeyboardTiming,
    phase: Phase,
    responses: VecDeque<u8>,
    typed: VecDeque<u8>,
    pending: Option<KeyboardCommand>,
    last_sent: u8,
    withhold_ack: bool,
    scripted: Option<Scripted>,
    corrupt_next: bool,

    leds: u8,
    scan_code_set: u8,
    typematic: u8,
    scanning: bool,
    received: Vec<u8>,

    clock_low: bool,
    data_low: bool,
}

impl Ps2Keyboard {
    pub fn new(timing: KeyboardTiming) -> Self {
        Self {
            timing,
            phase: Phase::SelfTest {
                remaining: timing.self_test_us,
            },
            responses: VecDeque::new(),
            typed: VecDeque::new(),
            pending: None,
            last_sent: RSP_SELF_TEST_OK,
            withhold_ack: false,
            scripted: None,
            corrupt_next: false,
            leds: 0,
            scan_code_set: DEFAULT_SCAN_CODE_SET,
            typematic: DEFAULT_TYPEMATIC,
            scanning: true,
            received: Vec::new(),
            clock_low: false,
            data_low: false,
        }
    }

    /// Queues raw scan code bytes as if keys were pressed and released.
    pub fn type_bytes(&mut self, bytes: &[u8]) {
        self.typed.extend(bytes);
    }

    /// The next host frame is clocked in but not acknowledged.
    pub fn withhold_next_ack(&mut self) {
        self.withhold_ack = true;
    }

    /// The next command is acknowledged on the wire but answered with
    /// `reply` instead of its normal response.
    pub fn reply_next_with(&mut self, reply: u8) {
        self.scripted = Some(Scripted::Reply(reply));
    }

    /// The next command is acknowledged on the wire and never answered.
    pub fn ignore_next_command(&mut self) {
        self.scripted = Some(Scripted::Silent);
    }

    /// The next frame sent goes out with its parity bit flipped.
    pub fn corrupt_next_frame(&mut self) {
        self.corrupt_next = true;
    }

    pub fn clock_low(&self) -> bool {
        self.clock_low
    }

    pub fn data_low(&self) -> bool {
        self.data_low
    }

    pub fn leds(&self) -> u8 {
        self.leds
    }

    pub fn scan_code_set(&self) -> u8 {
        self.scan_code_set
    }

    pub fn typematic(&self) -> u8 {
        self.typematic
    }

    pub fn scanning(&self) -> bool {
        self.scanning
    }

    /// Every byte received from the host, in order.
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    /// Nothing on the wire and nothing left to send.
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle { .. })
            && self.responses.is_empty()
            && (self.typed.is_empty() || !self.scanning || self.pending.is_some())
    }

    /// Advance one microsecond given what the host is driving.
    pub fn tick(&mut self, host_clock_low: bool, host_data_low: bool) {
        let t_low = self.timing.clock_low_at;
        let t_high = self.timing.clock_high_at;

        self.phase = match self.phase {
            Phase::SelfTest { remaining } => {
                if remaining == 0 {
                    trace!("KBD: self test complete");
                    self.responses.push_back(RSP_SELF_TEST_OK);
                    Phase::Idle { holdoff: 0 }
                } else {
                    Phase::SelfTest {
                        remaining: remaining - 1,
                    }
                }
            }
            Phase::Idle { holdoff } => {
                if host_data_low && !host_clock_low {
                    trace!("KBD: request to send");
                    Phase::Receiving {
                        bit: 0,
                        t: 0,
                        bits: 0,
                    }
                } else if host_clock_low {
                    // Inhibited
                    Phase::Idle { holdoff }
                } else if holdoff > 0 {
                    Phase::Idle {
                        holdoff: holdoff - 1,
                    }
                } else if let Some((byte, source)) = self.next_output() {
                    trace!("KBD: sending {byte:02X}");
                    Phase::Sending {
                        byte,
                        source,
                        corrupt: std::mem::take(&mut self.corrupt_next),
                        bit: 0,
                        t: 0,
                    }
                } else {
                    Phase::Idle { holdoff: 0 }
                }
            }
            Phase::Sending {
                byte,
                source,
                corrupt,
                mut bit,
                mut t,
            } => {
                let delivered = bit == FRAME_BITS - 1 && t > t_low;
                if host_clock_low && delivered {
                    self.clock_low = false;
                    self.data_low = false;
                    self.last_sent = byte;
                    return self.set_phase(Phase::Idle { holdoff: 0 });
                }
                if host_clock_low {
                    // The host took the bus before the last clock; try again
                    // once it lets go
                    trace!("KBD: {byte:02X} interrupted at bit {bit}");
                    self.clock_low = false;
                    self.data_low = false;
                    self.corrupt_next |= corrupt;
                    match source {
                        Source::Response => self.responses.push_front(byte),
                        Source::Typed => self.typed.push_front(byte),
                    }
                    return self.set_phase(Phase::Idle { holdoff: 0 });
                }
                if t == 0 {
                    let mut bits = frame::encode(byte);
                    if corrupt {
                        bits[FRAME_BITS - 2] = !bits[FRAME_BITS - 2];
                    }
                    self.data_low = !bits[bit];
                }
                if t == t_low {
                    self.clock_low = true;
                }
                if t == t_high {
                    self.clock_low = false;
                }
                t += 1;
                if t == self.timing.bit_us {
                    t = 0;
                    bit += 1;
                }
                if bit == FRAME_BITS {
                    self.data_low = false;
                    self.last_sent = byte;
                    Phase::Idle {
                        holdoff: self.timing.gap_us,
                    }
                } else {
                    Phase::Sending {
                        byte,
                        source,
                        corrupt,
                        bit,
                        t,
                    }
                }
            }
            Phase::Receiving {
                mut bit,
                mut t,
                mut bits,
            } => {
                if t == t_low {
                    self.clock_low = true;
                }
                if t == t_high {
                    self.clock_low = false;
                    if !host_data_low {
                        bits |= 1 << bit;
                    }
                }
                t += 1;
                if t == self.timing.bit_us {
                    t = 0;
                    bit += 1;
                }
                if bit == FRAME_BITS - 1 {
                    Phase::Acking { t: 0, bits }
                } else {
                    Phase::Receiving { bit, t, bits }
                }
            }
            Phase::Acking { mut t, bits } => {
                if t == 0 {
                    if self.withhold_ack {
                        self.withhold_ack = false;
                        debug!("KBD: withheld acknowledge");
                    } else {
                        self.data_low = true;
                        self.handle_frame(bits);
                    }
                }
                if t == t_low {
                    self.clock_low = true;
                }
                if t == t_high {
                    self.clock_low = false;
                }
                if t == t_high + 10 {
                    self.data_low = false;
                }
                t += 1;
                if t == self.timing.bit_us {
                    Phase::Idle {
                        holdoff: self.timing.gap_us,
                    }
                } else {
                    Phase::Acking { t, bits }
                }
            }
        };
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn next_output(&mut self) -> Option<(u8, Source)> {
        if let Some(byte) = self.responses.pop_front() {
            return Some((byte, Source::Response));
        }
        // Scanning is held while a command waits for its parameter
        if self.scanning && self.pending.is_none() {
            if let Some(byte) = self.typed.pop_front() {
                return Some((byte, Source::Typed));
            }
        }
        None
    }

    /// `bits` holds data bits 0-7, parity at 8 and stop at 9.
    fn handle_frame(&mut self, bits: u16) {
        let byte = (bits & 0xFF) as u8;
        let parity = bits & (1 << 8) != 0;
        let stop = bits & (1 << 9) != 0;
        if parity != frame::odd_parity(byte) || !stop {
            debug!("KBD: bad frame {bits:03X}, asking for resend");
            self.responses.push_back(RSP_RESEND);
            return;
        }
        self.received.push(byte);
        self.receive_byte(byte);
    }

    /// Command byte processing, once the frame checks out.
    pub fn receive_byte(&mut self, byte: u8) {
        if let Some(pending) = self.pending.take() {
            self.handle_param(pending, byte);
            return;
        }

        // A new command discards anything not yet sent
        self.responses.clear();

        if let Some(scripted) = self.scripted.take() {
            debug!("KBD: command {byte:02X} answered with {scripted:?}");
            if let Scripted::Reply(reply) = scripted {
                self.responses.push_back(reply);
            }
            return;
        }

        let command = KeyboardCommand::from(byte);
        debug!("KBD: command {command:?}");
        match command {
            KeyboardCommand::SetLeds
            | KeyboardCommand::ScanCodeSet
            | KeyboardCommand::SetTypematic => {
                self.responses.push_back(RSP_ACK);
                self.pending = Some(command);
            }
            KeyboardCommand::Echo => self.responses.push_back(RSP_ECHO),
            KeyboardCommand::Enable => {
                self.scanning = true;
                self.responses.push_back(RSP_ACK);
            }
            KeyboardCommand::Disable => {
                self.set_defaults();
                self.scanning = false;
                self.responses.push_back(RSP_ACK);
            }
            KeyboardCommand::SetDefault => {
                self.set_defaults();
                self.responses.push_back(RSP_ACK);
            }
            KeyboardCommand::Resend => self.responses.push_back(self.last_sent),
            KeyboardCommand::Reset => {
                self.set_defaults();
                self.leds = 0;
                self.scanning = true;
                self.responses.push_back(RSP_ACK);
                self.responses.push_back(RSP_SELF_TEST_OK);
            }
            KeyboardCommand::Unknown(_) => self.responses.push_back(RSP_RESEND),
        }
    }

    fn handle_param(&mut self, command: KeyboardCommand, byte: u8) {
        match command {
            KeyboardCommand::SetLeds => {
                self.leds = byte & 0x07;
                self.responses.push_back(RSP_ACK);
            }
            KeyboardCommand::ScanCodeSet => {
                self.responses.push_back(RSP_ACK);
                match byte {
                    0 => self.responses.push_back(self.scan_code_set),
                    1..=3 => self.scan_code_set = byte,
                    _ => {}
                }
            }
            KeyboardCommand::SetTypematic => {
                self.typematic = byte & 0x7F;
                self.responses.push_back(RSP_ACK);
            }
            _ => {}
        }
    }

    fn set_defaults(&mut self) {
        self.typematic = DEFAULT_TYPEMATIC;
        self.scan_code_set = DEFAULT_SCAN_CODE_SET;
        self.pending = None;
    }

    #[cfg(test)]
    fn take_responses(&mut self) -> Vec<u8> {
        self.responses.drain(..).collect()
    }
}
