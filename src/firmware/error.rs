//! Error types for the bridge firmware.

use std::fmt;

/// The bus wait that did not complete in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    /// Waiting for the keyboard to start clocking after request-to-send
    FirstClock,
    /// Waiting for the keyboard to pull clock low for the next bit
    ClockLow,
    /// Waiting for the keyboard to release clock after a bit
    ClockHigh,
    /// Waiting for the acknowledge clock pulse
    Acknowledge,
    /// Waiting for a byte from the keyboard
    Response,
}

/// Errors returned by the keyboard-side protocol operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ps2Error {
    /// No edge or byte was observed within the configured bound
    Timeout(WaitPhase),
    /// The keyboard held data high instead of acknowledging the frame
    NoAcknowledge,
}

impl fmt::Display for Ps2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ps2Error::Timeout(phase) => write!(f, "PS/2 protocol timeout ({phase:?})"),
            Ps2Error::NoAcknowledge => write!(f, "keyboard did not acknowledge"),
        }
    }
}

impl std::error::Error for Ps2Error {}

/// Latched receive errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    Start,
    Parity,
    Stop,
    Overrun,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Start => write!(f, "bad start bit"),
            FrameError::Parity => write!(f, "bad parity"),
            FrameError::Stop => write!(f, "bad stop bit"),
            FrameError::Overrun => write!(f, "scan code queue overrun"),
        }
    }
}

impl std::error::Error for FrameError {}

/// A push was rejected because the queue was full. The byte is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull(pub u8);

impl fmt::Display for QueueFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue full, dropped {:02X}", self.0)
    }
}

impl std::error::Error for QueueFull {}
