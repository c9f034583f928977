//! Keyboard-to-host bit decoder, run from the falling-clock-edge interrupt.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tracing::{debug, trace};

use crate::firmware::error::FrameError;
use crate::firmware::queue::ScanCodeProducer;

/// Decoder state as seen from outside the interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReceiverState {
    Idle,
    CollectingDataBits,
    AwaitingParity,
    AwaitingStop,
    ErrorStart,
    ErrorOverrun,
    ErrorParity,
    ErrorStop,
}

impl ReceiverState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ReceiverState::CollectingDataBits,
            2 => ReceiverState::AwaitingParity,
            3 => ReceiverState::AwaitingStop,
            4 => ReceiverState::ErrorStart,
            5 => ReceiverState::ErrorOverrun,
            6 => ReceiverState::ErrorParity,
            7 => ReceiverState::ErrorStop,
            _ => ReceiverState::Idle,
        }
    }

    pub fn error(self) -> Option<FrameError> {
        match self {
            ReceiverState::ErrorStart => Some(FrameError::Start),
            ReceiverState::ErrorOverrun => Some(FrameError::Overrun),
            ReceiverState::ErrorParity => Some(FrameError::Parity),
            ReceiverState::ErrorStop => Some(FrameError::Stop),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Decode {
    Idle,
    DataBits { byte: u8, bits: u8, ones: u8 },
    Parity { byte: u8, ones: u8 },
    Stop { byte: u8 },
    Error(FrameError),
}

impl Decode {
    fn state(self) -> ReceiverState {
        match self {
            Decode::Idle => ReceiverState::Idle,
            Decode::DataBits { .. } => ReceiverState::CollectingDataBits,
            Decode::Parity { .. } => ReceiverState::AwaitingParity,
            Decode::Stop { .. } => ReceiverState::AwaitingStop,
            Decode::Error(FrameError::Start) => ReceiverState::ErrorStart,
            Decode::Error(FrameError::Overrun) => ReceiverState::ErrorOverrun,
            Decode::Error(FrameError::Parity) => ReceiverState::ErrorParity,
            Decode::Error(FrameError::Stop) => ReceiverState::ErrorStop,
        }
    }
}

struct Shared {
    state: AtomicU8,
    reset: AtomicBool,
}

/// Foreground view of the receiver: state inspection and reset requests.
#[derive(Clone)]
pub struct ReceiverHandle {
    shared: Arc<Shared>,
}

impl ReceiverHandle {
    /// Returns the receiver to `Idle`. The reset is applied before the next
    /// edge is decoded.
    pub fn reset(&self) {
        self.shared.reset.store(true, Ordering::Release);
        self.shared
            .state
            .store(ReceiverState::Idle as u8, Ordering::Release);
    }

    pub fn state(&self) -> ReceiverState {
        if self.shared.reset.load(Ordering::Acquire) {
            return ReceiverState::Idle;
        }
        ReceiverState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn error(&self) -> Option<FrameError> {
        self.state().error()
    }
}

/// Edge-driven decoder. Owned by the clock interrupt; it is the only writer
/// of the scan code queue.
pub struct ScanReceiver {
    decode: Decode,
    last_edge_us: Option<u64>,
    silence_us: u32,
    queue: ScanCodeProducer,
    shared: Arc<Shared>,
}

impl ScanReceiver {
    /// `silence_us` is the edge gap after which a partial frame or a latched
    /// error is abandoned.
    pub fn new(queue: ScanCodeProducer, silence_us: u32) -> (Self, ReceiverHandle) {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ReceiverState::Idle as u8),
            reset: AtomicBool::new(false),
        });
        (
            Self {
                decode: Decode::Idle,
                last_edge_us: None,
                silence_us,
                queue,
                shared: shared.clone(),
            },
            ReceiverHandle { shared },
        )
    }

    pub fn state(&self) -> ReceiverState {
        self.decode.state()
    }

    /// Falling clock edge with the sampled data line.
    pub fn on_clock_edge(&mut self, data: bool, now_us: u64) {
        if self.shared.reset.swap(false, Ordering::AcqRel) {
            self.decode = Decode::Idle;
        }

        if let Some(last) = self.last_edge_us {
            if self.decode != Decode::Idle && now_us.saturating_sub(last) > self.silence_us as u64
            {
                debug!(
                    "PS2 RX: {:?} abandoned after {}us of silence",
                    self.decode.state(),
                    now_us - last
                );
                self.decode = Decode::Idle;
            }
        }
        self.last_edge_us = Some(now_us);

        self.decode = match self.decode {
            Decode::Error(error) => Decode::Error(error),
            Decode::Idle => {
                if !data {
                    Decode::DataBits {
                        byte: 0,
                        bits: 0,
                        ones: 0,
                    }
                } else {
                    Decode::Error(FrameError::Start)
                }
            }
            Decode::DataBits {
                mut byte,
                mut bits,
                mut ones,
            } => {
                byte |= (data as u8) << bits;
                ones += data as u8;
                bits += 1;
                if bits == 8 {
                    Decode::Parity { byte, ones }
                } else {
                    Decode::DataBits { byte, bits, ones }
                }
            }
            Decode::Parity { byte, ones } => {
                if (ones + data as u8) & 1 == 1 {
                    Decode::Stop { byte }
                } else {
                    Decode::Error(FrameError::Parity)
                }
            }
            Decode::Stop { byte } => {
                if data {
                    match self.queue.push(byte) {
                        Ok(()) => {
                            trace!("PS2 RX: {byte:02X}");
                            Decode::Idle
                        }
                        Err(_) => Decode::Error(FrameError::Overrun),
                    }
                } else {
                    Decode::Error(FrameError::Stop)
                }
            }
        };

        if let Decode::Error(error) = self.decode {
            trace!("PS2 RX: latched {error}");
        }
        self.shared
            .state
            .store(self.decode.state() as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::firmware::frame;
    use crate::firmware::queue::{self, QUEUE_SIZE, ScanCodeConsumer};

    const SILENCE_US: u32 = 2_000;
    const BIT_US: u64 = 80;

    struct Wire {
        rx: ScanReceiver,
        handle: ReceiverHandle,
        codes: ScanCodeConsumer,
        now: u64,
    }

    impl Wire {
        fn new() -> Self {
            let (producer, codes) = queue::channel::<QUEUE_SIZE>();
            let (rx, handle) = ScanReceiver::new(producer, SILENCE_US);
            Self {
                rx,
                handle,
                codes,
                now: 0,
            }
        }

        fn clock_bits(&mut self, bits: &[bool]) {
            for &bit in bits {
                self.now += BIT_US;
                self.rx.on_clock_edge(bit, self.now);
            }
        }

        fn send(&mut self, byte: u8) {
            self.clock_bits(&frame::encode(byte));
        }

        fn pause(&mut self, us: u64) {
            self.now += us;
        }

        fn drain(&mut self) -> Vec<u8> {
            std::iter::from_fn(|| self.codes.pop()).collect()
        }
    }

    #[test]
    fn test_all_bytes_decode() {
        let mut wire = Wire::new();
        for byte in 0..=255u8 {
            wire.send(byte);
            assert_eq!(wire.rx.state(), ReceiverState::Idle);
            assert_eq!(wire.drain(), vec![byte]);
        }
    }

    #[test]
    fn test_transient_states() {
        let mut wire = Wire::new();
        let bits = frame::encode(0x1E);
        wire.clock_bits(&bits[..1]);
        assert_eq!(wire.handle.state(), ReceiverState::CollectingDataBits);
        wire.clock_bits(&bits[1..9]);
        assert_eq!(wire.handle.state(), ReceiverState::AwaitingParity);
        wire.clock_bits(&bits[9..10]);
        assert_eq!(wire.handle.state(), ReceiverState::AwaitingStop);
        wire.clock_bits(&bits[10..]);
        assert_eq!(wire.handle.state(), ReceiverState::Idle);
        assert_eq!(wire.drain(), vec![0x1E]);
    }

    #[rstest]
    #[case::start(0, ReceiverState::ErrorStart)]
    #[case::parity(9, ReceiverState::ErrorParity)]
    #[case::stop(10, ReceiverState::ErrorStop)]
    fn test_malformed_frame_latches(#[case] bad_bit: usize, #[case] expected: ReceiverState) {
        for byte in [0x00, 0x1E, 0xAA, 0xFF] {
            let mut wire = Wire::new();
            let mut bits = frame::encode(byte);
            bits[bad_bit] = !bits[bad_bit];
            wire.clock_bits(&bits);
            assert_eq!(wire.handle.state(), expected);
            assert_eq!(wire.handle.error(), expected.error());
            // Latched: a good frame right behind it is ignored
            wire.send(0x10);
            assert_eq!(wire.handle.state(), expected);
            assert!(wire.drain().is_empty());
        }
    }

    #[test]
    fn test_overrun() {
        let mut wire = Wire::new();
        for i in 0..QUEUE_SIZE as u8 {
            wire.send(i + 1);
        }
        assert_eq!(wire.handle.state(), ReceiverState::Idle);
        wire.send(0x55);
        assert_eq!(wire.handle.error(), Some(FrameError::Overrun));
        let drained = wire.drain();
        assert_eq!(drained.len(), QUEUE_SIZE);
        assert_eq!(drained[0], 1);
        assert_eq!(drained[QUEUE_SIZE - 1], QUEUE_SIZE as u8);
    }

    #[test]
    fn test_silence_recovers_from_error() {
        let mut wire = Wire::new();
        let mut bits = frame::encode(0x2C);
        bits[9] = !bits[9];
        wire.clock_bits(&bits);
        assert_eq!(wire.handle.error(), Some(FrameError::Parity));

        wire.pause(SILENCE_US as u64 + 1);
        wire.send(0x2C);
        assert_eq!(wire.handle.state(), ReceiverState::Idle);
        assert_eq!(wire.drain(), vec![0x2C]);
    }

    #[test]
    fn test_silence_abandons_partial_frame() {
        let mut wire = Wire::new();
        let bits = frame::encode(0x39);
        wire.clock_bits(&bits[..5]);
        wire.pause(SILENCE_US as u64 + 1);
        wire.send(0x39);
        assert_eq!(wire.drain(), vec![0x39]);
    }

    #[test]
    fn test_explicit_reset() {
        let mut wire = Wire::new();
        wire.clock_bits(&[true]);
        assert_eq!(wire.handle.error(), Some(FrameError::Start));
        wire.handle.reset();
        assert_eq!(wire.handle.state(), ReceiverState::Idle);
        wire.send(0x48);
        assert_eq!(wire.drain(), vec![0x48]);

        // Reset in the middle of a frame drops the partial byte
        let bits = frame::encode(0x11);
        wire.clock_bits(&bits[..4]);
        wire.handle.reset();
        wire.send(0x22);
        assert_eq!(wire.drain(), vec![0x22]);
    }
}
