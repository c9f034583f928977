//! Set 1 scan codes to the 83-key layout.
//!
//! Multi-byte sequences are collapsed to a single code: 0xE1 (Pause/Break) is
//! swallowed whole, 0xE0 keeps only the cursor keys, which land on the keypad
//! arrow positions. Keys with no counterpart on the target keyboard are
//! dropped and keypad "/" becomes the plain "/" key.

use bit_set::BitSet;
use tracing::trace;

use crate::firmware::error::Ps2Error;
use crate::firmware::queue::KeyCodeProducer;

pub const EXTENDED_PREFIX: u8 = 0xE0;
pub const PAUSE_PREFIX: u8 = 0xE1;

/// Break flag of a set 1 code.
pub const BREAK: u8 = 0x80;

/// Largest key position on the target keyboard.
pub const LAST_KEY: u8 = 0x50;

/// Extended codes that survive prefix stripping (make and break).
const EXTENDED_KEEP: [u8; 8] = [0x48, 0xC8, 0x4B, 0xCB, 0x4D, 0xCD, 0x50, 0xD0];

/// Key positions with no equivalent on the target keyboard.
const DISCARDED: &[u8] = &[
    15, // Tab
    27, // ]
    29, // Ctrl
    40, // '
    41, // `
    43, // \
    55, // Keypad *
    56, // Alt
    58, // Caps lock
    69, 70, 71, // Keypad
    73, 74, 76, 78, 79, //
    81, 82, 83, // Special keys
    85, 91, 92, 93,
];

const KEYPAD_SLASH: u8 = 54;
const SLASH: u8 = 42;

/// Blocking supply of follow-on scan code bytes.
pub trait ScanSource {
    fn next_scan_code(&mut self) -> Result<u8, Ps2Error>;
}

/// What happened to one raw code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// Enqueued for the host
    Key(u8),
    /// Valid, but the key code queue was full
    Dropped(u8),
    /// Filtered out
    Discarded,
}

pub struct ScanTranslator {
    discard: BitSet,
    keys: KeyCodeProducer,
}

impl ScanTranslator {
    pub fn new(keys: KeyCodeProducer) -> Self {
        let discard = DISCARDED.iter().map(|&code| code as usize).collect();
        Self { discard, keys }
    }

    /// Translates `code`, pulling follow-on bytes from `source` for prefixed
    /// sequences, and enqueues the result.
    pub fn process(
        &mut self,
        code: u8,
        source: &mut impl ScanSource,
    ) -> Result<Translation, Ps2Error> {
        let Some(key) = self.translate(code, source)? else {
            return Ok(Translation::Discarded);
        };
        match self.keys.push(key) {
            Ok(()) => {
                trace!("KEY: {key:02X}");
                Ok(Translation::Key(key))
            }
            Err(_) => {
                trace!("KEY: {key:02X} dropped, queue full");
                Ok(Translation::Dropped(key))
            }
        }
    }

    /// Translates `code` without enqueueing it.
    pub fn translate(&self, code: u8, source: &mut impl ScanSource) -> Result<Option<u8>, Ps2Error> {
        let code = match code {
            PAUSE_PREFIX => {
                let first = source.next_scan_code()?;
                let second = source.next_scan_code()?;
                trace!("SCAN: pause sequence E1 {first:02X} {second:02X} discarded");
                return Ok(None);
            }
            EXTENDED_PREFIX => {
                let code = source.next_scan_code()?;
                if !EXTENDED_KEEP.contains(&code) {
                    trace!("SCAN: extended E0 {code:02X} discarded");
                    return Ok(None);
                }
                code
            }
            code => code,
        };
        Ok(self.normalize(code))
    }

    /// Applies the discard table, the keypad "/" remap and the range check to
    /// a single-byte code.
    pub fn normalize(&self, code: u8) -> Option<u8> {
        let position = code & !BREAK;
        if self.discard.contains(position as usize) {
            return None;
        }
        let code = if position == KEYPAD_SLASH {
            (code & BREAK) | SLASH
        } else {
            code
        };
        if code & !BREAK > LAST_KEY || code == 0 {
            return None;
        }
        Some(code)
    }

    pub fn queued(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use hex_literal::hex;
    use rstest::rstest;

    use super::*;
    use crate::firmware::error::WaitPhase;
    use crate::firmware::queue::{self, KeyCodeConsumer, QUEUE_SIZE};

    impl ScanSource for VecDeque<u8> {
        fn next_scan_code(&mut self) -> Result<u8, Ps2Error> {
            self.pop_front()
                .ok_or(Ps2Error::Timeout(WaitPhase::Response))
        }
    }

    fn translator() -> (ScanTranslator, KeyCodeConsumer) {
        let (producer, consumer) = queue::channel::<QUEUE_SIZE>();
        (ScanTranslator::new(producer), consumer)
    }

    /// Runs the whole input through the translator the way the main loop
    /// does and returns what reached the key code queue.
    fn run(input: &[u8]) -> Vec<u8> {
        let (mut translator, mut keys) = translator();
        let mut source: VecDeque<u8> = input.iter().copied().collect();
        while let Some(code) = source.pop_front() {
            translator.process(code, &mut source).unwrap();
        }
        std::iter::from_fn(|| keys.pop()).collect()
    }

    #[rstest]
    #[case::pause_make(&hex!("e1 1d 45"))]
    #[case::pause_break(&hex!("e1 9d c5"))]
    #[case::pause_any(&hex!("e1 1d 1e"))]
    #[case::extended_enter(&hex!("e0 1c"))]
    #[case::extended_ctrl(&hex!("e0 1d"))]
    #[case::print_screen(&hex!("e0 2a e0 37"))]
    #[case::print_screen_break(&hex!("e0 b7 e0 aa"))]
    #[case::tab_make(&[0x0f])]
    #[case::tab_break(&[0x8f])]
    #[case::zero(&[0x00])]
    #[case::past_last(&[0x51])]
    #[case::past_last_break(&[0xd1])]
    #[case::ack(&[0xfa])]
    #[case::caps(&[0x3a, 0xba])]
    #[case::alt(&[0x38, 0xb8])]
    fn test_discarded(#[case] input: &[u8]) {
        assert_eq!(run(input), Vec::<u8>::new());
    }

    #[rstest]
    #[case::letter(&[0x1e], &[0x1e])]
    #[case::letter_break(&[0x9e], &[0x9e])]
    #[case::keypad_slash(&[0x36], &[0x2a])]
    #[case::keypad_slash_break(&[0xb6], &[0xaa])]
    #[case::up(&hex!("e0 48"), &[0x48])]
    #[case::down_break(&hex!("e0 d0"), &[0xd0])]
    #[case::left_right(&hex!("e0 4b e0 cb e0 4d e0 cd"), &hex!("4b cb 4d cd"))]
    #[case::last_key(&[0x50], &[0x50])]
    #[case::mixed(&hex!("1e e1 1d 45 e1 9d c5 9e 0f 10 e0 50 90"), &hex!("1e 9e 10 50 90"))]
    fn test_kept(#[case] input: &[u8], #[case] expected: &[u8]) {
        assert_eq!(run(input), expected);
    }

    #[test]
    fn test_normalize_table() {
        let (translator, _) = translator();
        for code in 0..=255u8 {
            let Some(key) = translator.normalize(code) else {
                continue;
            };
            assert!(key != 0);
            assert!(key & !BREAK <= LAST_KEY, "{code:02X} -> {key:02X}");
            assert_eq!(key & BREAK, code & BREAK);
            assert!(!DISCARDED.contains(&(key & !BREAK)));
        }
        assert_eq!(translator.normalize(0x0f), None);
        assert_eq!(translator.normalize(0x8f), None);
    }

    #[test]
    fn test_full_queue_drops() {
        let (mut translator, mut keys) = translator();
        let mut source = VecDeque::new();
        for _ in 0..QUEUE_SIZE {
            assert_eq!(
                translator.process(0x10, &mut source),
                Ok(Translation::Key(0x10))
            );
        }
        assert_eq!(
            translator.process(0x11, &mut source),
            Ok(Translation::Dropped(0x11))
        );
        assert_eq!(translator.queued(), QUEUE_SIZE);
        assert_eq!(keys.pop(), Some(0x10));
    }

    #[test]
    fn test_truncated_sequence_times_out() {
        let (mut translator, _keys) = translator();
        let mut source: VecDeque<u8> = [0x1d].into_iter().collect();
        assert_eq!(
            translator.process(PAUSE_PREFIX, &mut source),
            Err(Ps2Error::Timeout(WaitPhase::Response))
        );
        let mut source = VecDeque::new();
        assert_eq!(
            translator.process(EXTENDED_PREFIX, &mut source),
            Err(Ps2Error::Timeout(WaitPhase::Response))
        );
    }
}
