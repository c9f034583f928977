use std::path::PathBuf;

use clap::Parser;
use hex_literal::hex;
use tracing::{Level, info, warn};

use ps2spi::firmware::commands::{LockState, Typematic};
use ps2spi::firmware::translator::BREAK;
use ps2spi::firmware::{self, Config};
use ps2spi::host::logging::{setup_logging_file, setup_logging_stdio};
use ps2spi::host::script::{self, parse_hex_byte};
use ps2spi::machine::ps2_keyboard::KeyboardTiming;
use ps2spi::machine::{Board, BoardConfig};

/// Typed when no script is given: a few letters, the cursor keys, keypad
/// "/", and sequences that should never reach the host.
const DEMO_SCRIPT: [u8; 28] = hex!(
    "23 a3 12 92 26 a6 26 a6 18 98" // HELLO
    "e0 48 e0 c8 e0 50 e0 d0"       // Up, Down
    "36 b6"                         // Keypad /
    "0f 8f"                         // Tab
    "e1 1d 45 e1 9d c5"             // Pause
);

/// How long nothing has to happen before the run is considered finished.
const QUIET_US: u64 = 50_000;

/// PS/2 to SPI bridge simulator
/// Runs the bridge firmware against a simulated keyboard and SPI host
#[derive(Parser)]
#[command(name = "ps2spi")]
#[command(about = "Simulates a PS/2 keyboard to SPI bridge")]
struct Args {
    /// Scan code bytes to type, as hex ("1e 9e e0 48")
    #[arg(long, conflicts_with = "script")]
    keys: Option<String>,

    /// File of hex scan code bytes to type, '#' starts a comment
    #[arg(long)]
    script: Option<PathBuf>,

    /// Lock LED state to apply once running, parsed as hex (1=Scroll, 2=Num, 4=Caps)
    #[arg(long, value_parser = parse_hex_byte)]
    leds: Option<u8>,

    /// Byte the SPI host sends on every transfer, parsed as hex
    #[arg(long, value_parser = parse_hex_byte, default_value = "00")]
    host_command: u8,

    /// Typematic rate/delay byte, parsed as hex
    #[arg(long, value_parser = parse_hex_byte, default_value = "7f")]
    typematic: u8,

    /// Skip the LED walk at startup
    #[arg(long)]
    no_led_test: bool,

    /// Microseconds between SPI transfers
    #[arg(long, default_value_t = 500)]
    poll_interval_us: u32,

    /// Delay before configuring the keyboard, in milliseconds
    #[arg(long, default_value_t = 1000)]
    self_test_delay_ms: u32,

    /// Simulated keyboard self test duration, in milliseconds
    #[arg(long, default_value_t = 500)]
    keyboard_self_test_ms: u32,

    /// Bound on waiting for a keyboard reply, in milliseconds
    #[arg(long, default_value_t = 100)]
    response_timeout_ms: u32,

    /// Give up after this many simulated milliseconds
    #[arg(long, default_value_t = 10_000)]
    max_ms: u64,

    /// Write the log to a file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn millis_to_us(ms: u32) -> u32 {
    ms.saturating_mul(1000)
}

impl Args {
    fn config(&self) -> Config {
        Config {
            response_timeout_us: millis_to_us(self.response_timeout_ms),
            self_test_delay_us: millis_to_us(self.self_test_delay_ms),
            led_test: !self.no_led_test,
            typematic: Typematic::from_raw(self.typematic),
            ..Config::default()
        }
    }

    fn board_config(&self) -> BoardConfig {
        BoardConfig {
            keyboard: KeyboardTiming {
                self_test_us: millis_to_us(self.keyboard_self_test_ms),
                ..KeyboardTiming::default()
            },
            spi_poll_interval_us: self.poll_interval_us,
            host_command: self.host_command,
            ..BoardConfig::default()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::TRACE
    } else {
        Level::INFO
    };
    match &args.log_file {
        Some(path) => setup_logging_file(level, path)?,
        None => setup_logging_stdio(level),
    }

    let typed = if let Some(keys) = &args.keys {
        script::parse(keys)?
    } else if let Some(path) = &args.script {
        info!("Script file: {:?}", path);
        script::load(path)?
    } else {
        info!("No script given, typing the demo sequence");
        DEMO_SCRIPT.to_vec()
    };

    let config = args.config();
    let board_config = args.board_config();

    info!("PS/2 to SPI bridge starting...");
    let (mut bridge, interrupts) = firmware::build(config);
    let mut board = Board::new(board_config, interrupts);
    bridge.start(&mut board)?;
    info!("Started at {}us", board.now());

    if let Some(leds) = args.leds {
        bridge.lock_indicators().set(LockState::new(leds));
    }
    info!("Typing {} scan code bytes", typed.len());
    board.keyboard_mut().type_bytes(&typed);

    if !board.run_until_quiet(&mut bridge, QUIET_US, args.max_ms.saturating_mul(1000)) {
        warn!("Still busy after {}ms, stopping", args.max_ms);
    }

    for &key in board.host().received() {
        let kind = if key & BREAK != 0 { "break" } else { "make" };
        info!("Host received {key:02X} ({kind} {:02X})", key & !BREAK);
    }

    let stats = bridge.stats();
    info!("Finished at {}us", board.now());
    info!("SPI transfers: {}", board.host().exchanges());
    info!("Key codes: {} sent, {} dropped", stats.keys, stats.dropped);
    info!("Scan codes discarded: {}", stats.discarded);
    info!(
        "Receive errors: {}, timeouts: {}",
        stats.receive_errors, stats.timeouts
    );
    info!(
        "Keyboard LEDs: {:?}, last host command: {:02X}",
        LockState::new(board.keyboard().leds()),
        bridge.host_command()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = Args::try_parse_from(["ps2spi"]).unwrap();
        let config = args.config();
        assert_eq!(config.response_timeout_us, 100_000);
        assert_eq!(config.self_test_delay_us, 1_000_000);
        assert!(config.led_test);
        assert_eq!(config.typematic, Typematic::SLOWEST);
        let board = args.board_config();
        assert_eq!(board.keyboard.self_test_us, 500_000);
        assert_eq!(board.spi_poll_interval_us, 500);
        assert_eq!(board.host_command, 0x00);
    }

    #[test]
    fn test_huge_durations_saturate() {
        let args = Args::try_parse_from([
            "ps2spi",
            "--response-timeout-ms",
            "5000000",
            "--self-test-delay-ms",
            "4294967295",
            "--keyboard-self-test-ms",
            "5000000",
            "--host-command",
            "5a",
            "--no-led-test",
        ])
        .unwrap();
        let config = args.config();
        assert_eq!(config.response_timeout_us, u32::MAX);
        assert_eq!(config.self_test_delay_us, u32::MAX);
        assert!(!config.led_test);
        let board = args.board_config();
        assert_eq!(board.keyboard.self_test_us, u32::MAX);
        assert_eq!(board.host_command, 0x5A);
    }
}
