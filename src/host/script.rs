//! Scan code scripts: whitespace-separated hex bytes, `#` to end of line is a
//! comment.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum ScriptError {
    Io(io::Error),
    BadByte { line: usize, token: String },
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Io(e) => write!(f, "failed to read script: {e}"),
            ScriptError::BadByte { line, token } => {
                write!(f, "line {line}: {token:?} is not a hex byte")
            }
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScriptError::Io(e) => Some(e),
            ScriptError::BadByte { .. } => None,
        }
    }
}

impl From<io::Error> for ScriptError {
    fn from(e: io::Error) -> Self {
        ScriptError::Io(e)
    }
}

/// Parses one hex byte, with or without a `0x` prefix.
pub fn parse_hex_byte(s: &str) -> Result<u8, std::num::ParseIntError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16)
}

pub fn parse(text: &str) -> Result<Vec<u8>, ScriptError> {
    let mut bytes = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default();
        for token in line.split_whitespace() {
            let byte = parse_hex_byte(token).map_err(|_| ScriptError::BadByte {
                line: i + 1,
                token: token.to_owned(),
            })?;
            bytes.push(byte);
        }
    }
    Ok(bytes)
}

pub fn load(path: &Path) -> Result<Vec<u8>, ScriptError> {
    parse(&fs::read_to_string(path)?)
}
