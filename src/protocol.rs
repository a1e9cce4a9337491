//! Line protocol spoken by the Illuminate firmware.
//!
//! Every command is a single ASCII line terminated by `\n`. The firmware answers
//! with zero or more text lines followed by a line containing the terminator
//! `-==-`. The surrounding whitespace of the terminator is not consistent across
//! firmware releases (extra or missing CR/LF), so a paragraph ends at the first
//! line that *contains* the terminator once whitespace is stripped.
//!
//! Response conventions:
//! - the first line contains `ERROR` (any case) when the command failed
//! - the first line contains `not implemented yet` when the firmware lacks the command
//! - successful commands often append a confirmation number to the last line

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{DriverError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Substring marking the end of a response paragraph.
pub const PARAGRAPH_TERMINATOR: &str = "-==-";

/// Characters stripped from both ends of a line in clean mode (after whitespace).
const DECORATION_CHARS: [char; 3] = ['-', '=', ' '];

/// Upper bound on how long `discard_input` keeps draining.
const MAX_DISCARD_TIME: Duration = Duration::from_millis(200);

/// Trailing confirmation number: optional sign, digits, optional `.` and one decimal.
static TRAILING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d+\.?\d?$").expect("trailing number pattern is valid"));

// ============================================================================
// Transport Abstraction
// ============================================================================

/// Byte transport the protocol runs over.
///
/// Anything readable and writable qualifies: a `serialport` handle in
/// production, a scripted fake in tests. Reads are expected to fail with
/// `TimedOut`/`WouldBlock` (or return 0) when no data arrives in time.
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

/// Numeric confirmation extracted from a response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }
}

impl std::fmt::Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Number::Int(v) => write!(f, "{v}"),
            Number::Float(v) => write!(f, "{v}"),
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

// ============================================================================
// Link
// ============================================================================

/// Buffered command/response channel over a [`Transport`].
///
/// One command is in flight at a time; the protocol carries no request ids,
/// so callers must read the full paragraph of a command before sending the next.
pub struct Link {
    port: BufReader<Box<dyn Transport>>,
}

impl Link {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            port: BufReader::new(transport),
        }
    }

    /// Write raw bytes to the device.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.get_mut();
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    /// Write a command line, appending the `\n` terminator.
    pub fn write_command(&mut self, command: &str) -> Result<()> {
        debug!("-> {}", command);
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\n');
        self.write(&line)
    }

    /// Read up to `size` bytes, returning early on timeout.
    pub fn read(&mut self, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => break,
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Read one line including its newline.
    ///
    /// Returns whatever arrived before the transport timed out, which is the
    /// empty string when nothing arrived at all.
    pub fn readline(&mut self) -> Result<String> {
        let mut buf = Vec::with_capacity(64);
        match self.port.read_until(b'\n', &mut buf) {
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read lines until one contains the paragraph terminator.
    ///
    /// In raw mode every line is returned verbatim, terminator line included.
    /// Otherwise lines are cleaned with [`clean_line`] and empty results dropped,
    /// which also drops a bare terminator line.
    pub fn read_paragraph(&mut self, raw: bool) -> Result<Vec<String>> {
        self.read_paragraph_within(raw, Duration::ZERO)
    }

    /// Like [`read_paragraph`](Self::read_paragraph), but keeps waiting up to
    /// `busy` past the transport timeout for the first line.
    ///
    /// Commands such as `delay` or `rseq` stay silent until the firmware is done.
    pub fn read_paragraph_within(&mut self, raw: bool, busy: Duration) -> Result<Vec<String>> {
        let deadline = Instant::now() + busy;
        let mut paragraph = Vec::new();
        loop {
            let line = self.readline()?;
            if line.is_empty() {
                if paragraph.is_empty() && Instant::now() < deadline {
                    continue;
                }
                return Err(DriverError::Timeout(format!(
                    "no response line before the paragraph terminator ({} lines read)",
                    paragraph.len()
                )));
            }
            let done = is_terminator(&line);
            if raw {
                paragraph.push(line);
            } else if let Some(clean) = clean_line(&line) {
                paragraph.push(clean.to_string());
            }
            if done {
                break;
            }
        }
        trace!("<- {:?}", paragraph);
        Ok(paragraph)
    }

    /// Send a command and return its numeric confirmation, if any.
    pub fn ask(&mut self, command: &str) -> Result<Option<Number>> {
        let paragraph = self.ask_text(command)?;
        Ok(extract_number(&paragraph))
    }

    /// Send a command and return its cleaned, error-checked paragraph.
    pub fn ask_text(&mut self, command: &str) -> Result<Vec<String>> {
        self.ask_text_within(command, Duration::ZERO)
    }

    /// Send a command the firmware needs up to `busy` to answer.
    ///
    /// On timeout the input is drained, so a late reply is not taken for the
    /// answer to the next command.
    pub fn ask_text_within(&mut self, command: &str, busy: Duration) -> Result<Vec<String>> {
        self.write_command(command)?;
        let paragraph = match self.read_paragraph_within(false, busy) {
            Ok(paragraph) => paragraph,
            Err(e @ DriverError::Timeout(_)) => {
                debug!("{command} timed out, discarding pending input");
                self.discard_input()?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        check_errors(&paragraph)?;
        Ok(paragraph)
    }

    /// Drop everything pending in the input buffers.
    pub fn discard_input(&mut self) -> Result<()> {
        let buffered = self.port.buffer().len();
        self.port.consume(buffered);

        let mut buf = [0u8; 256];
        let start = Instant::now();
        loop {
            match self.port.get_mut().read(&mut buf) {
                Ok(0) => break,
                Ok(n) => trace!("discarded {} stale bytes", n),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => break,
                Err(e) => return Err(e.into()),
            }
            if start.elapsed() > MAX_DISCARD_TIME {
                break;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Response Interpretation
// ============================================================================

/// Whether a raw line ends a paragraph.
pub fn is_terminator(line: &str) -> bool {
    line.trim().contains(PARAGRAPH_TERMINATOR)
}

/// Strip whitespace, then `-`, `=` and spaces, from both ends of a line.
///
/// Returns `None` when nothing is left.
pub fn clean_line(line: &str) -> Option<&str> {
    let clean = line.trim().trim_matches(&DECORATION_CHARS[..]);
    (!clean.is_empty()).then_some(clean)
}

/// Fail when the paragraph reports a device error or an unimplemented command.
pub fn check_errors(paragraph: &[String]) -> Result<()> {
    let Some(first) = paragraph.first() else {
        return Ok(());
    };
    if first.to_uppercase().contains("ERROR") {
        return Err(DriverError::Device(paragraph.join("\n")));
    }
    if first.contains("not implemented yet") {
        return Err(DriverError::Unsupported(paragraph.join("\n")));
    }
    Ok(())
}

/// Extract the trailing number of the last line of a paragraph.
///
/// Only the tail of the last line is inspected; anything that does not end in
/// a number yields `None` rather than an error.
pub fn extract_number(paragraph: &[String]) -> Option<Number> {
    let last = paragraph.last()?;
    let found = TRAILING_NUMBER.find(last)?.as_str();
    if found.is_empty() {
        return None;
    }
    if found.contains('.') {
        found.parse().ok().map(Number::Float)
    } else {
        found.parse().ok().map(Number::Int)
    }
}
