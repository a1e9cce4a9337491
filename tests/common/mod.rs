//! Scripted stand-in for an Illuminate board.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use illuminate::{IlluminateConfig, Precision};

pub const TERMINATOR: &str = "-==-\n";

/// Knobs for how the fake board behaves.
#[derive(Debug, Clone)]
pub struct BoardSettings {
    pub version: String,
    pub led_count: usize,
    pub interface_bit_depth: u8,
    /// Number of `pp` replies sent truncated before a good one.
    pub garbled_parameters: u32,
    /// 1-based index of the `l.` command that fails.
    pub fail_led_command: Option<usize>,
    pub max_command_len: usize,
    /// `ac.` commands fail once an `l.` command has failed.
    pub fail_autoclear_after_led_failure: bool,
    /// `pledpos` answers with a device error.
    pub missing_led_positions: bool,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            version: "1.20.2".into(),
            led_count: 609,
            interface_bit_depth: 8,
            garbled_parameters: 0,
            fail_led_command: None,
            max_command_len: 64,
            fail_autoclear_after_led_failure: false,
            missing_led_positions: false,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    commands: Vec<String>,
    led_commands: usize,
    led_failed: bool,
}

/// What the test keeps to inspect the traffic.
#[derive(Clone)]
pub struct BoardHandle {
    shared: Arc<Mutex<Shared>>,
}

impl BoardHandle {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap()
    }

    /// Every command received so far, without the newline.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn forget_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn count(&self, command: &str) -> usize {
        self.lock().commands.iter().filter(|c| *c == command).count()
    }
}

pub struct FakeBoard {
    settings: BoardSettings,
    shared: Arc<Mutex<Shared>>,
    partial: Vec<u8>,
    pending: VecDeque<u8>,
    sequence_length: u64,
    /// Reply withheld while the board is busy, and when it is released.
    held: Option<(Instant, String)>,
    busy_for: Duration,
}

impl FakeBoard {
    pub fn new(settings: BoardSettings) -> (Self, BoardHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let board = Self {
            settings,
            shared: shared.clone(),
            partial: Vec::new(),
            pending: VecDeque::new(),
            sequence_length: 0,
            held: None,
            busy_for: Duration::ZERO,
        };
        (board, BoardHandle { shared })
    }

    fn parameters_json(&self) -> String {
        format!(
            concat!(
                "{{\"device_name\": \"fake-illuminate\", \"part_number\": 1001, ",
                "\"serial_number\": \"F00042\", \"led_count\": {}, \"bit_depth\": 16, ",
                "\"mac_address\": \"04:e9:e5:00:00:01\", \"interface_bit_depth\": {}}}"
            ),
            self.settings.led_count, self.settings.interface_bit_depth
        )
    }

    fn respond(&mut self, command: &str) -> String {
        let mut shared = self.shared.lock().unwrap();
        shared.commands.push(command.to_string());

        let mut fields = command.split('.');
        let name = fields.next().unwrap_or_default();
        let first_arg: u64 = fields.next().and_then(|v| v.parse().ok()).unwrap_or_default();
        match name {
            "reboot" => format!("Rebooting...\n{TERMINATOR}"),
            "version" => format!("{}\n{TERMINATOR}", self.settings.version),
            "pp" => {
                let json = self.parameters_json();
                if self.settings.garbled_parameters > 0 {
                    self.settings.garbled_parameters -= 1;
                    format!("{}\n{TERMINATOR}", &json[..json.len() / 2])
                } else {
                    format!("{json}\n{TERMINATOR}")
                }
            }
            "pledpos" if self.settings.missing_led_positions => {
                format!("ERROR: no LED positions stored\n{TERMINATOR}")
            }
            "pledpos" => format!(
                "{{\"led_position_list_cartesian\": {{\"0\": [0.0, 0.0, 50.0], \"1\": [4.0, 0.0, 50.0]}}}}\n{TERMINATOR}"
            ),
            "?" => format!("---- Help ----\nl.[led#].[led#]\n{TERMINATOR}"),
            "l" => {
                shared.led_commands += 1;
                if command.len() >= self.settings.max_command_len {
                    format!("ERROR: command too long ({} chars)\n{TERMINATOR}", command.len())
                } else if self.settings.fail_led_command == Some(shared.led_commands) {
                    shared.led_failed = true;
                    format!("ERROR: injected failure\n{TERMINATOR}")
                } else {
                    TERMINATOR.to_string()
                }
            }
            "ac" if self.settings.fail_autoclear_after_led_failure && shared.led_failed => {
                format!("ERROR: autoclear unavailable\n{TERMINATOR}")
            }
            "ssl" => {
                self.sequence_length = first_arg;
                format!(
                    "Set sequence length to {}\n{TERMINATOR}",
                    command.rsplit('.').next().unwrap_or_default()
                )
            }
            "delay" => {
                self.busy_for = Duration::from_millis(first_arg);
                format!("Delayed {first_arg} ms\n{TERMINATOR}")
            }
            "rseq" | "rseqf" => {
                self.busy_for = Duration::from_millis(first_arg * self.sequence_length);
                format!("Finished sequence\n{TERMINATOR}")
            }
            "bogus" => format!("ERROR: unknown command {command}\n{TERMINATOR}"),
            "future" => format!("Command {command} not implemented yet\n{TERMINATOR}"),
            _ => TERMINATOR.to_string(),
        }
    }
}

impl Read for FakeBoard {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some((ready_at, _)) = &self.held {
            if Instant::now() < *ready_at {
                thread::sleep(Duration::from_millis(1));
                return Err(io::Error::new(io::ErrorKind::TimedOut, "busy"));
            }
            if let Some((_, reply)) = self.held.take() {
                self.pending.extend(reply.into_bytes());
            }
        }
        if self.pending.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakeBoard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                let reply = self.respond(&line);
                let busy = std::mem::take(&mut self.busy_for);
                if busy.is_zero() {
                    self.pending.extend(reply.into_bytes());
                } else {
                    self.held = Some((Instant::now() + busy, reply));
                }
            } else {
                self.partial.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn test_config() -> IlluminateConfig {
    IlluminateConfig {
        json_retry_delay_ms: 1,
        precision: Precision::Bits(8),
        ..IlluminateConfig::default()
    }
}
