//! Session configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::color::{Color, PowerBudget, Precision};
use crate::command::MAX_ARGUMENT_CHAR_COUNT;
use crate::errors::{DriverError, Result};

/// Default serial baud rate (ignored by the USB CDC firmware, kept for adapters).
pub const BAUD_RATE: u32 = 115_200;

/// Default read timeout for one response line.
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Attempts made when a JSON document arrives garbled.
pub const JSON_READ_ATTEMPTS: u32 = 10;

/// Base delay between JSON attempts; grows linearly with the attempt number.
pub const JSON_RETRY_DELAY_MS: u64 = 50;

/// Supply limit of the stock power brick, in amps.
pub const MAXIMUM_CURRENT_AMPS: f64 = 8.0;

/// Full scale current of one LED channel, in amps.
pub const LED_CURRENT_AMPS: f64 = 0.02;

/// How to find and drive a board.
///
/// Every field has a default, so a JSON file only needs the keys it changes:
///
/// ```json
/// { "serial_number": "0042", "precision": "float", "timeout_ms": 1000 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IlluminateConfig {
    /// Serial port path; discovered by VID/PID when unset.
    pub port: Option<String>,
    /// USB serial number of the board to open.
    pub serial_number: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// Reboot the board before use so its state matches the mirror.
    pub reboot_on_open: bool,
    /// Turn the array off when the session closes.
    pub clear_on_close: bool,
    pub precision: Precision,
    /// Color applied at open and after every reboot.
    pub initial_color: Color,
    pub max_argument_len: usize,
    /// Directory holding the per-board lock files (system temp dir when unset).
    pub lock_dir: Option<PathBuf>,
    pub maximum_current: f64,
    pub led_current_amps: f64,
    pub json_attempts: u32,
    pub json_retry_delay_ms: u64,
}

impl Default for IlluminateConfig {
    fn default() -> Self {
        Self {
            port: None,
            serial_number: None,
            baud_rate: BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            reboot_on_open: true,
            clear_on_close: true,
            precision: Precision::default(),
            initial_color: Color::gray(1.0),
            max_argument_len: MAX_ARGUMENT_CHAR_COUNT,
            lock_dir: None,
            maximum_current: MAXIMUM_CURRENT_AMPS,
            led_current_amps: LED_CURRENT_AMPS,
            json_attempts: JSON_READ_ATTEMPTS,
            json_retry_delay_ms: JSON_RETRY_DELAY_MS,
        }
    }
}

impl IlluminateConfig {
    /// Load a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            DriverError::Validation(format!("invalid config {}: {e}", path.display()))
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn json_retry_delay(&self) -> Duration {
        Duration::from_millis(self.json_retry_delay_ms)
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn power_budget(&self) -> PowerBudget {
        PowerBudget {
            maximum_current: self.maximum_current,
            led_current_amps: self.led_current_amps,
        }
    }
}
