//! Wire command formatting.
//!
//! Commands are `name[.arg]*` where every argument is a decimal integer.
//! Physical quantities are sent as fixed point integers (for example a
//! numerical aperture of 0.25 travels as `25`).

use std::fmt;
use std::ops::{Range, RangeInclusive};

use crate::errors::{DriverError, Result};

/// Maximum command length the firmware input buffer accepts reliably.
pub const MAX_ARGUMENT_CHAR_COUNT: usize = 64;

// Commands consumed by the session layer.
pub const CMD_CLEAR: &str = "x";
pub const CMD_FILL: &str = "ff";
pub const CMD_LED: &str = "l";
pub const CMD_SET_COLOR: &str = "sc";
pub const CMD_AUTOCLEAR: &str = "ac";
pub const CMD_AUTOUPDATE: &str = "au";
pub const CMD_UPDATE: &str = "u";
pub const CMD_REBOOT: &str = "reboot";
pub const CMD_VERSION: &str = "version";
pub const CMD_PARAMETERS: &str = "pp";
pub const CMD_LED_POSITIONS: &str = "pledpos";

/// A formatted ASCII command, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Append a `.`-separated argument.
    pub fn arg(mut self, value: impl fmt::Display) -> Self {
        self.0.push('.');
        self.0.push_str(&value.to_string());
        self
    }

    pub fn args<I, T>(self, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: fmt::Display,
    {
        values.into_iter().fold(self, |cmd, value| cmd.arg(value))
    }

    /// Append a float as a fixed point integer, `round(value * scale)`.
    pub fn fixed_point(self, value: f64, scale: f64) -> Self {
        self.arg((value * scale).round() as i64)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half of the array lit by differential phase contrast patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpcDirection {
    Top,
    Bottom,
    Left,
    Right,
}

impl DpcDirection {
    pub fn code(self) -> char {
        match self {
            DpcDirection::Top => 't',
            DpcDirection::Bottom => 'b',
            DpcDirection::Left => 'l',
            DpcDirection::Right => 'r',
        }
    }
}

impl std::str::FromStr for DpcDirection {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "t" | "top" => Ok(DpcDirection::Top),
            "b" | "bottom" => Ok(DpcDirection::Bottom),
            "l" | "left" => Ok(DpcDirection::Left),
            "r" | "right" => Ok(DpcDirection::Right),
            other => Err(DriverError::Validation(format!("unknown DPC direction {other:?}"))),
        }
    }
}

// ============================================================================
// LED Selection
// ============================================================================

/// LEDs accepted by the addressing API, normalized with [`LedSelection::into_indices`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LedSelection {
    #[default]
    None,
    Single(usize),
    List(Vec<usize>),
}

impl LedSelection {
    /// Flatten into an ordered list of indices.
    pub fn into_indices(self) -> Vec<usize> {
        match self {
            LedSelection::None => Vec::new(),
            LedSelection::Single(led) => vec![led],
            LedSelection::List(leds) => leds,
        }
    }
}

impl From<usize> for LedSelection {
    fn from(led: usize) -> Self {
        LedSelection::Single(led)
    }
}

impl From<Vec<usize>> for LedSelection {
    fn from(leds: Vec<usize>) -> Self {
        LedSelection::List(leds)
    }
}

impl From<&[usize]> for LedSelection {
    fn from(leds: &[usize]) -> Self {
        LedSelection::List(leds.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for LedSelection {
    fn from(leds: [usize; N]) -> Self {
        LedSelection::List(leds.to_vec())
    }
}

impl From<Range<usize>> for LedSelection {
    fn from(leds: Range<usize>) -> Self {
        LedSelection::List(leds.collect())
    }
}

impl From<RangeInclusive<usize>> for LedSelection {
    fn from(leds: RangeInclusive<usize>) -> Self {
        LedSelection::List(leds.collect())
    }
}

impl<T: Into<LedSelection>> From<Option<T>> for LedSelection {
    fn from(leds: Option<T>) -> Self {
        leds.map_or(LedSelection::None, Into::into)
    }
}

// ============================================================================
// LED Addressing
// ============================================================================

/// How an LED list travels to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedCommand {
    /// The whole list fits in one command.
    Single(Command),
    /// The list had to be split; chunks must be sent in order.
    Chunked(Vec<Command>),
}

/// Build `l.<i>.<i>...` for a list of LEDs.
pub fn led_command(leds: &[usize]) -> Command {
    Command::new(CMD_LED).args(leds)
}

/// Number of decimal digits of `n`.
pub fn digit_count(n: usize) -> usize {
    n.checked_ilog10().map_or(1, |d| d as usize + 1)
}

/// Plan the commands lighting `leds` without exceeding `max_len` characters.
///
/// Every chunk holds `(max_len - 2) / (1 + digits(max(leds)))` LEDs, which
/// keeps each `l.` command strictly below `max_len`. Order is preserved.
pub fn plan_led_command(leds: &[usize], max_len: usize) -> Result<LedCommand> {
    let single = led_command(leds);
    if single.len() < max_len {
        return Ok(LedCommand::Single(single));
    }

    let largest = leds.iter().copied().max().unwrap_or_default();
    let chars_per_led = 1 + digit_count(largest);
    let leds_per_chunk = max_len.saturating_sub(2) / chars_per_led;
    if leds_per_chunk == 0 {
        return Err(DriverError::Validation(format!(
            "LED index {largest} cannot fit in a {max_len} character command"
        )));
    }

    Ok(LedCommand::Chunked(
        leds.chunks(leds_per_chunk).map(led_command).collect(),
    ))
}
