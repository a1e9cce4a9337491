//! Color representation and scaling between user units and wire units.
//!
//! The firmware drives every channel with an `interface_bit_depth` integer.
//! Callers work in "user units" chosen by a precision setting:
//!
//! - `Precision::Bits(p)`: values in `[0, 2^p - 1]`
//! - `Precision::Float`: values in `[0, 1]`
//!
//! Wire values are `round(user * scale_factor)` with
//! `scale_factor = (2^interface_bit_depth - 1) / (2^p - 1)` (or
//! `2^interface_bit_depth - 1` in float mode), clamped to the wire range.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{DriverError, Result};

/// Largest interface bit depth the wire encoding supports.
pub const MAX_INTERFACE_BIT_DEPTH: u8 = 16;

/// Integer channel values as transmitted to the device.
pub type WireColor = [u32; 3];

/// An RGB color in user units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl Color {
    pub const OFF: Color = Color::new(0.0, 0.0, 0.0);

    pub const fn new(red: f64, green: f64, blue: f64) -> Self {
        Self { red, green, blue }
    }

    /// All three channels set to `value`.
    pub const fn gray(value: f64) -> Self {
        Self::new(value, value, value)
    }

    pub fn channels(self) -> [f64; 3] {
        [self.red, self.green, self.blue]
    }

    pub fn is_gray(self) -> bool {
        self.red == self.green && self.green == self.blue
    }

    /// The common channel value, only defined when all channels are equal.
    pub fn brightness(self) -> Result<f64> {
        if self.is_gray() {
            Ok(self.red)
        } else {
            Err(DriverError::AmbiguousBrightness(self.to_string()))
        }
    }

    /// Intensity of the 940 nm IR emitter, driven by the red and green channels.
    pub fn ir_940(self) -> f64 {
        (self.red + self.green) / 2.0
    }

    /// Intensity of the 850 nm IR emitter, driven by the blue channel.
    pub fn ir_850(self) -> f64 {
        self.blue
    }

    pub const fn from_ir_940(value: f64) -> Self {
        Self::new(value, value, 0.0)
    }

    pub const fn from_ir_850(value: f64) -> Self {
        Self::new(0.0, 0.0, value)
    }
}

impl From<f64> for Color {
    fn from(value: f64) -> Self {
        Color::gray(value)
    }
}

impl From<(f64, f64, f64)> for Color {
    fn from((red, green, blue): (f64, f64, f64)) -> Self {
        Color::new(red, green, blue)
    }
}

impl From<[f64; 3]> for Color {
    fn from([red, green, blue]: [f64; 3]) -> Self {
        Color::new(red, green, blue)
    }
}

impl From<Color> for (f64, f64, f64) {
    fn from(c: Color) -> Self {
        (c.red, c.green, c.blue)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.red, self.green, self.blue)
    }
}

// ============================================================================
// Precision
// ============================================================================

/// Unit convention for user facing color values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PrecisionRepr", into = "PrecisionRepr")]
pub enum Precision {
    /// Integer values with the given bit depth.
    Bits(u8),
    /// Continuous values normalized to `[0, 1]`.
    Float,
}

impl Precision {
    /// Reject bit depths no interface can carry, before talking to a board.
    pub fn check(self) -> Result<()> {
        match self {
            Precision::Bits(bits) if bits == 0 || bits > MAX_INTERFACE_BIT_DEPTH => {
                Err(DriverError::Validation(format!(
                    "precision must be 1..={MAX_INTERFACE_BIT_DEPTH} bits, got {bits}"
                )))
            }
            _ => Ok(()),
        }
    }
}

impl Default for Precision {
    fn default() -> Self {
        Precision::Bits(8)
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Bits(bits) => write!(f, "{bits}"),
            Precision::Float => f.write_str("float"),
        }
    }
}

impl FromStr for Precision {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("float") {
            return Ok(Precision::Float);
        }
        s.parse::<u8>()
            .map(Precision::Bits)
            .map_err(|_| DriverError::Validation(format!("invalid precision {s:?}")))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PrecisionRepr {
    Bits(u8),
    Name(String),
}

impl TryFrom<PrecisionRepr> for Precision {
    type Error = DriverError;

    fn try_from(repr: PrecisionRepr) -> Result<Self> {
        match repr {
            PrecisionRepr::Bits(bits) => Ok(Precision::Bits(bits)),
            PrecisionRepr::Name(name) => name.parse(),
        }
    }
}

impl From<Precision> for PrecisionRepr {
    fn from(p: Precision) -> Self {
        match p {
            Precision::Bits(bits) => PrecisionRepr::Bits(bits),
            Precision::Float => PrecisionRepr::Name("float".into()),
        }
    }
}

// ============================================================================
// Scaling
// ============================================================================

/// Conversion between user units and device units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    interface_bit_depth: u8,
    precision: Precision,
    scale_factor: f64,
}

impl ColorScale {
    /// Validate the precision against the device interface bit depth.
    pub fn new(interface_bit_depth: u8, precision: Precision) -> Result<Self> {
        if interface_bit_depth == 0 || interface_bit_depth > MAX_INTERFACE_BIT_DEPTH {
            return Err(DriverError::Validation(format!(
                "interface bit depth {interface_bit_depth} outside 1..={MAX_INTERFACE_BIT_DEPTH}"
            )));
        }
        let max_wire = f64::from(max_for_bits(interface_bit_depth));
        let scale_factor = match precision {
            Precision::Bits(0) => {
                return Err(DriverError::Validation("precision must be at least 1 bit".into()))
            }
            Precision::Bits(bits) if bits > interface_bit_depth => {
                return Err(DriverError::Validation(format!(
                    "precision of {bits} bits exceeds the interface bit depth of {interface_bit_depth}"
                )))
            }
            Precision::Bits(bits) => max_wire / f64::from(max_for_bits(bits)),
            Precision::Float => max_wire,
        };
        Ok(Self {
            interface_bit_depth,
            precision,
            scale_factor,
        })
    }

    pub fn interface_bit_depth(&self) -> u8 {
        self.interface_bit_depth
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Largest integer the device accepts for one channel.
    pub fn max_wire_value(&self) -> u32 {
        max_for_bits(self.interface_bit_depth)
    }

    /// Largest user value for one channel.
    pub fn maximum_value(&self) -> f64 {
        match self.precision {
            Precision::Bits(bits) => f64::from(max_for_bits(bits)),
            Precision::Float => 1.0,
        }
    }

    /// Convert to wire units; the flag reports whether any channel was clamped.
    pub fn to_wire(&self, color: Color) -> Result<(WireColor, bool)> {
        let max = self.max_wire_value();
        let mut clamped = false;
        let mut wire = [0u32; 3];
        for (out, value) in wire.iter_mut().zip(color.channels()) {
            if value.is_nan() {
                return Err(DriverError::Validation(format!("color {color} has a NaN channel")));
            }
            let scaled = (value * self.scale_factor).round();
            *out = if scaled < 0.0 {
                clamped = true;
                0
            } else if scaled > f64::from(max) {
                clamped = true;
                max
            } else {
                scaled as u32
            };
        }
        Ok((wire, clamped))
    }

    pub fn to_user(&self, wire: WireColor) -> Color {
        let [r, g, b] = wire.map(|v| f64::from(v) / self.scale_factor);
        Color::new(r, g, b)
    }
}

fn max_for_bits(bits: u8) -> u32 {
    ((1u64 << bits) - 1) as u32
}

// ============================================================================
// Power Budget
// ============================================================================

/// Current limits used to cap brightness when many LEDs are lit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerBudget {
    /// Supply limit in amps.
    pub maximum_current: f64,
    /// Current drawn by one channel of one LED at full brightness, in amps.
    pub led_current_amps: f64,
}

/// Brightest color with the hue of `ratio` that keeps `num_leds` within budget.
///
/// The ratio is normalized so its largest channel is full scale, then scaled
/// down uniformly until the total current fits the supply.
pub fn max_brightness(
    ratio: Color,
    num_leds: usize,
    budget: PowerBudget,
    maximum_value: f64,
) -> Result<Color> {
    let channels = ratio.channels();
    if channels.iter().any(|c| *c < 0.0 || c.is_nan()) {
        return Err(DriverError::Validation(format!("color ratio {ratio} must be non-negative")));
    }
    let peak = channels.iter().copied().fold(0.0, f64::max);
    if peak <= 0.0 {
        return Err(DriverError::Validation("color ratio cannot be all zero".into()));
    }

    let normalized = channels.map(|c| c / peak);
    let current_per_led = budget.led_current_amps * normalized.iter().sum::<f64>();
    let total_current = current_per_led * num_leds as f64;
    let scale = if total_current > 0.0 {
        (budget.maximum_current / total_current).min(1.0)
    } else {
        1.0
    };

    Ok(Color::from(normalized.map(|c| c * scale * maximum_value)))
}
