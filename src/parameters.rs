//! JSON documents printed by the firmware (`pp` and `pledpos`).

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::protocol::PARAGRAPH_TERMINATOR;

const DEFAULT_INTERFACE_BIT_DEPTH: u8 = 8;

/// System parameters reported by `pp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceParameters {
    pub device_name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub part_number: String,
    #[serde(deserialize_with = "string_or_number")]
    pub serial_number: String,
    pub led_count: usize,
    pub bit_depth: u8,
    pub mac_address: String,
    /// Bit depth of the color values the command interface accepts.
    #[serde(default = "default_interface_bit_depth")]
    pub interface_bit_depth: u8,
    /// Everything else the firmware reports (NA, array distance, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_interface_bit_depth() -> u8 {
    DEFAULT_INTERFACE_BIT_DEPTH
}

// Older firmware prints serial and part numbers as bare integers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or a number, got {other}"
        ))),
    }
}

/// Cartesian position of one LED as reported by `pledpos`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedPosition {
    pub led: usize,
    pub x_mm: f64,
    pub y_mm: f64,
    pub z_cm: f64,
}

impl LedPosition {
    /// Position in meters, `[x, y, z]`.
    pub fn meters(&self) -> [f64; 3] {
        [self.x_mm / 1000.0, self.y_mm / 1000.0, self.z_cm / 100.0]
    }
}

#[derive(Deserialize)]
struct PositionTable {
    led_position_list_cartesian: BTreeMap<usize, [f64; 3]>,
}

/// Join a raw paragraph into the JSON text it carries, dropping the terminator.
pub fn json_text(raw_paragraph: &[String]) -> String {
    let mut text = String::new();
    for line in raw_paragraph {
        match line.find(PARAGRAPH_TERMINATOR) {
            Some(end) => {
                text.push_str(&line[..end]);
                break;
            }
            None => text.push_str(line),
        }
    }
    text
}

pub fn parse_parameters(text: &str) -> serde_json::Result<DeviceParameters> {
    serde_json::from_str(text)
}

/// Parse the position table, ordered by LED index.
pub fn parse_led_positions(text: &str) -> serde_json::Result<Vec<LedPosition>> {
    let table: PositionTable = serde_json::from_str(text)?;
    Ok(table
        .led_position_list_cartesian
        .into_iter()
        .map(|(led, [x_mm, y_mm, z_cm])| LedPosition {
            led,
            x_mm,
            y_mm,
            z_cm,
        })
        .collect())
}
