//! Client side mirror of the device state.
//!
//! The firmware can toggle autoclear and autoupdate but cannot report them,
//! nor can it report which LEDs are lit. The host is therefore the source of
//! truth: the mirror is reset deterministically whenever a session is opened
//! or the board rebooted, and only updated after the device acknowledged a
//! command.

use std::collections::BTreeSet;

use crate::color::{Color, WireColor};

/// Per-LED colors currently applied, indexed by LED number.
#[derive(Debug, Clone, PartialEq)]
pub struct LedStateGrid {
    data: Vec<Color>,
}

impl LedStateGrid {
    pub fn new(led_count: usize) -> Self {
        Self {
            data: vec![Color::OFF; led_count],
        }
    }

    pub fn data(&self) -> &[Color] {
        &self.data
    }

    pub fn get(&self, led: usize) -> Option<Color> {
        self.data.get(led).copied()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when every LED is off.
    pub fn is_dark(&self) -> bool {
        self.data.iter().all(|c| *c == Color::OFF)
    }

    fn zero(&mut self) {
        self.data.fill(Color::OFF);
    }

    fn paint(&mut self, leds: &[usize], color: Color) {
        for &led in leds {
            if let Some(slot) = self.data.get_mut(led) {
                *slot = color;
            }
        }
    }
}

/// Mirrored session state of one board.
#[derive(Debug, Clone)]
pub struct DeviceStateMirror {
    color: Color,
    wire_color: WireColor,
    leds: BTreeSet<usize>,
    led_state: LedStateGrid,
    autoclear: bool,
    /// `None` when the firmware has no autoupdate command.
    autoupdate: Option<bool>,
}

impl DeviceStateMirror {
    /// Fresh mirror matching a freshly booted board: dark, autoclear on,
    /// autoupdate on when supported.
    pub fn new(led_count: usize, autoupdate_supported: bool) -> Self {
        Self {
            color: Color::OFF,
            wire_color: [0; 3],
            leds: BTreeSet::new(),
            led_state: LedStateGrid::new(led_count),
            autoclear: true,
            autoupdate: autoupdate_supported.then_some(true),
        }
    }

    pub fn led_count(&self) -> usize {
        self.led_state.len()
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn wire_color(&self) -> WireColor {
        self.wire_color
    }

    pub fn leds(&self) -> &BTreeSet<usize> {
        &self.leds
    }

    pub fn led_state(&self) -> &LedStateGrid {
        &self.led_state
    }

    pub fn autoclear(&self) -> bool {
        self.autoclear
    }

    pub fn autoupdate(&self) -> Option<bool> {
        self.autoupdate
    }

    pub fn autoupdate_supported(&self) -> bool {
        self.autoupdate.is_some()
    }

    pub fn set_color(&mut self, color: Color, wire_color: WireColor) {
        self.color = color;
        self.wire_color = wire_color;
    }

    pub fn set_autoclear(&mut self, value: bool) {
        self.autoclear = value;
    }

    /// Record a new autoupdate value; ignored when unsupported.
    pub fn set_autoupdate(&mut self, value: bool) {
        if let Some(current) = self.autoupdate.as_mut() {
            *current = value;
        }
    }

    /// Merge newly lit LEDs into the mirror.
    ///
    /// With `force_clear` or autoclear the previous set is replaced and the
    /// grid zeroed first; otherwise the new LEDs are added on top of the old
    /// ones. Only `leds` receive the current color either way. Pass an empty
    /// slice to record a clear and the full index range to record a fill.
    pub fn update_leds(&mut self, leds: &[usize], force_clear: bool) {
        if force_clear || self.autoclear {
            self.led_state.zero();
            self.leds = leds.iter().copied().collect();
        } else {
            self.leds.extend(leds.iter().copied());
        }
        self.led_state.paint(leds, self.color);
    }
}
