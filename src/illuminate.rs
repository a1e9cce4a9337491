//! Illuminate LED array session.
//!
//! An [`Illuminate`] owns one board: the serial link, the cross-process lock
//! and the client side mirror of everything the firmware cannot report back
//! (current color, lit LEDs, autoclear/autoupdate flags).
//!
//! # Lifecycle
//!
//! `open` resolves the board, locks it, optionally reboots it and then
//! drives it into a known state (autoclear on, autoupdate on when the
//! firmware has it, initial color, cleared). From there on the mirror is
//! only updated after the device acknowledged a command, so a failed command
//! never leaves the mirror ahead of the hardware.
//!
//! # Long LED lists
//!
//! The firmware input buffer holds `MAX_ARGUMENT_CHAR_COUNT` characters.
//! Longer `l.` commands are split into chunks that are sent with automatic
//! clearing and updating suspended, so the array shows the whole list at
//! once. The flags are restored even when a chunk fails.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::color::{max_brightness, Color, ColorScale, Precision, WireColor};
use crate::command::{
    plan_led_command, Command, DpcDirection, LedCommand, LedSelection, CMD_AUTOCLEAR,
    CMD_AUTOUPDATE, CMD_CLEAR, CMD_FILL, CMD_LED_POSITIONS, CMD_PARAMETERS, CMD_REBOOT,
    CMD_SET_COLOR, CMD_UPDATE, CMD_VERSION,
};
use crate::config::IlluminateConfig;
use crate::discovery;
use crate::errors::{DriverError, Result};
use crate::lock::DeviceLock;
use crate::parameters::{json_text, parse_led_positions, parse_parameters, DeviceParameters, LedPosition};
use crate::protocol::{check_errors, Link, Number, Transport};
use crate::state::{DeviceStateMirror, LedStateGrid};

// ============================================================================
// Constants
// ============================================================================

/// First firmware release with the `au`/`u` commands.
pub const AUTOUPDATE_MIN_VERSION: FirmwareVersion = FirmwareVersion::new(1, 12, 0);

/// Time the blink routines (`demo`, `water`, `disco`) keep the board busy.
const DEMO_SETTLE: Duration = Duration::from_secs(1);

/// Fixed point scale for numerical apertures and distances.
const FIXED_POINT_SCALE: f64 = 100.0;

const SEQUENCE_BIT_DEPTHS: [u8; 3] = [1, 8, 16];

// Pattern and sequence commands.
const CMD_NA: &str = "na";
const CMD_ARRAY_DISTANCE: &str = "sad";
const CMD_BRIGHTFIELD: &str = "bf";
const CMD_DARKFIELD: &str = "df";
const CMD_DPC: &str = "dpc";
const CMD_COLOR_DPC: &str = "cdpc";
const CMD_ANNULUS: &str = "an";
const CMD_HALF_ANNULUS: &str = "ha";
const CMD_QUADRANT: &str = "dq";
const CMD_HOLE: &str = "hole";
const CMD_CHANNEL: &str = "dc";
const CMD_SCAN_FULL: &str = "scf";
const CMD_SCAN_BRIGHTFIELD: &str = "scb";
const CMD_SEQUENCE_LENGTH: &str = "ssl";
const CMD_SEQUENCE_VALUE: &str = "ssv";
const CMD_RUN_SEQUENCE: &str = "rseq";
const CMD_RUN_SEQUENCE_FAST: &str = "rseqf";
const CMD_STEP_SEQUENCE: &str = "sseq";
const CMD_PRINT_SEQUENCE: &str = "pseq";
const CMD_PRINT_SEQUENCE_LENGTH: &str = "pseql";
const CMD_RESET_SEQUENCE: &str = "reseq";
const CMD_SEQUENCE_BIT_DEPTH: &str = "ssbd";
const CMD_TRIGGER: &str = "tr";
const CMD_TRIGGER_SETUP: &str = "trs";
const CMD_TRIGGER_PRINT: &str = "ptr";
const CMD_TRIGGER_TEST: &str = "trt";
const CMD_HELP: &str = "?";
const CMD_ABOUT: &str = "about";
const CMD_PRINT_VALUES: &str = "pvals";
const CMD_LED_POSITIONS_NA: &str = "pledposna";
const CMD_DEBUG: &str = "dbg";
const CMD_PIN_ORDER: &str = "spo";
const CMD_DELAY: &str = "delay";
const CMD_DISCO: &str = "disco";
const CMD_DEMO: &str = "demo";
const CMD_WATER: &str = "water";
const CMD_UV: &str = "uv";

static VERSION_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("version pattern is valid")
});

// ============================================================================
// Firmware Version
// ============================================================================

/// Firmware release, ordered so capability checks are plain comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FirmwareVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse the first `major.minor[.patch]` found in a version reply.
    pub fn parse(text: &str) -> Result<Self> {
        let caps = VERSION_NUMBER
            .captures(text)
            .ok_or_else(|| DriverError::Protocol(format!("no version number in {text:?}")))?;
        let part = |i: usize| -> Result<u32> {
            caps.get(i).map_or(Ok(0), |m| {
                m.as_str()
                    .parse()
                    .map_err(|_| DriverError::Protocol(format!("version part {:?} too large", m.as_str())))
            })
        };
        Ok(Self::new(part(1)?, part(2)?, part(3)?))
    }

    pub fn supports_autoupdate(&self) -> bool {
        *self >= AUTOUPDATE_MIN_VERSION
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ============================================================================
// Handshake helpers
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    fn from_config(config: &IlluminateConfig) -> Self {
        Self {
            attempts: config.json_attempts.max(1),
            delay: config.json_retry_delay(),
        }
    }
}

/// Ask for a JSON document, retrying while it arrives garbled.
///
/// Large documents occasionally lose bytes on the USB link. A device error is
/// returned at once; a parse failure is retried with a linearly growing delay
/// and reported as [`DriverError::Decode`] once the attempts are spent.
fn query_json<T>(
    link: &mut Link,
    command: &str,
    what: &'static str,
    retry: RetryPolicy,
    parse: fn(&str) -> serde_json::Result<T>,
) -> Result<T> {
    let mut attempt = 1;
    loop {
        link.write_command(command)?;
        let raw = link.read_paragraph(true)?;
        match parse(&json_text(&raw)) {
            Ok(value) => return Ok(value),
            Err(source) => {
                check_errors(&raw)?;
                if attempt >= retry.attempts {
                    return Err(DriverError::Decode {
                        what,
                        attempts: attempt,
                        source,
                    });
                }
                warn!("{what} garbled on attempt {attempt}/{}: {source}", retry.attempts);
                thread::sleep(retry.delay * attempt);
                link.discard_input()?;
                attempt += 1;
            }
        }
    }
}

fn query_version(link: &mut Link) -> Result<String> {
    let reply = link.ask_text(CMD_VERSION)?;
    reply
        .last()
        .map(|line| line.trim().to_string())
        .ok_or_else(|| DriverError::Protocol("empty version reply".into()))
}

fn reboot_link(link: &mut Link) -> Result<()> {
    info!("rebooting board");
    link.ask_text(CMD_REBOOT)?;
    Ok(())
}

fn closed() -> DriverError {
    DriverError::NotReady("session is closed".into())
}

// ============================================================================
// Session
// ============================================================================

/// An open Illuminate board.
pub struct Illuminate {
    link: Option<Link>,
    lock: Option<DeviceLock>,
    config: IlluminateConfig,
    version: String,
    firmware: FirmwareVersion,
    parameters: DeviceParameters,
    scale: ColorScale,
    state: DeviceStateMirror,
    led_positions: Option<Vec<LedPosition>>,
    numerical_aperture: Option<f64>,
    array_distance: Option<f64>,
    sequence_bit_depth: u8,
    sequence_length: usize,
}

impl Illuminate {
    /// Find, lock and initialize the board described by `config`.
    ///
    /// The lock is released again if anything after acquiring it fails.
    pub fn open(config: IlluminateConfig) -> Result<Self> {
        config.precision.check()?;
        let device = discovery::resolve(config.port.as_deref(), config.serial_number.as_deref())?;
        let lock = DeviceLock::acquire(&config.lock_dir(), device.lock_key())?;

        info!("opening illuminate on {}", device.port_name);
        let port = serialport::new(device.port_name.as_str(), config.baud_rate)
            .timeout(config.timeout())
            .open()?;

        let mut session = Self::handshake(Link::new(Box::new(port)), config)?;
        session.lock = Some(lock);
        Ok(session)
    }

    /// Initialize a session over an already open transport, without locking.
    pub fn with_transport<T: Transport + 'static>(transport: T, config: IlluminateConfig) -> Result<Self> {
        Self::handshake(Link::new(Box::new(transport)), config)
    }

    fn handshake(mut link: Link, config: IlluminateConfig) -> Result<Self> {
        config.precision.check()?;
        link.discard_input()?;
        if config.reboot_on_open {
            reboot_link(&mut link)?;
        }

        let version = query_version(&mut link)?;
        let firmware = FirmwareVersion::parse(&version)?;
        let parameters = query_json(
            &mut link,
            CMD_PARAMETERS,
            "device parameters",
            RetryPolicy::from_config(&config),
            parse_parameters,
        )?;
        let scale = ColorScale::new(parameters.interface_bit_depth, config.precision)?;
        let state = DeviceStateMirror::new(parameters.led_count, firmware.supports_autoupdate());

        info!(
            "connected to {} (serial {}, firmware {}, {} LEDs)",
            parameters.device_name, parameters.serial_number, firmware, parameters.led_count
        );

        let mut session = Self {
            link: Some(link),
            lock: None,
            config,
            version,
            firmware,
            parameters,
            scale,
            state,
            led_positions: None,
            numerical_aperture: None,
            array_distance: None,
            sequence_bit_depth: 8,
            sequence_length: 0,
        };
        session.initialize_state()?;
        Ok(session)
    }

    /// Drive the board into the state a fresh mirror describes.
    fn initialize_state(&mut self) -> Result<()> {
        self.state = DeviceStateMirror::new(self.parameters.led_count, self.firmware.supports_autoupdate());
        self.set_autoclear(true)?;
        if self.state.autoupdate_supported() {
            self.set_autoupdate(true)?;
        }
        self.set_color(self.config.initial_color)?;
        self.clear()
    }

    /// Clear the array (unless `clear_on_close` is off), then release the
    /// port and the lock.
    ///
    /// Safe to call more than once. The port and lock are released even
    /// when the final clear fails; that error is still returned.
    pub fn close(&mut self) -> Result<()> {
        if self.link.is_none() {
            return Ok(());
        }
        let cleared = if self.config.clear_on_close { self.clear() } else { Ok(()) };
        if let Err(e) = &cleared {
            warn!("could not clear the array while closing: {e}");
        }
        self.link = None;
        self.lock = None;
        info!("closed illuminate {}", self.parameters.serial_number);
        cleared
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn link(&mut self) -> Result<&mut Link> {
        self.link.as_mut().ok_or_else(closed)
    }

    fn send(&mut self, command: &Command) -> Result<Option<Number>> {
        self.link()?.ask(command.as_str())
    }

    fn send_text(&mut self, command: &Command) -> Result<Vec<String>> {
        self.link()?.ask_text(command.as_str())
    }

    /// Send a command the firmware only answers after working for `busy`.
    fn send_busy(&mut self, command: &Command, busy: Duration) -> Result<Vec<String>> {
        self.link()?.ask_text_within(command.as_str(), busy)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    // ------------------------------------------------------------------------
    // Raw access
    // ------------------------------------------------------------------------

    /// Send a raw command and return its numeric confirmation.
    pub fn ask(&mut self, command: &str) -> Result<Option<Number>> {
        self.link()?.ask(command)
    }

    /// Send a raw command and return its cleaned reply.
    pub fn ask_text(&mut self, command: &str) -> Result<Vec<String>> {
        self.link()?.ask_text(command)
    }

    /// Write bytes without reading a reply.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.link()?.write(data)
    }

    pub fn read_paragraph(&mut self, raw: bool) -> Result<Vec<String>> {
        self.link()?.read_paragraph(raw)
    }

    pub fn readline(&mut self) -> Result<String> {
        self.link()?.readline()
    }

    // ------------------------------------------------------------------------
    // Device information
    // ------------------------------------------------------------------------

    /// Version string reported at open.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn firmware_version(&self) -> FirmwareVersion {
        self.firmware
    }

    pub fn parameters(&self) -> &DeviceParameters {
        &self.parameters
    }

    pub fn led_count(&self) -> usize {
        self.parameters.led_count
    }

    pub fn device_name(&self) -> &str {
        &self.parameters.device_name
    }

    pub fn part_number(&self) -> &str {
        &self.parameters.part_number
    }

    pub fn serial_number(&self) -> &str {
        &self.parameters.serial_number
    }

    pub fn mac_address(&self) -> &str {
        &self.parameters.mac_address
    }

    pub fn bit_depth(&self) -> u8 {
        self.parameters.bit_depth
    }

    pub fn interface_bit_depth(&self) -> u8 {
        self.scale.interface_bit_depth()
    }

    pub fn precision(&self) -> Precision {
        self.scale.precision()
    }

    /// Largest value of one color channel in user units.
    pub fn color_maximum_value(&self) -> f64 {
        self.scale.maximum_value()
    }

    /// LED coordinates, fetched on first use.
    pub fn led_positions(&mut self) -> Result<&[LedPosition]> {
        if self.led_positions.is_none() {
            let retry = self.retry_policy();
            let positions = query_json(
                self.link()?,
                CMD_LED_POSITIONS,
                "LED positions",
                retry,
                parse_led_positions,
            )?;
            debug!("loaded {} LED positions", positions.len());
            self.led_positions = Some(positions);
        }
        Ok(self.led_positions.as_deref().unwrap_or_default())
    }

    /// Reboot the board and restore the initial state.
    pub fn reboot(&mut self) -> Result<()> {
        reboot_link(self.link()?)?;
        self.numerical_aperture = None;
        self.array_distance = None;
        self.sequence_bit_depth = 8;
        self.sequence_length = 0;
        self.initialize_state()
    }

    pub fn help(&mut self) -> Result<Vec<String>> {
        self.send_text(&Command::new(CMD_HELP))
    }

    pub fn about(&mut self) -> Result<Vec<String>> {
        self.send_text(&Command::new(CMD_ABOUT))
    }

    /// Current values of the firmware's user settable parameters.
    pub fn print_values(&mut self) -> Result<Vec<String>> {
        self.send_text(&Command::new(CMD_PRINT_VALUES))
    }

    /// LED positions expressed as numerical apertures.
    pub fn led_positions_na(&mut self) -> Result<Vec<String>> {
        self.send_text(&Command::new(CMD_LED_POSITIONS_NA))
    }

    // ------------------------------------------------------------------------
    // Color
    // ------------------------------------------------------------------------

    /// Current color in user units, as the device applies it.
    pub fn color(&self) -> Color {
        self.state.color()
    }

    pub fn set_color(&mut self, color: impl Into<Color>) -> Result<()> {
        let wire = self.to_wire(color.into())?;
        self.send(&Command::new(CMD_SET_COLOR).args(wire))?;
        self.state.set_color(self.scale.to_user(wire), wire);
        Ok(())
    }

    /// Brightness of a gray color; fails when the channels differ.
    pub fn brightness(&self) -> Result<f64> {
        self.state.color().brightness()
    }

    pub fn set_brightness(&mut self, brightness: f64) -> Result<()> {
        self.set_color(Color::gray(brightness))
    }

    fn to_wire(&self, color: Color) -> Result<WireColor> {
        let (wire, clamped) = self.scale.to_wire(color)?;
        if clamped {
            warn!(
                "color {color} outside [0, {}], clamped to {wire:?} device units",
                self.scale.maximum_value()
            );
        }
        Ok(wire)
    }

    /// Intensity of the 940 nm IR emitters.
    pub fn color_940_ir(&self) -> f64 {
        self.color().ir_940()
    }

    pub fn set_color_940_ir(&mut self, value: f64) -> Result<()> {
        self.set_color(Color::from_ir_940(value))
    }

    /// Intensity of the 850 nm IR emitters.
    pub fn color_850_ir(&self) -> f64 {
        self.color().ir_850()
    }

    pub fn set_color_850_ir(&mut self, value: f64) -> Result<()> {
        self.set_color(Color::from_ir_850(value))
    }

    /// Brightest color keeping `num_leds` LEDs within the power budget.
    ///
    /// Defaults to every LED of the array and to the hue of the current color.
    pub fn find_max_brightness(&self, num_leds: Option<usize>, color_ratio: Option<Color>) -> Result<Color> {
        max_brightness(
            color_ratio.unwrap_or_else(|| self.color()),
            num_leds.unwrap_or(self.parameters.led_count),
            self.config.power_budget(),
            self.scale.maximum_value(),
        )
    }

    // ------------------------------------------------------------------------
    // LEDs
    // ------------------------------------------------------------------------

    /// LEDs the mirror considers lit.
    pub fn led(&self) -> &BTreeSet<usize> {
        self.state.leds()
    }

    pub fn set_led(&mut self, leds: impl Into<LedSelection>) -> Result<()> {
        self.turn_on_led(leds)
    }

    /// Light `leds` with the current color.
    ///
    /// With autoclear on the lit set becomes exactly `leds`, otherwise they
    /// are added to what is already lit. An empty selection clears the array
    /// under autoclear and does nothing otherwise.
    pub fn turn_on_led(&mut self, leds: impl Into<LedSelection>) -> Result<()> {
        let leds = leds.into().into_indices();
        if leds.is_empty() {
            return if self.state.autoclear() { self.clear() } else { Ok(()) };
        }
        self.check_leds(&leds)?;

        match plan_led_command(&leds, self.config.max_argument_len)? {
            LedCommand::Single(command) => {
                self.send(&command)?;
            }
            LedCommand::Chunked(chunks) => {
                debug!("splitting {} LEDs over {} commands", leds.len(), chunks.len());
                self.with_updates_suppressed(|session| {
                    for chunk in &chunks {
                        session.send(chunk)?;
                    }
                    Ok(())
                })?;
            }
        }

        self.state.update_leds(&leds, false);
        Ok(())
    }

    fn check_leds(&self, leds: &[usize]) -> Result<()> {
        let count = self.parameters.led_count;
        match leds.iter().find(|&&led| led >= count) {
            Some(led) => Err(DriverError::Validation(format!(
                "LED {led} out of range, the array has {count} LEDs"
            ))),
            None => Ok(()),
        }
    }

    /// Run `body` with autoclear and autoupdate off, restoring both afterwards.
    ///
    /// When autoclear was on the array is cleared once up front, so the
    /// chunks sent by `body` together replace what was lit. The flags are
    /// restored whether or not `body` succeeds; the explicit update is only
    /// issued on success.
    fn with_updates_suppressed<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let autoclear = self.state.autoclear();
        let autoupdate = self.state.autoupdate();

        let result = self.suppress_updates(autoclear).and_then(|()| body(self));
        let restored = self.restore_updates(autoclear, autoupdate);

        match (result, restored) {
            (Ok(()), Ok(())) if autoupdate == Some(true) => self.update(),
            (Ok(()), restored) => restored,
            (Err(e), Err(restore_err)) => {
                warn!("could not restore autoclear/autoupdate after a failed command: {restore_err}");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    fn suppress_updates(&mut self, clear_first: bool) -> Result<()> {
        if self.state.autoupdate_supported() {
            self.set_autoupdate(false)?;
        }
        if clear_first {
            self.send(&Command::new(CMD_CLEAR))?;
        }
        self.set_autoclear(false)
    }

    fn restore_updates(&mut self, autoclear: bool, autoupdate: Option<bool>) -> Result<()> {
        let autoclear_restored = self.set_autoclear(autoclear);
        let autoupdate_restored = match autoupdate {
            Some(enabled) => self.set_autoupdate(enabled),
            None => Ok(()),
        };
        autoclear_restored.and(autoupdate_restored)
    }

    /// Turn every LED off.
    pub fn clear(&mut self) -> Result<()> {
        self.send(&Command::new(CMD_CLEAR))?;
        self.state.update_leds(&[], true);
        Ok(())
    }

    /// Light every LED with the current color.
    pub fn fill_array(&mut self) -> Result<()> {
        self.send(&Command::new(CMD_FILL))?;
        let all: Vec<usize> = (0..self.parameters.led_count).collect();
        self.state.update_leds(&all, true);
        Ok(())
    }

    /// Every LED index of the array.
    pub fn all_leds(&self) -> Range<usize> {
        0..self.parameters.led_count
    }

    /// Light UV LED `index`. UV LEDs are numbered apart from the RGB ones
    /// and are not tracked by the mirror.
    pub fn turn_on_uv_led(&mut self, index: usize) -> Result<()> {
        self.send(&Command::new(CMD_UV).arg(index)).map(drop)
    }

    /// Per-LED colors as the mirror tracks them.
    pub fn led_state(&self) -> &LedStateGrid {
        self.state.led_state()
    }

    // ------------------------------------------------------------------------
    // Update flags
    // ------------------------------------------------------------------------

    pub fn autoclear(&self) -> bool {
        self.state.autoclear()
    }

    /// Whether each LED command clears the previous ones first.
    pub fn set_autoclear(&mut self, value: bool) -> Result<()> {
        self.send(&Command::new(CMD_AUTOCLEAR).arg(u8::from(value)))?;
        self.state.set_autoclear(value);
        Ok(())
    }

    pub fn autoupdate(&self) -> Result<bool> {
        self.state.autoupdate().ok_or_else(|| self.autoupdate_unsupported())
    }

    /// Whether the array shows every change immediately.
    pub fn set_autoupdate(&mut self, value: bool) -> Result<()> {
        if !self.state.autoupdate_supported() {
            return Err(self.autoupdate_unsupported());
        }
        self.send(&Command::new(CMD_AUTOUPDATE).arg(u8::from(value)))?;
        self.state.set_autoupdate(value);
        Ok(())
    }

    /// Push pending LED changes to the array.
    pub fn update(&mut self) -> Result<()> {
        if !self.state.autoupdate_supported() {
            return Err(self.autoupdate_unsupported());
        }
        self.send(&Command::new(CMD_UPDATE))?;
        Ok(())
    }

    fn autoupdate_unsupported(&self) -> DriverError {
        DriverError::Unsupported(format!(
            "autoupdate needs firmware {AUTOUPDATE_MIN_VERSION} or newer, board runs {}",
            self.firmware
        ))
    }

    // ------------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------------

    /// Numerical aperture last set through this session.
    pub fn numerical_aperture(&self) -> Option<f64> {
        self.numerical_aperture
    }

    pub fn set_numerical_aperture(&mut self, na: f64) -> Result<()> {
        check_na(na)?;
        self.send(&Command::new(CMD_NA).fixed_point(na, FIXED_POINT_SCALE))?;
        self.numerical_aperture = Some(na);
        Ok(())
    }

    /// Distance between the array and the sample in mm, as last set.
    pub fn array_distance(&self) -> Option<f64> {
        self.array_distance
    }

    pub fn set_array_distance(&mut self, distance_mm: f64) -> Result<()> {
        if !(distance_mm.is_finite() && distance_mm > 0.0) {
            return Err(DriverError::Validation(format!(
                "array distance must be positive, got {distance_mm}"
            )));
        }
        self.send(&Command::new(CMD_ARRAY_DISTANCE).fixed_point(distance_mm, FIXED_POINT_SCALE))?;
        self.array_distance = Some(distance_mm);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------------

    pub fn brightfield(&mut self) -> Result<()> {
        self.send(&Command::new(CMD_BRIGHTFIELD)).map(drop)
    }

    pub fn darkfield(&mut self) -> Result<()> {
        self.send(&Command::new(CMD_DARKFIELD)).map(drop)
    }

    /// Half of the brightfield disc.
    pub fn dpc(&mut self, direction: DpcDirection) -> Result<()> {
        self.send(&Command::new(CMD_DPC).arg(direction.code())).map(drop)
    }

    /// Color multiplexed DPC; uses the firmware colors when `color` is `None`.
    pub fn color_dpc(&mut self, color: Option<Color>) -> Result<()> {
        let command = self.with_optional_color(Command::new(CMD_COLOR_DPC), color)?;
        self.send(&command).map(drop)
    }

    pub fn annulus(&mut self, min_na: f64, max_na: f64) -> Result<()> {
        check_na_range(min_na, max_na)?;
        let command = Command::new(CMD_ANNULUS)
            .fixed_point(min_na, FIXED_POINT_SCALE)
            .fixed_point(max_na, FIXED_POINT_SCALE);
        self.send(&command).map(drop)
    }

    pub fn half_annulus(&mut self, direction: DpcDirection, min_na: f64, max_na: f64) -> Result<()> {
        check_na_range(min_na, max_na)?;
        let command = Command::new(CMD_HALF_ANNULUS)
            .arg(direction.code())
            .fixed_point(min_na, FIXED_POINT_SCALE)
            .fixed_point(max_na, FIXED_POINT_SCALE);
        self.send(&command).map(drop)
    }

    pub fn draw_quadrant(&mut self, color: Option<Color>) -> Result<()> {
        let command = self.with_optional_color(Command::new(CMD_QUADRANT), color)?;
        self.send(&command).map(drop)
    }

    pub fn draw_hole(&mut self, hole: usize) -> Result<()> {
        self.send(&Command::new(CMD_HOLE).arg(hole)).map(drop)
    }

    pub fn draw_channel(&mut self, channel: usize) -> Result<()> {
        self.send(&Command::new(CMD_CHANNEL).arg(channel)).map(drop)
    }

    fn with_optional_color(&self, command: Command, color: Option<Color>) -> Result<Command> {
        match color {
            Some(color) => Ok(command.args(self.to_wire(color)?)),
            None => Ok(command),
        }
    }

    // ------------------------------------------------------------------------
    // Scans
    // ------------------------------------------------------------------------

    /// Light every LED in turn; returns the firmware's report.
    pub fn scan_full(&mut self, delay: Option<Duration>) -> Result<Vec<String>> {
        let busy = repeated(delay.unwrap_or_default(), self.parameters.led_count);
        self.send_busy(&with_delay(Command::new(CMD_SCAN_FULL), delay), busy)
    }

    /// Light every brightfield LED in turn.
    pub fn scan_brightfield(&mut self, delay: Option<Duration>) -> Result<Vec<String>> {
        let busy = repeated(delay.unwrap_or_default(), self.parameters.led_count);
        self.send_busy(&with_delay(Command::new(CMD_SCAN_BRIGHTFIELD), delay), busy)
    }

    // ------------------------------------------------------------------------
    // Sequences and triggers
    // ------------------------------------------------------------------------

    pub fn set_sequence_length(&mut self, length: usize) -> Result<()> {
        self.send(&Command::new(CMD_SEQUENCE_LENGTH).arg(length))?;
        self.sequence_length = length;
        Ok(())
    }

    /// Sequence length last set through this session.
    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Append one sequence step lighting `entries`, values in device units.
    pub fn set_sequence_value(&mut self, entries: &[(usize, [u32; 3])]) -> Result<()> {
        let leds: Vec<usize> = entries.iter().map(|(led, _)| *led).collect();
        self.check_leds(&leds)?;
        let max = ((1u64 << self.sequence_bit_depth) - 1) as u32;
        if let Some((led, value)) = entries.iter().find(|(_, v)| v.iter().any(|c| *c > max)) {
            return Err(DriverError::Validation(format!(
                "value {value:?} of LED {led} exceeds the {}-bit sequence depth",
                self.sequence_bit_depth
            )));
        }
        let command = entries
            .iter()
            .fold(Command::new(CMD_SEQUENCE_VALUE), |cmd, (led, value)| cmd.arg(led).args(*value));
        self.send(&command).map(drop)
    }

    pub fn sequence_bit_depth(&self) -> u8 {
        self.sequence_bit_depth
    }

    pub fn set_sequence_bit_depth(&mut self, bits: u8) -> Result<()> {
        if !SEQUENCE_BIT_DEPTHS.contains(&bits) {
            return Err(DriverError::Validation(format!(
                "sequence bit depth must be one of {SEQUENCE_BIT_DEPTHS:?}, got {bits}"
            )));
        }
        self.send(&Command::new(CMD_SEQUENCE_BIT_DEPTH).arg(bits))?;
        self.sequence_bit_depth = bits;
        Ok(())
    }

    /// Play the stored sequence with `delay` between steps.
    ///
    /// Blocks until the firmware has stepped through the whole sequence.
    pub fn run_sequence(&mut self, delay: Duration, trigger_modes: &[u32]) -> Result<Vec<String>> {
        let command = Command::new(CMD_RUN_SEQUENCE)
            .arg(delay.as_millis())
            .args(trigger_modes);
        self.send_busy(&command, repeated(delay, self.sequence_length))
    }

    /// Play the stored sequence through the parallel IO path.
    pub fn run_sequence_fast(&mut self, delay: Duration, trigger_modes: &[u32]) -> Result<Vec<String>> {
        let command = Command::new(CMD_RUN_SEQUENCE_FAST)
            .arg(delay.as_millis())
            .args(trigger_modes);
        self.send_busy(&command, repeated(delay, self.sequence_length))
    }

    pub fn step_sequence(&mut self, trigger_modes: &[u32]) -> Result<()> {
        self.send(&Command::new(CMD_STEP_SEQUENCE).args(trigger_modes)).map(drop)
    }

    pub fn print_sequence(&mut self) -> Result<Vec<String>> {
        self.send_text(&Command::new(CMD_PRINT_SEQUENCE))
    }

    pub fn print_sequence_length(&mut self) -> Result<Option<Number>> {
        self.send(&Command::new(CMD_PRINT_SEQUENCE_LENGTH))
    }

    pub fn reset_sequence(&mut self) -> Result<()> {
        self.send(&Command::new(CMD_RESET_SEQUENCE)).map(drop)
    }

    /// Pulse trigger output `index`.
    pub fn trigger(&mut self, index: usize) -> Result<()> {
        self.send(&Command::new(CMD_TRIGGER).arg(index)).map(drop)
    }

    pub fn trigger_setup(&mut self, index: usize, pin: u32, delay: Duration) -> Result<()> {
        let command = Command::new(CMD_TRIGGER_SETUP)
            .arg(index)
            .arg(pin)
            .arg(delay.as_micros());
        self.send(&command).map(drop)
    }

    pub fn trigger_print(&mut self) -> Result<Vec<String>> {
        self.send_text(&Command::new(CMD_TRIGGER_PRINT))
    }

    /// Wait up to `wait` for the firmware to report pulses on trigger input `index`.
    pub fn trigger_test(&mut self, index: usize, wait: Duration) -> Result<Vec<String>> {
        self.send_busy(&Command::new(CMD_TRIGGER_TEST).arg(index), wait)
    }

    // ------------------------------------------------------------------------
    // Miscellaneous
    // ------------------------------------------------------------------------

    /// Toggle firmware debug output, or flip it when `value` is `None`.
    pub fn debug(&mut self, value: Option<bool>) -> Result<()> {
        let command = match value {
            Some(on) => Command::new(CMD_DEBUG).arg(u8::from(on)),
            None => Command::new(CMD_DEBUG),
        };
        self.send(&command).map(drop)
    }

    /// Map the color channels onto driver pins, for all LEDs or just `led`.
    pub fn set_pin_order(&mut self, red: u32, green: u32, blue: u32, led: Option<usize>) -> Result<()> {
        let mut command = Command::new(CMD_PIN_ORDER);
        if let Some(led) = led {
            self.check_leds(&[led])?;
            command = command.arg(led);
        }
        self.send(&command.args([red, green, blue])).map(drop)
    }

    /// Have the firmware pause for `delay`.
    pub fn delay(&mut self, delay: Duration) -> Result<()> {
        self.send_busy(&Command::new(CMD_DELAY).arg(delay.as_millis()), delay)
            .map(drop)
    }

    pub fn discoparty(&mut self, steps: usize) -> Result<()> {
        self.run_demo(Command::new(CMD_DISCO).arg(steps))
    }

    pub fn demo(&mut self) -> Result<()> {
        self.run_demo(Command::new(CMD_DEMO))
    }

    pub fn water_drop_demo(&mut self) -> Result<()> {
        self.run_demo(Command::new(CMD_WATER))
    }

    fn run_demo(&mut self, command: Command) -> Result<()> {
        let link = self.link()?;
        link.write_command(command.as_str())?;
        thread::sleep(DEMO_SETTLE);
        let reply = link.read_paragraph(false)?;
        check_errors(&reply)?;
        // The routines leave the array dark.
        self.state.update_leds(&[], true);
        Ok(())
    }
}

impl fmt::Debug for Illuminate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Illuminate")
            .field("device_name", &self.parameters.device_name)
            .field("serial_number", &self.parameters.serial_number)
            .field("firmware", &self.firmware)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for Illuminate {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("error while closing on drop: {e}");
        }
    }
}

/// `step` once per item, saturating.
fn repeated(step: Duration, count: usize) -> Duration {
    step.saturating_mul(u32::try_from(count).unwrap_or(u32::MAX))
}

fn with_delay(command: Command, delay: Option<Duration>) -> Command {
    match delay {
        Some(delay) => command.arg(delay.as_millis()),
        None => command,
    }
}

fn check_na(na: f64) -> Result<()> {
    if (0.0..=1.0).contains(&na) {
        Ok(())
    } else {
        Err(DriverError::Validation(format!("numerical aperture {na} outside [0, 1]")))
    }
}

fn check_na_range(min_na: f64, max_na: f64) -> Result<()> {
    check_na(min_na)?;
    check_na(max_na)?;
    if min_na > max_na {
        return Err(DriverError::Validation(format!(
            "annulus inner NA {min_na} larger than outer NA {max_na}"
        )));
    }
    Ok(())
}
