//! Host driver for Illuminate LED arrays.
//!
//! Illuminate boards are Teensy based LED matrices used as programmable
//! microscope illumination. They speak a line oriented ASCII protocol over
//! USB serial: `name[.arg]*\n` commands, answered by text paragraphs ending
//! in a `-==-` line.
//!
//! The crate is layered bottom-up:
//!
//! - [`protocol`]: paragraph reader and response interpretation over a
//!   byte [`Transport`]
//! - [`command`]: command formatting and LED list chunking
//! - [`color`]: user units to device units, power budget
//! - [`state`]: client side mirror of lit LEDs and update flags
//! - [`illuminate`]: the [`Illuminate`] session tying them together
//!
//! ```no_run
//! use illuminate::{Illuminate, IlluminateConfig};
//!
//! let mut light = Illuminate::open(IlluminateConfig::default())?;
//! light.set_color((0.0, 20.0, 0.0))?;
//! light.turn_on_led([0usize, 1, 2])?;
//! light.close()?;
//! # Ok::<(), illuminate::DriverError>(())
//! ```

pub mod color;
pub mod command;
pub mod config;
pub mod discovery;
mod errors;
pub mod illuminate;
pub mod lock;
pub mod logging;
pub mod parameters;
pub mod protocol;
pub mod state;

#[cfg(feature = "python")]
mod python;

pub use color::{Color, ColorScale, Precision};
pub use command::{DpcDirection, LedSelection, MAX_ARGUMENT_CHAR_COUNT};
pub use config::IlluminateConfig;
pub use discovery::{find, list_all_serial_numbers, DeviceInfo};
pub use errors::*;
pub use illuminate::{FirmwareVersion, Illuminate};
pub use parameters::{DeviceParameters, LedPosition};
pub use protocol::{Number, Transport};
pub use state::LedStateGrid;
