//! USB discovery of Illuminate boards.

use log::{debug, warn};
use serialport::{SerialPortInfo, SerialPortType};

use crate::errors::{DriverError, Result};

/// Teensy USB serial vendor id.
pub const ILLUMINATE_VID: u16 = 0x16C0;
/// Teensy USB serial product id.
pub const ILLUMINATE_PID: u16 = 0x0483;

/// A board visible on the USB bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub port_name: String,
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    /// Key used for the cross-process lock.
    pub fn lock_key(&self) -> &str {
        self.serial_number.as_deref().unwrap_or(&self.port_name)
    }
}

fn as_illuminate(info: SerialPortInfo) -> Option<DeviceInfo> {
    match info.port_type {
        SerialPortType::UsbPort(usb) if usb.vid == ILLUMINATE_VID && usb.pid == ILLUMINATE_PID => {
            Some(DeviceInfo {
                port_name: info.port_name,
                serial_number: usb.serial_number,
            })
        }
        _ => None,
    }
}

/// List connected boards, optionally only the one with `serial_number`.
pub fn find(serial_number: Option<&str>) -> Result<Vec<DeviceInfo>> {
    let devices: Vec<DeviceInfo> = serialport::available_ports()?
        .into_iter()
        .filter_map(as_illuminate)
        .filter(|d| serial_number.map_or(true, |sn| d.serial_number.as_deref() == Some(sn)))
        .collect();
    debug!("found {} illuminate board(s)", devices.len());
    Ok(devices)
}

/// Serial numbers of every connected board.
pub fn list_all_serial_numbers() -> Result<Vec<String>> {
    Ok(find(None)?
        .into_iter()
        .filter_map(|d| d.serial_number)
        .collect())
}

/// Pick the board to open from an explicit port and/or serial number.
///
/// An explicit port is used as is; its serial number is looked up so the
/// lock is keyed the same way as for discovered boards. That lookup is best
/// effort, since enumeration can fail where the port itself still opens.
pub fn resolve(port: Option<&str>, serial_number: Option<&str>) -> Result<DeviceInfo> {
    resolve_from(port, serial_number, find)
}

fn resolve_from<F>(port: Option<&str>, serial_number: Option<&str>, find: F) -> Result<DeviceInfo>
where
    F: FnOnce(Option<&str>) -> Result<Vec<DeviceInfo>>,
{
    if let Some(port) = port {
        let known = match find(serial_number) {
            Ok(devices) => devices.into_iter().find(|d| d.port_name == port),
            Err(e) => {
                warn!("could not enumerate serial ports, using {port} as given: {e}");
                None
            }
        };
        return Ok(known.unwrap_or_else(|| DeviceInfo {
            port_name: port.to_string(),
            serial_number: serial_number.map(str::to_string),
        }));
    }

    find(serial_number)?.into_iter().next().ok_or_else(|| {
        DriverError::NotFound(match serial_number {
            Some(sn) => format!("no board with serial number {sn}"),
            None => "no illuminate board connected".to_string(),
        })
    })
}
