//! Python bindings, built with the `python` feature.

use pyo3::exceptions::{
    PyIOError, PyNotImplementedError, PyRuntimeError, PyTimeoutError, PyValueError,
};
use pyo3::prelude::*;

use crate::color::{Color, Precision};
use crate::command::LedSelection;
use crate::config::IlluminateConfig;
use crate::discovery;
use crate::errors::DriverError;
use crate::illuminate::Illuminate;
use crate::logging;
use crate::protocol::Number;

impl From<DriverError> for PyErr {
    fn from(e: DriverError) -> Self {
        let msg = e.to_string();
        match e {
            DriverError::Timeout(_) => PyTimeoutError::new_err(msg),
            DriverError::Validation(_) | DriverError::AmbiguousBrightness(_) => {
                PyValueError::new_err(msg)
            }
            DriverError::Unsupported(_) => PyNotImplementedError::new_err(msg),
            DriverError::Io(_) | DriverError::Serial(_) | DriverError::NotFound(_) => {
                PyIOError::new_err(msg)
            }
            _ => PyRuntimeError::new_err(msg),
        }
    }
}

/// A gray level or an `(r, g, b)` tuple.
#[derive(FromPyObject)]
enum ColorArg {
    Rgb((f64, f64, f64)),
    Gray(f64),
}

impl From<ColorArg> for Color {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Rgb(rgb) => rgb.into(),
            ColorArg::Gray(value) => Color::gray(value),
        }
    }
}

/// A single LED index or a list of them.
#[derive(FromPyObject)]
enum LedArg {
    One(usize),
    Many(Vec<usize>),
}

impl From<LedArg> for LedSelection {
    fn from(arg: LedArg) -> Self {
        match arg {
            LedArg::One(led) => led.into(),
            LedArg::Many(leds) => leds.into(),
        }
    }
}

fn number_to_py(py: Python<'_>, number: Number) -> PyResult<Py<PyAny>> {
    Ok(match number {
        Number::Int(v) => v.into_pyobject(py)?.into_any().unbind(),
        Number::Float(v) => v.into_pyobject(py)?.into_any().unbind(),
    })
}

/// Illuminate LED array.
///
/// Example:
///     >>> light = Illuminate(serial_number="0042")
///     >>> light.color = (0, 20, 0)
///     >>> light.led = [0, 1, 2]
///     >>> light.close()
#[pyclass(name = "Illuminate", unsendable)]
struct PyIlluminate {
    inner: Illuminate,
}

#[pymethods]
impl PyIlluminate {
    /// Open a board by port or serial number (first board found when both are None).
    ///
    /// Args:
    ///     precision: integer bit depth of color values, or "float" for [0, 1].
    #[new]
    #[pyo3(signature = (port=None, serial_number=None, precision=None, reboot_on_open=true, timeout=0.5))]
    fn new(
        port: Option<String>,
        serial_number: Option<String>,
        precision: Option<&str>,
        reboot_on_open: bool,
        timeout: f64,
    ) -> PyResult<Self> {
        let precision = match precision {
            Some(p) => p.parse::<Precision>()?,
            None => Precision::default(),
        };
        let config = IlluminateConfig {
            port,
            serial_number,
            precision,
            reboot_on_open,
            timeout_ms: (timeout * 1000.0).round().max(1.0) as u64,
            ..IlluminateConfig::default()
        };
        Ok(Self {
            inner: Illuminate::open(config)?,
        })
    }

    fn close(&mut self) -> PyResult<()> {
        Ok(self.inner.close()?)
    }

    fn __enter__(slf: Py<Self>) -> Py<Self> {
        slf
    }

    fn __exit__(
        &mut self,
        _exc_type: Option<&Bound<'_, PyAny>>,
        _exc: Option<&Bound<'_, PyAny>>,
        _tb: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<bool> {
        self.close()?;
        Ok(false)
    }

    #[getter]
    fn version(&self) -> String {
        self.inner.version().to_string()
    }

    #[getter]
    fn serial_number(&self) -> String {
        self.inner.serial_number().to_string()
    }

    #[getter]
    fn device_name(&self) -> String {
        self.inner.device_name().to_string()
    }

    #[getter]
    fn led_count(&self) -> usize {
        self.inner.led_count()
    }

    #[getter]
    fn color_maximum_value(&self) -> f64 {
        self.inner.color_maximum_value()
    }

    #[getter]
    fn color(&self) -> (f64, f64, f64) {
        self.inner.color().into()
    }

    #[setter]
    fn set_color(&mut self, color: ColorArg) -> PyResult<()> {
        Ok(self.inner.set_color(Color::from(color))?)
    }

    /// Raises ValueError when the color channels differ.
    #[getter]
    fn brightness(&self) -> PyResult<f64> {
        Ok(self.inner.brightness()?)
    }

    #[setter]
    fn set_brightness(&mut self, brightness: f64) -> PyResult<()> {
        Ok(self.inner.set_brightness(brightness)?)
    }

    /// Sorted list of the LEDs currently lit.
    #[getter]
    fn led(&self) -> Vec<usize> {
        self.inner.led().iter().copied().collect()
    }

    #[setter]
    fn set_led(&mut self, leds: Option<LedArg>) -> PyResult<()> {
        Ok(self.inner.turn_on_led(leds.map(LedSelection::from))?)
    }

    #[pyo3(signature = (leds=None))]
    fn turn_on_led(&mut self, leds: Option<LedArg>) -> PyResult<()> {
        self.set_led(leds)
    }

    /// One `(r, g, b)` row per LED.
    #[getter]
    fn led_state(&self) -> Vec<(f64, f64, f64)> {
        self.inner
            .led_state()
            .data()
            .iter()
            .map(|c| (*c).into())
            .collect()
    }

    #[getter]
    fn autoclear(&self) -> bool {
        self.inner.autoclear()
    }

    #[setter]
    fn set_autoclear(&mut self, value: bool) -> PyResult<()> {
        Ok(self.inner.set_autoclear(value)?)
    }

    /// Raises NotImplementedError on firmware without autoupdate.
    #[getter]
    fn autoupdate(&self) -> PyResult<bool> {
        Ok(self.inner.autoupdate()?)
    }

    #[setter]
    fn set_autoupdate(&mut self, value: bool) -> PyResult<()> {
        Ok(self.inner.set_autoupdate(value)?)
    }

    fn update(&mut self) -> PyResult<()> {
        Ok(self.inner.update()?)
    }

    fn clear(&mut self) -> PyResult<()> {
        Ok(self.inner.clear()?)
    }

    fn fill_array(&mut self) -> PyResult<()> {
        Ok(self.inner.fill_array()?)
    }

    /// Send a raw command; returns the confirmation number, if any.
    fn ask(&mut self, py: Python<'_>, command: &str) -> PyResult<Option<Py<PyAny>>> {
        self.inner
            .ask(command)?
            .map(|n| number_to_py(py, n))
            .transpose()
    }

    fn write(&mut self, data: &[u8]) -> PyResult<()> {
        Ok(self.inner.write(data)?)
    }

    #[pyo3(signature = (raw=false))]
    fn read_paragraph(&mut self, raw: bool) -> PyResult<Vec<String>> {
        Ok(self.inner.read_paragraph(raw)?)
    }

    fn help(&mut self) -> PyResult<Vec<String>> {
        Ok(self.inner.help()?)
    }

    fn reboot(&mut self) -> PyResult<()> {
        Ok(self.inner.reboot()?)
    }

    /// Brightest color of the given hue that stays within the supply budget.
    #[pyo3(signature = (num_leds=None, color_ratio=None))]
    fn find_max_brightness(
        &self,
        num_leds: Option<usize>,
        color_ratio: Option<ColorArg>,
    ) -> PyResult<(f64, f64, f64)> {
        let color = self
            .inner
            .find_max_brightness(num_leds, color_ratio.map(Color::from))?;
        Ok(color.into())
    }

    fn __repr__(&self) -> String {
        format!(
            "Illuminate(serial_number={:?}, version={:?})",
            self.inner.serial_number(),
            self.inner.version()
        )
    }
}

/// Serial numbers of every connected board.
#[pyfunction]
fn list_all_serial_numbers() -> PyResult<Vec<String>> {
    Ok(discovery::list_all_serial_numbers()?)
}

/// Set the minimum level of Rust log records forwarded to Python.
#[pyfunction]
#[pyo3(signature = (level=None))]
fn set_log_level(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
    let level = match level {
        Some(name) => logging::parse_level(name)
            .ok_or_else(|| PyValueError::new_err(format!("unknown log level {name:?}")))?,
        None => logging::env_level(),
    };
    logging::set_python_log_level(py, level)
}

#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    logging::init_python_logging(m.py())?;
    m.add_class::<PyIlluminate>()?;
    m.add_function(wrap_pyfunction!(list_all_serial_numbers, m)?)?;
    m.add_function(wrap_pyfunction!(set_log_level, m)?)?;
    m.add("MAX_ARGUMENT_CHAR_COUNT", crate::command::MAX_ARGUMENT_CHAR_COUNT)?;
    Ok(())
}
