//! Log setup for the CLI and the Python extension.
//!
//! Library code only uses the `log` macros. Binaries install `env_logger`
//! through [`init_rust_logging`]; the Python extension installs a bridge that
//! hands every record to Python's `logging` under the `illuminate` logger.

use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static RUST_LOG_ONCE: Once = Once::new();

/// Level from `ILLUMINATE_LOG`, then `RUST_LOG`, defaulting to `info`.
pub fn env_level() -> LevelFilter {
    std::env::var("ILLUMINATE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .as_deref()
        .and_then(parse_level)
        .unwrap_or(LevelFilter::Info)
}

/// Parse `off`, `error`, `warn`, `info`, `debug` or `trace` (any case).
pub fn parse_level(input: &str) -> Option<LevelFilter> {
    input.trim().parse::<LevelFilter>().ok()
}

/// Install the stderr logger once; later calls are no-ops.
pub fn init_rust_logging() {
    RUST_LOG_ONCE.call_once(|| {
        let level = env_level();
        let env = Env::default().default_filter_or(level.as_str().to_ascii_lowercase());
        let installed = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_target(true)
            .try_init();
        if installed.is_err() {
            log::debug!("a logger was already installed");
        }
    });
}

#[cfg(feature = "python")]
pub use python::{init_python_logging, set_python_log_level};

#[cfg(feature = "python")]
mod python {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use log::{Level, LevelFilter, Log, Metadata, Record};
    use once_cell::sync::OnceCell;
    use pyo3::prelude::*;
    use pyo3::types::PyModule;

    use super::env_level;

    /// Name of the Python logger records are forwarded to.
    const ROOT_LOGGER: &str = "illuminate";

    static BRIDGE: OnceCell<&'static PyBridge> = OnceCell::new();

    struct PyBridge {
        /// `LevelFilter as usize`, shared with the `log` crate's max level.
        level: AtomicUsize,
        logging: Py<PyModule>,
        loggers: Mutex<HashMap<String, Py<PyAny>>>,
    }

    fn python_level(level: Level) -> u32 {
        match level {
            Level::Error => 40,
            Level::Warn => 30,
            Level::Info => 20,
            Level::Debug => 10,
            Level::Trace => 5,
        }
    }

    /// `illuminate::protocol` logs to the Python logger `illuminate.protocol`.
    fn logger_name(target: &str) -> String {
        let mut parts = target.split("::");
        parts.next();
        std::iter::once(ROOT_LOGGER)
            .chain(parts)
            .collect::<Vec<_>>()
            .join(".")
    }

    impl PyBridge {
        fn logger<'py>(&self, py: Python<'py>, target: &str) -> PyResult<Bound<'py, PyAny>> {
            let name = logger_name(target);
            let mut loggers = self
                .loggers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(logger) = loggers.get(&name) {
                return Ok(logger.bind(py).clone());
            }
            let logger = self.logging.bind(py).call_method1("getLogger", (&name,))?;
            loggers.insert(name, logger.clone().unbind());
            Ok(logger)
        }

        fn forward(&self, record: &Record) {
            Python::attach(|py| {
                let sent = self.logger(py, record.target()).and_then(|logger| {
                    logger.call_method1(
                        "log",
                        (python_level(record.level()), record.args().to_string()),
                    )
                });
                if let Err(e) = sent {
                    e.restore(py);
                }
            });
        }
    }

    impl Log for PyBridge {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() as usize <= self.level.load(Ordering::Relaxed)
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                self.forward(record);
            }
        }

        fn flush(&self) {}
    }

    fn install(py: Python<'_>, level: LevelFilter) -> PyResult<&'static PyBridge> {
        BRIDGE
            .get_or_try_init(|| {
                let bridge = PyBridge {
                    level: AtomicUsize::new(level as usize),
                    logging: py.import("logging")?.unbind(),
                    loggers: Mutex::new(HashMap::new()),
                };
                let bridge: &'static PyBridge = Box::leak(Box::new(bridge));
                if log::set_logger(bridge).is_ok() {
                    log::set_max_level(level);
                }
                Ok(bridge)
            })
            .copied()
    }

    /// Forward Rust logs into Python's `logging`; safe to call repeatedly.
    pub fn init_python_logging(py: Python<'_>) -> PyResult<()> {
        install(py, env_level()).map(drop)
    }

    /// Change the minimum level forwarded to Python.
    pub fn set_python_log_level(py: Python<'_>, level: LevelFilter) -> PyResult<()> {
        let bridge = install(py, level)?;
        bridge.level.store(level as usize, Ordering::Relaxed);
        log::set_max_level(level);
        Ok(())
    }

}
