// src/logging.rs

use env_logger::fmt::Formatter;
use log::{LevelFilter, Record, SetLoggerError};
use std::io::{self, Write};

/// Dependencies whose debug output drowns the agent's own.
const QUIET_MODULES: &[&str] = &["hyper", "hyper_util", "h2", "reqwest", "rustls"];

/// Installs the process-wide logger on stderr.
///
/// `RUST_LOG` refines `level` per module. Stdout stays clean because the
/// native messaging host speaks its protocol there. Only the first call
/// installs anything; later calls return the `SetLoggerError`.
pub fn init_logging(level: LevelFilter) -> Result<(), SetLoggerError> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    for module in QUIET_MODULES {
        builder.filter_module(module, level.min(LevelFilter::Warn));
    }
    builder
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format(format_record)
        .try_init()
}

fn format_record(buf: &mut Formatter, record: &Record<'_>) -> io::Result<()> {
    writeln!(
        buf,
        "[{}] {:<5} {} - {}",
        buf.timestamp_millis(),
        record.level(),
        record.target(),
        record.args()
    )
}

/// Maps the `--log-level` flag onto a filter, defaulting to `Info`.
pub fn parse_level(raw: &str) -> Option<LevelFilter> {
    match raw.to_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "error" => Some(LevelFilter::Error),
        "off" => Some(LevelFilter::Off),
        _ => None,
    }
}

/// Enforcement-path logging (coordinator and applier)
#[macro_export]
macro_rules! enforce_log {
    ($level:ident, $($arg:tt)*) => {
        log::$level!("[ENFORCE] {}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! watchdog_log {
    ($level:ident, $($arg:tt)*) => {
        log::$level!("[WATCHDOG] {}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! portal_log {
    ($level:ident, $($arg:tt)*) => {
        log::$level!("[PORTAL] {}", format_args!($($arg)*))
    };
}
