//! Logging infrastructure
//!
//! This module provides logging via the `log` crate. The platform registers
//! a console sink (usually its UART) and optionally a timestamp source;
//! every record is written as `[timestamp] [LEVEL] message`.
//!
//! ANSI-colored level strings are disabled by default. Enable them with the
//! `ansi-log` feature flag.

use core::fmt::Write;
use log::{Level, LevelFilter, Metadata, Record};
use spin::Mutex;

/// Console sink; records are dropped until one is registered
static CONSOLE: Mutex<Option<&'static mut (dyn Write + Send)>> = Mutex::new(None);

/// Timestamp source, reported verbatim in each record
static TIMESTAMP: Mutex<Option<fn() -> u64>> = Mutex::new(None);

struct ConsoleLogger;

#[cfg(feature = "ansi-log")]
fn level_str(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31mERROR\x1b[0m",
        Level::Warn => "\x1b[33mWARN\x1b[0m ",
        Level::Info => "\x1b[32mINFO\x1b[0m ",
        Level::Debug => "\x1b[34mDEBUG\x1b[0m",
        Level::Trace => "\x1b[35mTRACE\x1b[0m",
    }
}

#[cfg(not(feature = "ansi-log"))]
fn level_str(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

fn format_record(out: &mut dyn Write, ts: u64, record: &Record) -> core::fmt::Result {
    writeln!(out, "[{:>10}] [{}] {}", ts, level_str(record.level()), record.args())
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let source = *TIMESTAMP.lock();
        let ts = source.map_or(0, |f| f());

        let mut console = CONSOLE.lock();
        if let Some(out) = console.as_mut() {
            // Nowhere to report a failing console
            let _ = format_record(&mut **out, ts, record);
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Initialize the logging subsystem
///
/// Fails if another logger was installed first.
pub fn init(
    console: &'static mut (dyn Write + Send),
    level: LevelFilter,
) -> Result<(), log::SetLoggerError> {
    *CONSOLE.lock() = Some(console);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Set the source of record timestamps
pub fn set_timestamp(source: fn() -> u64) {
    *TIMESTAMP.lock() = Some(source);
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;

    #[cfg(not(feature = "ansi-log"))]
    #[test]
    fn record_layout() {
        let mut out = String::new();
        format_record(
            &mut out,
            42,
            &Record::builder()
                .args(format_args!("litex-mmc: card {}", 3))
                .level(Level::Warn)
                .build(),
        )
        .unwrap();
        assert_eq!(out, "[        42] [WARN ] litex-mmc: card 3\n");
    }

    #[test]
    fn level_strings_are_aligned() {
        for level in [Level::Error, Level::Warn, Level::Info, Level::Debug, Level::Trace] {
            let s = level_str(level);
            assert!(s.contains(level.as_str()));
        }
    }
}
