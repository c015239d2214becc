// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! The evflow console logger
//!
//! Minimal logger implementation for the evflow workspace, installed behind the
//! `evflow-log` facade.

use evflow_log::{LevelFilter, Log, Metadata, Record};
use std::io::{self, Write};
use std::str::FromStr;
use std::time::SystemTime;

mod console;
pub mod fmt;
pub mod record;
mod thread;

pub use console::Stream;

const ENV_RUST_LOG: &str = "RUST_LOG";
const MAX_ARGS_SIZE: usize = 8 * 1024;

/// Initialize the logger.
///
/// A valid level passed as `RUST_LOG` environment variable overrides `level`.
/// Enable colored output to `stdout` via `console`.
pub fn init(level: LevelFilter, console: bool) {
    let logger = Logger::new(console);
    if let Err(e) = logger.install(level) {
        eprintln!("Failed to install logger: {e}");
    }
}

/// The evflow logger.
#[derive(Debug)]
pub struct Logger {
    console: Option<console::Console>,
}

impl Logger {
    /// Create a new logger writing colored lines to stdout if `console` is set.
    pub fn new(console: bool) -> Self {
        let console = console.then(console::Console::default);
        Self { console }
    }

    /// Create a new logger writing to the given stream, optionally without colors.
    pub fn with_stream(stream: Stream, colored: bool) -> Self {
        Self {
            console: Some(console::Console::new(stream, colored)),
        }
    }

    /// Install this logger as the global logger with the given default level.
    pub fn install(self, level: LevelFilter) -> Result<(), evflow_log::SetLoggerError> {
        // Set the maximum log level the log subsystem will forward to this logger impl.
        evflow_log::set_max_level(level_from_env().unwrap_or(level));
        // Set the logger in the global subsystem.
        evflow_log::set_boxed_logger(Box::new(self))
    }
}

impl Log for Logger {
    /// Check if a log message with the specified metadata would be logged.
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= evflow_log::max_level()
    }

    fn log(&self, record: &Record) {
        let Some(console) = &self.console else {
            return;
        };

        let timestamp = SystemTime::now();
        let tgid = thread::group_id();
        let tid = thread::id();
        // Serialize args into args buffer without heap allocation. Messages longer
        // than the buffer are truncated.
        let args_buffer = &mut [0u8; MAX_ARGS_SIZE];
        let len = {
            let mut writer = io::Cursor::new(&mut args_buffer[..]);
            let _ = write!(&mut writer, "{}", record.args());
            writer.position() as usize
        };
        let args = truncated_str(&args_buffer[0..len]);
        let level = record.level();
        let target = record.target();
        let file = record.file();
        let line = record.line();

        let record = record::Record::new(timestamp, level, target, file, line, tgid, tid, args);

        if let Err(e) = console.write(&record) {
            eprintln!("Failed to write log record: {e}");
        }
    }

    fn flush(&self) {}
}

/// Longest valid utf-8 prefix of `bytes`
fn truncated_str(bytes: &[u8]) -> &str {
    match std::str::from_utf8(bytes) {
        Ok(s) => s,
        // Cut at the last complete character
        Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
    }
}

/// Try to parse the log level from the environment variable `RUST_LOG`.
fn level_from_env() -> Option<LevelFilter> {
    std::env::var(ENV_RUST_LOG).ok().and_then(|s| {
        LevelFilter::from_str(&s)
            .inspect_err(|_| eprintln!("Failed to parse log level from `RUST_LOG={s}`"))
            .ok()
    })
}
