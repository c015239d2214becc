// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Logging facade of the evflow workspace.
//!
//! All evflow crates log through this crate instead of depending on `log` directly.
//! The logger implementation is selected by the application, see `evflow-logger`.

pub use log::*;

/// Map a numeric level as stored in module configuration nodes to a [LevelFilter].
///
/// `0` disables logging, `1` to `5` select error to trace. Larger values saturate at trace.
pub fn level_filter_from_u8(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Inverse of [level_filter_from_u8]
pub fn level_filter_to_u8(filter: LevelFilter) -> u8 {
    match filter {
        LevelFilter::Off => 0,
        LevelFilter::Error => 1,
        LevelFilter::Warn => 2,
        LevelFilter::Info => 3,
        LevelFilter::Debug => 4,
        LevelFilter::Trace => 5,
    }
}

#[cfg(test)]
mod test {
    use super::{level_filter_from_u8, level_filter_to_u8, LevelFilter};

    #[test]
    fn numeric_levels() {
        for value in 0..=5u8 {
            assert_eq!(level_filter_to_u8(level_filter_from_u8(value)), value);
        }
        assert_eq!(level_filter_from_u8(200), LevelFilter::Trace);
    }
}
