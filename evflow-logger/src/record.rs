// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use evflow_log::Level;
use std::time::SystemTime;

/// A log record captured by the [Logger](crate::Logger), borrowed from the `log` record.
#[derive(Debug)]
pub struct Record<'a> {
    pub timestamp: SystemTime,
    pub level: Level,
    pub target: &'a str,
    pub file: Option<&'a str>,
    pub line: Option<u32>,
    pub tgid: u32,
    pub tid: u32,
    pub args: &'a str,
}

impl Record<'_> {
    /// Create a new record.
    #[allow(clippy::too_many_arguments)]
    pub fn new<'a>(
        timestamp: SystemTime,
        level: Level,
        target: &'a str,
        file: Option<&'a str>,
        line: Option<u32>,
        tgid: u32,
        tid: u32,
        args: &'a str,
    ) -> Record<'a> {
        Record {
            timestamp,
            level,
            target,
            file,
            line,
            tgid,
            tid,
            args,
        }
    }

    /// Milliseconds since the unix epoch, zero for timestamps before it
    pub fn unix_millis(&self) -> u128 {
        self.timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
    }
}
