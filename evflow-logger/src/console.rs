// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use crate::fmt;
use crate::record::Record;
use std::io::{self};

/// Stream the console sink writes to
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    #[default]
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy)]
pub struct Console {
    stream: Stream,
    colored: bool,
}

impl Default for Console {
    fn default() -> Self {
        Self {
            stream: Stream::Stdout,
            colored: true,
        }
    }
}

impl Console {
    pub fn new(stream: Stream, colored: bool) -> Self {
        Self { stream, colored }
    }

    pub fn write(&self, record: &Record) -> io::Result<()> {
        match self.stream {
            Stream::Stdout => fmt::format(record, io::stdout().lock(), self.colored),
            Stream::Stderr => fmt::format(record, io::stderr().lock(), self.colored),
        }
    }
}
