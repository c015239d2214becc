// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use crate::record::Record;
use console::{style, Color, StyledObject};
use evflow_log::Level;
use std::io;
use std::sync::atomic::{self, AtomicUsize, Ordering};
use std::time::SystemTime;
use time::format_description::FormatItem;
use time::macros::format_description;

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond digits:3]");

static TARGET_SIZE: atomic::AtomicUsize = atomic::AtomicUsize::new(16);
static TGID_SIZE: atomic::AtomicUsize = atomic::AtomicUsize::new(4);
static TID_SIZE: atomic::AtomicUsize = atomic::AtomicUsize::new(4);

/// Write `record` as one line to `writer`.
///
/// With `colored == false` no escape sequences are emitted, regardless of the terminal.
pub fn format<W: io::Write>(record: &Record, mut writer: W, colored: bool) -> io::Result<()> {
    let timestamp = format_timestamp(record.timestamp)?;

    let level = {
        let level_color = match record.level {
            Level::Error => Color::Red,
            Level::Warn => Color::Yellow,
            Level::Info => Color::Green,
            Level::Debug => Color::Color256(243),
            Level::Trace => Color::White,
        };
        paint(style(record.level).bold().fg(level_color), colored)
    };

    let tgid = format_id(record.tgid, &TGID_SIZE, true, colored);
    let tid = format_id(record.tid, &TID_SIZE, false, colored);

    let message = record.args;

    let target = {
        let target = record.target;
        TARGET_SIZE.fetch_max(target.len(), Ordering::Relaxed);
        let target_size = TARGET_SIZE.load(Ordering::Relaxed);
        let target_color = target.color();
        paint(
            style(format!("{target:<s$}", s = target_size)).fg(target_color),
            colored,
        )
    };

    // Log location on trace level - otherwise just the message.
    if record.level == Level::Trace {
        let file = record.file.unwrap_or("file unknown");
        let file = paint(style(file).fg(file.color()), colored);
        let line = record.line.unwrap_or(0);
        writeln!(
            writer,
            "{timestamp} {target} ({tgid} {tid}): {level:<5}: {file}:{line}: {message}",
        )
    } else {
        writeln!(
            writer,
            "{timestamp} {target} ({tgid} {tid}): {level:<5}: {message}"
        )
    }
}

fn format_timestamp(timestamp: SystemTime) -> io::Result<String> {
    let nanos = timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i128)
        .unwrap_or_default();
    let timestamp = time::OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    timestamp
        .format(TIMESTAMP_FORMAT)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn paint<D>(object: StyledObject<D>, colored: bool) -> StyledObject<D> {
    if colored {
        object
    } else {
        object.force_styling(false)
    }
}

/// Generate a color of `self`.
trait HashColor {
    fn color(&self) -> Color;
}

impl HashColor for &str {
    fn color(&self) -> Color {
        let hash = self.bytes().fold(42u8, |c, x| c ^ x);
        Color::Color256(hash)
    }
}

impl HashColor for u32 {
    fn color(&self) -> Color {
        (*self as u64).color()
    }
}

impl HashColor for u64 {
    fn color(&self) -> Color {
        // Some colors are hard to read on dark terminals
        let color = match *self as u8 {
            c @ 0..=1 => c + 2,
            c @ 16..=21 => c + 6,
            c @ 52..=55 | c @ 126..=129 => c + 4,
            c @ 163..=165 | c @ 200..=201 => c + 3,
            c @ 207 => c + 1,
            c @ 232..=240 => c + 9,
            c => c,
        };
        Color::Color256(color)
    }
}

/// Format `id` with a color based on the hash of `id`. Update `g` with the
/// maximum length of the formatted `id`.
fn format_id(id: u32, g: &AtomicUsize, align_left: bool, colored: bool) -> StyledObject<String> {
    let id_len = num_hex_digits(id);
    let color = id.color();
    g.fetch_max(id_len, Ordering::Relaxed);
    let len = g.load(Ordering::Relaxed);
    let text = if align_left {
        format!("{:<l$x}", id, l = len)
    } else {
        format!("{:>l$x}", id, l = len)
    };
    paint(style(text).fg(color), colored)
}

// Calculate the number of hex digits needed to represent `n`.
fn num_hex_digits(n: u32) -> usize {
    (1 + n.checked_ilog2().unwrap_or_default() / 4) as usize
}
