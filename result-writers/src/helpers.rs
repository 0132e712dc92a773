// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Formatting support code shared by result writers.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::time::Duration;
use swrite::{SWrite, swrite};

const NANOS_PER_TICK: u32 = 100;

/// The earliest representable date, rendered when a report has no timing information.
pub(crate) fn min_date_time() -> DateTime<FixedOffset> {
    Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0)
        .single()
        .expect("0001-01-01T00:00:00Z is a valid time")
        .fixed_offset()
}

/// Seconds with exactly six decimal places, e.g. `123.456781`.
pub(crate) fn seconds_f6(duration: Duration) -> String {
    format!("{:.6}", duration.as_secs_f64())
}

/// Seconds with exactly three decimal places, e.g. `123.457`.
pub(crate) fn seconds_f3(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}

/// Seconds as a plain decimal number without trailing zeros, e.g. `123.4567809` or `0`.
pub(crate) fn seconds_decimal(duration: Duration) -> String {
    let mut out = duration.as_secs().to_string();
    let nanos = duration.subsec_nanos();
    if nanos != 0 {
        let fraction = format!("{nanos:09}");
        swrite!(out, ".{}", fraction.trim_end_matches('0'));
    }
    out
}

/// Whole milliseconds, truncated.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A duration as `hh:mm:ss.fffffff`, where the hour component is the total number of hours.
pub(crate) fn timespan_rtf(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:07}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60,
        duration.subsec_nanos() / NANOS_PER_TICK,
    )
}

/// A duration in the constant format `[d.]hh:mm:ss[.fffffff]`, with the day and fraction parts
/// only present when non-zero.
pub(crate) fn timespan_constant(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86_400;
    let mut out = String::new();
    if days > 0 {
        swrite!(out, "{days}.");
    }
    swrite!(
        out,
        "{:02}:{:02}:{:02}",
        (total_secs / 3600) % 24,
        (total_secs / 60) % 60,
        total_secs % 60,
    );
    let ticks = duration.subsec_nanos() / NANOS_PER_TICK;
    if ticks != 0 {
        swrite!(out, ".{ticks:07}");
    }
    out
}

/// A round-trippable timestamp with seven fractional digits and an explicit offset, e.g.
/// `2024-07-04T21:12:08.0000000+00:00`.
pub(crate) fn rtf(time: &DateTime<FixedOffset>) -> String {
    format!(
        "{}.{:07}{}",
        time.format("%Y-%m-%dT%H:%M:%S"),
        ticks_of(time),
        time.format("%:z"),
    )
}

/// A UTC timestamp with seven fractional digits and a literal `Z`.
pub(crate) fn utc_ticks_z(time: &DateTime<FixedOffset>) -> String {
    format!(
        "{}.{:07}Z",
        time.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%S"),
        ticks_of(time),
    )
}

// chrono only supports 3, 6 or 9 fractional digits, so ticks (100ns) are rendered by hand.
fn ticks_of<Tz: TimeZone>(time: &DateTime<Tz>) -> u32 {
    time.timestamp_subsec_nanos() / NANOS_PER_TICK
}

/// A sortable UTC timestamp without an offset, e.g. `2024-07-04T21:12:08`.
pub(crate) fn utc_sortable(time: &DateTime<FixedOffset>) -> String {
    time.with_timezone(&Utc)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

/// A universal sortable timestamp, e.g. `2024-07-04 21:12:08Z`.
pub(crate) fn utc_universal_sortable(time: &DateTime<FixedOffset>) -> String {
    time.with_timezone(&Utc)
        .format("%Y-%m-%d %H:%M:%SZ")
        .to_string()
}

/// Returns true if the string is empty or consists only of whitespace.
pub(crate) fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Returns the string if it isn't blank.
pub(crate) fn non_blank(s: &str) -> Option<&str> {
    (!is_blank(s)).then_some(s)
}

/// Removes trailing carriage returns and line feeds.
pub(crate) fn trim_trailing_newlines(s: &str) -> &str {
    s.trim_end_matches(['\r', '\n'])
}

/// Renders captured output and warnings as labeled sections. Returns `None` if there's nothing to
/// render.
///
/// ```text
/// <<< Test output >>>
///
/// {output}
///
/// <<< Warnings >>>
///
/// 1. {warning}
/// ```
pub(crate) fn output_and_warnings(output: &str, warnings: &[String]) -> Option<String> {
    let mut out = String::new();

    if !is_blank(output) {
        out.push_str("<<< Test output >>>\n\n");
        out.push_str(trim_trailing_newlines(output));
    }

    if !warnings.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str("<<< Warnings >>>\n\n");
        out.push_str(&numbered_list(warnings, ". ", "\n\n"));
    }

    (!out.is_empty()).then_some(out)
}

/// Renders a 1-based numbered list: `{n}{separator}{item}`, joined with `joiner`.
fn numbered_list(items: &[impl AsRef<str>], separator: &str, joiner: &str) -> String {
    let mut out = String::new();
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push_str(joiner);
        }
        swrite!(out, "{}{separator}{}", idx + 1, item.as_ref());
    }
    out
}

/// Escapes control characters the way xUnit XML reports expect them.
///
/// Well-known control characters become backslash escapes (`\t`, `\0`, ...). Other characters
/// below 0x20 become `\xNN`. Line breaks are escaped only if `escape_newlines` is true.
pub(crate) fn escape_xunit(value: &str, escape_newlines: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            '\x0c' => out.push_str("\\f"),
            '\n' | '\r' if !escape_newlines => out.push(c),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => swrite!(out, "\\x{:02x}", c as u32),
            c => out.push(c),
        }
    }
    out
}
