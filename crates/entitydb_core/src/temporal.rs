//! Temporal tag codec: `NANOS│PAYLOAD` formatting, parsing and classification.
//!
//! Emitters always write the canonical decimal-nanosecond form. Readers
//! additionally tolerate two legacy forms: an RFC3339Nano prefix before the
//! `│` separator, and the old `RFC3339NANO.PAYLOAD` dot form. A tag with no
//! separator at all is non-temporal and sorts at timestamp 0.

use crate::error::{EntityDbError, Result};
use chrono::DateTime;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Separator between the timestamp prefix and the tag payload (U+2502).
pub const TEMPORAL_SEPARATOR: char = '│';

/// Classification of a raw tag string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// Carries a parseable timestamp prefix.
    Temporal,
    /// Legacy payload-only tag, treated as timestamp 0.
    NonTemporal,
}

/// High-water mark so the clock never runs backwards within a process.
static LAST_NANOS: AtomicI64 = AtomicI64::new(0);

/// Returns the current time as nanoseconds since the Unix epoch.
///
/// Strictly monotonic within the process: two calls never return the same
/// value, and a wall-clock step backwards is absorbed by bumping past the
/// previous return instead.
pub fn now_nanos() -> i64 {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);

    let mut prev = LAST_NANOS.load(Ordering::Relaxed);
    loop {
        let next = wall.max(prev + 1);
        match LAST_NANOS.compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

/// Formats a payload as a canonical temporal tag: `nanos│payload`.
pub fn format_temporal(payload: &str, nanos: i64) -> String {
    format!("{nanos}{TEMPORAL_SEPARATOR}{payload}")
}

/// Parses a temporal tag into its timestamp and payload.
///
/// Accepts a decimal-nanosecond or RFC3339Nano prefix before `│`, and the
/// legacy `RFC3339NANO.PAYLOAD` dot form.
///
/// # Errors
///
/// Returns `MalformedTemporalTag` if no separator is present or the prefix
/// parses as neither decimal nanoseconds nor an RFC3339 timestamp.
pub fn parse_temporal(tag: &str) -> Result<(i64, &str)> {
    if let Some(idx) = tag.find(TEMPORAL_SEPARATOR) {
        let prefix = &tag[..idx];
        let payload = &tag[idx + TEMPORAL_SEPARATOR.len_utf8()..];

        if let Ok(nanos) = prefix.parse::<i64>() {
            return Ok((nanos, payload));
        }
        if let Some(nanos) = parse_rfc3339_nanos(prefix) {
            return Ok((nanos, payload));
        }
        return Err(EntityDbError::MalformedTemporalTag(tag.to_string()));
    }

    if let Some((nanos, payload)) = split_legacy_dot(tag) {
        return Ok((nanos, payload));
    }

    Err(EntityDbError::MalformedTemporalTag(tag.to_string()))
}

/// Parses any tag, mapping non-temporal tags to timestamp 0.
///
/// This is the read path used by the entity model and indexes: every stored
/// tag goes through here, so legacy payload-only tags stay usable.
pub fn parse_any(tag: &str) -> (i64, &str) {
    match parse_temporal(tag) {
        Ok(parsed) => parsed,
        Err(_) => (0, tag),
    }
}

/// Classifies a tag as temporal or legacy non-temporal.
pub fn classify(tag: &str) -> TagKind {
    if parse_temporal(tag).is_ok() {
        TagKind::Temporal
    } else {
        TagKind::NonTemporal
    }
}

/// Strips the timestamp prefix, returning just the payload.
///
/// Non-temporal tags are returned unchanged.
pub fn strip_timestamp(tag: &str) -> &str {
    parse_any(tag).1
}

/// Parses an RFC3339/RFC3339Nano timestamp into epoch nanoseconds.
fn parse_rfc3339_nanos(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .and_then(|dt| dt.timestamp_nanos_opt())
}

/// Splits the legacy `RFC3339NANO.PAYLOAD` form.
///
/// The timestamp itself contains dots (fractional seconds), so each dot is
/// tried in turn; the first prefix that parses as RFC3339 wins.
fn split_legacy_dot(tag: &str) -> Option<(i64, &str)> {
    // Cheap shape check: legacy timestamps start with a four-digit year.
    if tag.len() < 20 || !tag.as_bytes()[..4].iter().all(u8::is_ascii_digit) {
        return None;
    }

    for (idx, ch) in tag.char_indices() {
        if ch != '.' {
            continue;
        }
        if let Some(nanos) = parse_rfc3339_nanos(&tag[..idx]) {
            return Some((nanos, &tag[idx + 1..]));
        }
    }
    None
}
