//! Line protocol decoding.
//!
//! ```text
//! measurement[,tag=value...] field=value[,field=value...] [timestamp]
//! ```
//!
//! A payload may carry any number of newline separated lines. A single bad line fails
//! the whole payload, there is no partial recovery of the lines that did parse.

use std::str;

use super::{FieldValue, Point};
use crate::config::Precision;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Reason {
    #[error("invalid utf-8")]
    Utf8,
    #[error("missing measurement")]
    MissingMeasurement,
    #[error("missing fields")]
    MissingFields,
    #[error("invalid tag {0:?}")]
    InvalidTag(String),
    #[error("invalid field {0:?}")]
    InvalidField(String),
    #[error("invalid field value {0:?}")]
    InvalidFieldValue(String),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("timestamp {0} out of range")]
    TimestampOverflow(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unable to parse line {line}: {reason}")]
pub struct ParseError {
    /// 1 based index of the offending line in the payload
    pub line: usize,
    pub reason: Reason,
}

/// Parses all points in `buf`. Points without a timestamp get `default_time` (nanoseconds),
/// truncated to `precision`. Explicit timestamps are read in `precision` units.
pub fn parse_points_with_precision(
    buf: &[u8],
    default_time: i64,
    precision: Precision,
) -> Result<Vec<Point>, ParseError> {
    let mut points = vec![];
    for (i, line) in split_lines(buf).into_iter().enumerate() {
        let line = line.trim_ascii();
        if line.is_empty() || line[0] == b'#' {
            continue;
        }

        let point = parse_line(line, default_time, precision)
            .map_err(|reason| ParseError { line: i + 1, reason })?;
        points.push(point);
    }

    Ok(points)
}

fn parse_line(line: &[u8], default_time: i64, precision: Precision) -> Result<Point, Reason> {
    let line = str::from_utf8(line).map_err(|_| Reason::Utf8)?;
    let sections = split_unescaped(line, b' ', true);
    let mut sections = sections.into_iter().filter(|s| !s.is_empty());

    let key = sections.next().ok_or(Reason::MissingMeasurement)?;
    let fields = sections.next().ok_or(Reason::MissingFields)?;
    let timestamp = sections.next();
    if let Some(extra) = sections.next() {
        return Err(Reason::InvalidTimestamp(extra.to_owned()));
    }

    let mut key = split_unescaped(key, b',', false).into_iter();
    let name = match key.next() {
        Some(name) if !name.is_empty() => unescape(name),
        _ => return Err(Reason::MissingMeasurement),
    };

    let timestamp = match timestamp {
        Some(t) => {
            let t: i64 = t.parse().map_err(|_| Reason::InvalidTimestamp(t.to_owned()))?;
            t.checked_mul(precision.multiplier()).ok_or(Reason::TimestampOverflow(t))?
        }
        None => precision.truncate(default_time),
    };

    let mut point = Point::new(name, timestamp);
    for tag in key {
        match split_pair(tag) {
            Some((k, v)) => point.tags.insert(unescape(k), unescape(v)),
            None => return Err(Reason::InvalidTag(tag.to_owned())),
        };
    }

    for field in split_unescaped(fields, b',', true) {
        let (k, v) = split_pair(field).ok_or_else(|| Reason::InvalidField(field.to_owned()))?;
        point.fields.insert(unescape(k), parse_value(v)?);
    }

    Ok(point)
}

fn parse_value(v: &str) -> Result<FieldValue, Reason> {
    let invalid = || Reason::InvalidFieldValue(v.to_owned());

    if let Some(quoted) = v.strip_prefix('"') {
        let s = quoted.strip_suffix('"').ok_or_else(invalid)?;
        return Ok(FieldValue::String(unescape_string(s)));
    }

    let value = match v {
        "t" | "T" | "true" | "True" | "TRUE" => FieldValue::Boolean(true),
        "f" | "F" | "false" | "False" | "FALSE" => FieldValue::Boolean(false),
        _ if v.ends_with('i') => {
            FieldValue::Integer(v[..v.len() - 1].parse().map_err(|_| invalid())?)
        }
        _ if v.ends_with('u') => {
            FieldValue::Unsigned(v[..v.len() - 1].parse().map_err(|_| invalid())?)
        }
        _ => {
            let f: f64 = v.parse().map_err(|_| invalid())?;
            if !f.is_finite() {
                return Err(invalid());
            }
            FieldValue::Float(f)
        }
    };

    Ok(value)
}

/// Splits on newlines that aren't part of a quoted field value
fn split_lines(buf: &[u8]) -> Vec<&[u8]> {
    let mut lines = vec![];
    let mut start = 0;
    let mut section = 0;
    let mut quoted = false;
    let mut escaped = false;
    let mut last = b'\n';

    for (i, &b) in buf.iter().enumerate() {
        if escaped {
            escaped = false;
            last = b;
            continue;
        }

        match b {
            b'\\' => escaped = true,
            b'"' if section == 1 => quoted = !quoted,
            b' ' if !quoted && last != b' ' && last != b'\n' => section += 1,
            b'\n' if !quoted => {
                lines.push(&buf[start..i]);
                start = i + 1;
                section = 0;
            }
            _ => {}
        }
        last = b;
    }

    if start < buf.len() {
        lines.push(&buf[start..]);
    }

    lines
}

/// Splits `s` on every `sep` that isn't backslash escaped (or quoted, when `quotes` is set)
fn split_unescaped(s: &str, sep: u8, quotes: bool) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = vec![];
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }

        match b {
            b'\\' => escaped = true,
            b'"' if quotes => quoted = !quoted,
            _ if b == sep && !quoted => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    parts.push(&s[start..]);
    parts
}

/// Splits `key=value` on the first unescaped `=`, both sides must be non empty
fn split_pair(s: &str) -> Option<(&str, &str)> {
    let bytes = s.as_bytes();
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }

        match b {
            b'\\' => escaped = true,
            b'=' => {
                let (k, v) = (&s[..i], &s[i + 1..]);
                if k.is_empty() || v.is_empty() {
                    return None;
                }
                return Some((k, v));
            }
            _ => {}
        }
    }

    None
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, ',' | ' ' | '=') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }

    out
}

fn unescape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '"' || next == '\\' {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }

    out
}
