use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

pub mod batcher;
pub mod delivery;
pub mod http;
pub mod protocol;
pub mod stats;
pub mod writer;

/// Value of a single field in a [`Point`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Unsigned(u64),
    String(String),
    Boolean(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}i"),
            FieldValue::Unsigned(v) => write!(f, "{v}u"),
            FieldValue::Boolean(v) => write!(f, "{v}"),
            FieldValue::String(v) => {
                f.write_char('"')?;
                for c in v.chars() {
                    if c == '"' || c == '\\' {
                        f.write_char('\\')?;
                    }
                    f.write_char(c)?;
                }
                f.write_char('"')
            }
        }
    }
}

/// A decoded time series data point. Tags and fields are kept sorted by key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    /// Nanoseconds since unix epoch
    pub timestamp: i64,
}

impl Point {
    pub fn new(name: impl Into<String>, timestamp: i64) -> Point {
        Point { name: name.into(), tags: BTreeMap::new(), fields: BTreeMap::new(), timestamp }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Point {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Point {
        self.fields.insert(key.into(), value);
        self
    }

    /// Line protocol representation with a nanosecond timestamp.
    ///
    /// Backslashes are written as they are. A name, tag or field key ending in `\` therefore
    /// escapes the separator after it and the line no longer parses back into this point.
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(64);
        escape_into(&mut line, &self.name, &[',', ' ']);
        for (k, v) in self.tags.iter() {
            line.push(',');
            escape_into(&mut line, k, &[',', ' ', '=']);
            line.push('=');
            escape_into(&mut line, v, &[',', ' ', '=']);
        }

        let mut separator = ' ';
        for (k, v) in self.fields.iter() {
            line.push(separator);
            escape_into(&mut line, k, &[',', ' ', '=']);
            line.push('=');
            // Writing into a String doesn't fail
            let _ = write!(line, "{v}");
            separator = ',';
        }

        let _ = write!(line, " {}", self.timestamp);
        line
    }
}

/// Nanoseconds since unix epoch, 0 for times before it
pub fn unix_nanos(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or(0)
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
