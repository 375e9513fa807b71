//! InfluxDB line protocol.
//!
//! ```text
//! measurement[,tag=value...] field=value[,field=value...] [timestamp]
//! ```
//!
//! Commas, spaces and equal signs are escaped with a backslash. String field values are
//! enclosed in double quotes. Integer values end with `i`, unsigned ones with `u`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use telemetron::{
    metric::{FieldValue, Metric},
    plugin::{Parser, factory::FromConfig},
};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {}

#[derive(Debug, Default)]
pub struct InfluxParser;

impl FromConfig for InfluxParser {
    type Config = Config;

    fn from_config(_config: Config) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

impl Parser for InfluxParser {
    fn parse(&self, buf: &[u8]) -> anyhow::Result<Vec<Metric>> {
        Ok(parse(buf)?)
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("input is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("line {line}: {kind}")]
    Line { line: usize, kind: LineError },
}

#[derive(Debug, Error, PartialEq)]
pub enum LineError {
    #[error("missing fields")]
    MissingFields,
    #[error("empty measurement name")]
    EmptyMeasurement,
    #[error("invalid tag {0:?}")]
    InvalidTag(String),
    #[error("invalid field {0:?}")]
    InvalidField(String),
    #[error("invalid value {value:?} for field {field:?}")]
    InvalidValue { field: String, value: String },
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("unexpected data after the timestamp")]
    TrailingData,
}

/// Parses every line of `buf`. Blank lines and comments are skipped.
pub fn parse(buf: &[u8]) -> Result<Vec<Metric>, ParseError> {
    let text = std::str::from_utf8(buf)?;
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| parse_line(line).map_err(|kind| ParseError::Line { line: n, kind }))
        .collect()
}

pub fn parse_line(line: &str) -> Result<Metric, LineError> {
    let (key, rest) = match find_unescaped(line, ' ', false) {
        Some(i) => (&line[..i], line[i + 1..].trim_start()),
        None => return Err(LineError::MissingFields),
    };
    if rest.is_empty() {
        return Err(LineError::MissingFields);
    }

    let mut key_parts = split_unescaped(key, ',', false).into_iter();
    let measurement = unescape(key_parts.next().unwrap_or_default());
    if measurement.is_empty() {
        return Err(LineError::EmptyMeasurement);
    }
    let mut metric = Metric::new(measurement);

    for tag in key_parts {
        let (k, v) = split_pair(tag, false).ok_or_else(|| LineError::InvalidTag(tag.to_owned()))?;
        metric = metric.with_tag(unescape(k), unescape(v));
    }

    let mut sections = split_unescaped(rest, ' ', true).into_iter().filter(|s| !s.is_empty());
    let fields = sections.next().ok_or(LineError::MissingFields)?;
    for field in split_unescaped(fields, ',', true) {
        let (k, v) = split_pair(field, true).ok_or_else(|| LineError::InvalidField(field.to_owned()))?;
        let name = unescape(k);
        let value = parse_value(v).ok_or_else(|| LineError::InvalidValue {
            field: name.clone(),
            value: v.to_owned(),
        })?;
        metric = metric.with_field(name, value);
    }

    if let Some(ts) = sections.next() {
        metric = metric.with_timestamp(parse_timestamp(ts)?);
    }
    if sections.next().is_some() {
        return Err(LineError::TrailingData);
    }
    Ok(metric)
}

fn parse_value(raw: &str) -> Option<FieldValue> {
    if let Some(inner) = raw.strip_prefix('"') {
        let inner = inner.strip_suffix('"')?;
        return Some(FieldValue::String(unescape(inner)));
    }
    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Some(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Some(FieldValue::Boolean(false)),
        _ => (),
    }
    if let Some(int) = raw.strip_suffix('i') {
        return int.parse().ok().map(FieldValue::Integer);
    }
    if let Some(uint) = raw.strip_suffix('u') {
        return uint.parse().ok().map(FieldValue::UnsignedInteger);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(FieldValue::Float)
}

fn parse_timestamp(raw: &str) -> Result<SystemTime, LineError> {
    let nanos: i64 = raw.parse().map_err(|_| LineError::InvalidTimestamp(raw.to_owned()))?;
    let offset = Duration::from_nanos(nanos.unsigned_abs());
    let ts = if nanos >= 0 {
        UNIX_EPOCH.checked_add(offset)
    } else {
        UNIX_EPOCH.checked_sub(offset)
    };
    ts.ok_or_else(|| LineError::InvalidTimestamp(raw.to_owned()))
}

/// Splits `key=value` at the first unescaped `=`.
fn split_pair(s: &str, quotes: bool) -> Option<(&str, &str)> {
    let i = find_unescaped(s, '=', quotes)?;
    let (k, v) = (&s[..i], &s[i + 1..]);
    if k.is_empty() || v.is_empty() {
        return None;
    }
    Some((k, v))
}

fn find_unescaped(s: &str, sep: char, quotes: bool) -> Option<usize> {
    let mut escaped = false;
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' if quotes => quoted = !quoted,
            c if c == sep && !quoted => return Some(i),
            _ => (),
        }
    }
    None
}

fn split_unescaped(s: &str, sep: char, quotes: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(i) = find_unescaped(rest, sep, quotes) {
        parts.push(&rest[..i]);
        rest = &rest[i + sep.len_utf8()..];
    }
    parts.push(rest);
    parts
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, ',' | '=' | ' ' | '"' | '\\') {
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
