//! Telemetry records produced by parsers.

use std::time::SystemTime;

use indexmap::IndexMap;

/// The value of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    UnsignedInteger(u64),
    Boolean(bool),
    String(String),
}

/// A single telemetry record: a measurement name, some tags, some fields and a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub tags: IndexMap<String, String>,
    pub fields: IndexMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

impl Metric {
    /// Creates a metric without tags, fields or timestamp.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: IndexMap::new(),
            fields: IndexMap::new(),
            timestamp: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}
