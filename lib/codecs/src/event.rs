//! The normalized log event handed to this crate by a host logging adapter.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application severity levels, as most logging frameworks expose them.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// Finer grained than debug.
    Trace,
    /// Diagnostic detail.
    Debug,
    /// Normal operational messages.
    Info,
    /// Something unexpected that did not stop the operation.
    Warn,
    /// An operation failed.
    Error,
    /// The application cannot continue.
    Fatal,
}

impl Level {
    /// Maps the level onto the syslog severity scale (0 = emergency, 7 = debug).
    pub const fn syslog_severity(self) -> u8 {
        match self {
            Level::Fatal => 2,
            Level::Error => 3,
            Level::Warn => 4,
            Level::Info => 6,
            Level::Debug | Level::Trace => 7,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// A scalar additional field value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// UTF-8 text.
    String(String),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Boolean(bool),
}

impl FieldValue {
    /// Returns the string slice when the value is textual.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_owned())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

/// A framework-neutral log event.
///
/// Adapters for a concrete logging framework translate their own records into this structure
/// before handing them to the encoder.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEvent {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Severity of the event.
    pub level: Level,
    /// One line summary of the event.
    pub short_message: String,
    /// Long form message, usually a stack trace.
    pub full_message: Option<String>,
    /// Additional fields, keyed by their unprefixed name.
    pub fields: BTreeMap<String, FieldValue>,
}

impl LogEvent {
    /// Creates an event stamped with the current time.
    pub fn new(level: Level, short_message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            short_message: short_message.into(),
            full_message: None,
            fields: BTreeMap::new(),
        }
    }

    /// Sets the event timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the long form message.
    #[must_use]
    pub fn with_full_message(mut self, full_message: impl Into<String>) -> Self {
        self.full_message = Some(full_message.into());
        self
    }

    /// Adds or replaces an additional field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}
