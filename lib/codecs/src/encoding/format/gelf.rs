use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tokio_util::codec::Encoder;

use crate::{
    encoding::BuildError,
    event::{FieldValue, LogEvent},
    gelf::{FieldSanitizer, gelf_fields::*},
};

/// Default cap for additional string values. Graylog stores fields in Elasticsearch/OpenSearch
/// which refuses terms longer than this many bytes.
pub const DEFAULT_MAX_FIELD_LENGTH: usize = 32_766;

const INITIAL_BUFFER_SIZE: usize = 512;

/// Errors raised while turning a log event into a GELF document.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EncodingError {
    /// The event has no short message and no placeholder is configured.
    #[snafu(display("GELF short_message must not be empty"))]
    EmptyShortMessage,

    /// The document could not be serialized to JSON.
    #[snafu(display("Failed to serialize GELF document: {}", source))]
    Serialize {
        /// Underlying serde error.
        source: serde_json::Error,
    },

    /// Writing into the output buffer failed.
    #[snafu(display("I/O error while encoding GELF document: {}", source))]
    Io {
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl From<std::io::Error> for EncodingError {
    fn from(source: std::io::Error) -> Self {
        EncodingError::Io { source }
    }
}

/// Config used to build a `GelfSerializer`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GelfSerializerConfig {
    /// Value of the GELF `host` field.
    pub host: String,

    /// Fields added to every document. Per-event fields with the same name take precedence.
    #[serde(default)]
    pub static_fields: BTreeMap<String, FieldValue>,

    /// Maximum length in bytes of additional string values; longer values are truncated.
    #[serde(default = "default_max_field_length")]
    pub max_field_length: Option<usize>,

    /// Substituted when an event arrives with an empty short message. Without it such events
    /// are rejected.
    #[serde(default)]
    pub short_message_placeholder: Option<String>,
}

const fn default_max_field_length() -> Option<usize> {
    Some(DEFAULT_MAX_FIELD_LENGTH)
}

impl GelfSerializerConfig {
    /// Creates a new `GelfSerializerConfig` for the given origin host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            static_fields: BTreeMap::new(),
            max_field_length: default_max_field_length(),
            short_message_placeholder: None,
        }
    }

    /// Build the `GelfSerializer` from this configuration.
    pub fn build(&self) -> Result<GelfSerializer, BuildError> {
        if self.host.trim().is_empty() {
            return Err("GELF host must not be empty".into());
        }
        if let Some(placeholder) = &self.short_message_placeholder {
            if placeholder.trim().is_empty() {
                return Err("short_message_placeholder must not be empty".into());
            }
        }

        let sanitizer = FieldSanitizer::new(self.max_field_length);
        let static_fields = sanitize_fields(&sanitizer, self.static_fields.clone());

        Ok(GelfSerializer {
            host: self.host.clone(),
            static_fields,
            sanitizer,
            placeholder: self.short_message_placeholder.clone(),
        })
    }
}

/// A GELF 1.1 document, ready to be serialized.
///
/// Additional field keys are stored with their `_` prefix. Keys are kept sorted, so the JSON
/// output for a given document is always the same.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GelfMessage {
    /// GELF spec version, always `1.1`.
    pub version: &'static str,
    /// Origin host.
    pub host: String,
    /// One line summary.
    pub short_message: String,
    /// Long form message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_message: Option<String>,
    /// Seconds since the UNIX epoch, with millisecond precision.
    pub timestamp: f64,
    /// Syslog severity.
    pub level: u8,
    /// Additional fields, keyed by their prefixed name.
    #[serde(flatten)]
    pub additional_fields: BTreeMap<String, FieldValue>,
}

impl GelfMessage {
    /// Serializes the document as JSON.
    pub fn to_json(&self) -> Result<Bytes, EncodingError> {
        let mut buffer = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);
        serde_json::to_writer((&mut buffer).writer(), self).context(SerializeSnafu)?;
        Ok(buffer.freeze())
    }
}

/// Serializer that converts a `LogEvent` to bytes using the GELF format.
/// Spec: https://docs.graylog.org/docs/gelf
#[derive(Debug, Clone)]
pub struct GelfSerializer {
    host: String,
    static_fields: BTreeMap<String, FieldValue>,
    sanitizer: FieldSanitizer,
    placeholder: Option<String>,
}

impl GelfSerializer {
    /// The origin host written into every document.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Builds the GELF document for `event`.
    pub fn to_message(&self, event: LogEvent) -> Result<GelfMessage, EncodingError> {
        let LogEvent {
            timestamp,
            level,
            short_message,
            full_message,
            fields,
        } = event;

        let short_message = if short_message.trim().is_empty() {
            match &self.placeholder {
                Some(placeholder) => placeholder.clone(),
                None => return Err(EncodingError::EmptyShortMessage),
            }
        } else {
            short_message
        };

        let mut merged = self.static_fields.clone();
        merged.extend(sanitize_fields(&self.sanitizer, fields));

        let additional_fields = merged
            .into_iter()
            .map(|(name, value)| (format!("{ADDITIONAL_FIELD_PREFIX}{name}"), value))
            .collect();

        Ok(GelfMessage {
            version: GELF_VERSION,
            host: self.host.clone(),
            short_message,
            full_message: full_message.filter(|message| !message.is_empty()),
            timestamp: timestamp.timestamp_millis() as f64 / 1000.0,
            level: level.syslog_severity(),
            additional_fields,
        })
    }
}

fn sanitize_fields(
    sanitizer: &FieldSanitizer,
    fields: BTreeMap<String, FieldValue>,
) -> BTreeMap<String, FieldValue> {
    fields
        .into_iter()
        .filter_map(|(name, value)| {
            let name = sanitizer.sanitize_name(&name)?.into_owned();
            Some((name, sanitizer.sanitize_value(value)))
        })
        .collect()
}

impl Encoder<LogEvent> for GelfSerializer {
    type Error = EncodingError;

    fn encode(&mut self, event: LogEvent, buffer: &mut BytesMut) -> Result<(), Self::Error> {
        let message = self.to_message(event)?;
        serde_json::to_writer(buffer.writer(), &message).context(SerializeSnafu)
    }
}
