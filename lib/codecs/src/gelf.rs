//! Contains common definitions for GELF codec support

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::event::FieldValue;

/// GELF Message fields. Definitions from <https://docs.graylog.org/docs/gelf>.
pub mod gelf_fields {

    /// (not a field) The latest version of the GELF specification.
    pub const GELF_VERSION: &str = "1.1";

    /// (required) GELF spec version
    pub const VERSION: &str = "version";

    /// (required) The name of the host, source or application that sent this message.
    pub const HOST: &str = "host";

    /// (required) A short descriptive message.
    pub const SHORT_MESSAGE: &str = "short_message";

    /// (optional) A long message that can i.e. contain a backtrace
    pub const FULL_MESSAGE: &str = "full_message";

    /// (optional) Seconds since UNIX epoch with optional decimal places for milliseconds.
    ///  SHOULD be set by client library. Will be set to the current timestamp (now) by the server if absent.
    pub const TIMESTAMP: &str = "timestamp";

    /// (optional) The level equal to the standard syslog levels. default is 1 (ALERT).
    pub const LEVEL: &str = "level";

    /// Additional field names are prefixed with this character on the wire.
    pub const ADDITIONAL_FIELD_PREFIX: char = '_';

    /// Additional field name the collector reserves for its own message id.
    pub const RESERVED_ID: &str = "id";
}

/// Regex for matching valid field names. Must contain only ASCII letters, digits, underscores,
/// periods and dashes. The `_` prefix of additional fields is added by the serializer and is not
/// part of this check.
pub static VALID_FIELD_REGEX: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap()
});

static INVALID_FIELD_CHARS: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"[^A-Za-z0-9_.\-]+").unwrap()
});

/// Normalizes additional field names and values so that they can be sent as GELF.
///
/// Names containing characters outside `[A-Za-z0-9_.-]` have each run of offending characters
/// replaced by a dash. Names that end up empty, and the reserved name `id`, are dropped.
/// String values longer than `max_value_length` bytes are truncated on a character boundary;
/// non-finite floats, which JSON cannot carry, are sent as their string form.
#[derive(Clone, Debug, Default)]
pub struct FieldSanitizer {
    max_value_length: Option<usize>,
}

impl FieldSanitizer {
    /// Creates a sanitizer truncating string values to `max_value_length` bytes, if set.
    pub const fn new(max_value_length: Option<usize>) -> Self {
        Self { max_value_length }
    }

    /// Returns the normalized name, or `None` if the field must be dropped.
    pub fn sanitize_name<'a>(&self, name: &'a str) -> Option<Cow<'a, str>> {
        let name = if VALID_FIELD_REGEX.is_match(name) {
            Cow::Borrowed(name)
        } else {
            INVALID_FIELD_CHARS.replace_all(name, "-")
        };

        if name.is_empty() {
            debug!(message = "Dropping additional field with empty name.");
            return None;
        }
        if name == gelf_fields::RESERVED_ID {
            debug!(
                message = "Dropping reserved additional field.",
                field = gelf_fields::RESERVED_ID
            );
            return None;
        }
        Some(name)
    }

    /// Returns the value in a form that is safe to serialize as a GELF additional field.
    pub fn sanitize_value(&self, value: FieldValue) -> FieldValue {
        match value {
            FieldValue::String(s) => FieldValue::String(self.truncate(s)),
            FieldValue::Float(f) if !f.is_finite() => FieldValue::String(f.to_string()),
            other => other,
        }
    }

    /// Truncates `s` to at most `max_value_length` bytes without splitting a character.
    pub fn truncate(&self, mut s: String) -> String {
        if let Some(max) = self.max_value_length {
            if s.len() > max {
                let mut end = max;
                while !s.is_char_boundary(end) {
                    end -= 1;
                }
                s.truncate(end);
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    #[test]
    fn valid_names_are_borrowed() {
        let sanitizer = FieldSanitizer::default();
        assert!(matches!(
            sanitizer.sanitize_name("logger.name-1_x"),
            Some(Cow::Borrowed("logger.name-1_x"))
        ));
    }

    #[test]
    fn invalid_characters_are_replaced() {
        let sanitizer = FieldSanitizer::default();
        assert_eq!(
            sanitizer.sanitize_name("user name/äöü").as_deref(),
            Some("user-name-")
        );
    }

    #[test]
    fn reserved_and_empty_names_are_dropped() {
        let sanitizer = FieldSanitizer::default();
        assert_eq!(sanitizer.sanitize_name("id"), None);
        assert_eq!(sanitizer.sanitize_name(""), None);
        // `_id` is a different additional field and is allowed.
        assert_eq!(sanitizer.sanitize_name("_id").as_deref(), Some("_id"));
    }

    #[test]
    #[traced_test]
    fn dropping_reserved_name_is_logged() {
        assert_eq!(FieldSanitizer::default().sanitize_name("id"), None);
        assert!(logs_contain("Dropping reserved additional field."));
    }

    #[test]
    fn strings_are_truncated_on_char_boundary() {
        let sanitizer = FieldSanitizer::new(Some(4));
        assert_eq!(
            sanitizer.sanitize_value(FieldValue::from("abcdef")),
            FieldValue::from("abcd")
        );
        // 'é' is two bytes; cutting at 4 would split it.
        assert_eq!(
            sanitizer.sanitize_value(FieldValue::from("abcé")),
            FieldValue::from("abc")
        );
        assert_eq!(
            sanitizer.sanitize_value(FieldValue::from(123_456_789)),
            FieldValue::from(123_456_789)
        );
    }

    #[test]
    fn non_finite_floats_become_strings() {
        let sanitizer = FieldSanitizer::default();
        assert_eq!(
            sanitizer.sanitize_value(FieldValue::Float(f64::NAN)),
            FieldValue::from("NaN")
        );
        assert_eq!(
            sanitizer.sanitize_value(FieldValue::Float(f64::INFINITY)),
            FieldValue::from("inf")
        );
    }

    proptest! {
        #[test]
        fn sanitized_names_are_always_valid(name in ".{0,40}") {
            let sanitizer = FieldSanitizer::default();
            if let Some(sanitized) = sanitizer.sanitize_name(&name) {
                prop_assert!(VALID_FIELD_REGEX.is_match(&sanitized));
                prop_assert_ne!(&*sanitized, "id");
            }
        }

        #[test]
        fn truncation_respects_limit(s in ".{0,64}", max in 0usize..32) {
            let sanitizer = FieldSanitizer::new(Some(max));
            let truncated = sanitizer.truncate(s.clone());
            prop_assert!(truncated.len() <= max);
            prop_assert!(s.starts_with(&truncated));
        }
    }
}
