//! Serialization formats that turn a log event into a document.

#![deny(missing_docs)]

mod gelf;

pub use self::gelf::{
    DEFAULT_MAX_FIELD_LENGTH, EncodingError, GelfMessage, GelfSerializer, GelfSerializerConfig,
};
