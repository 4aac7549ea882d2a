//! Codecs that turn normalized log events into GELF wire payloads: the GELF
//! serializer, whole-document compression, stream framing and UDP chunking.

#![deny(missing_docs)]

pub mod encoding;
pub mod event;
pub mod gelf;

pub use encoding::{
    ChunkingError, Compression, CompressionError, Compressor, EncodingError, FramingError,
    GelfChunker, GelfMessage, GelfSerializer, GelfSerializerConfig, MessageIdGenerator,
    NullDelimitedEncoder,
};
pub use event::{FieldValue, Level, LogEvent};
pub use gelf::{FieldSanitizer, VALID_FIELD_REGEX, gelf_fields};
