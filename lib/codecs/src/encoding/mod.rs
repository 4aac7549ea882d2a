//! A collection of support structures that are used in the process of encoding
//! log events into GELF wire payloads.

pub mod chunking;
pub mod compression;
pub mod format;
pub mod framing;

pub use chunking::{ChunkingError, GelfChunker, MessageIdGenerator};
pub use compression::{Compression, CompressionError, Compressor};
pub use format::{EncodingError, GelfMessage, GelfSerializer, GelfSerializerConfig};
pub use framing::{FramingError, NullDelimitedEncoder};

/// An error that occurred while building an encoder.
pub type BuildError = Box<dyn std::error::Error + Send + Sync + 'static>;
