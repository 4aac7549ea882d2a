//! Whole-document compression applied after serialization and before framing or chunking.

use std::io::{self, Write};

use bytes::Bytes;
use flate2::write::{GzEncoder, ZlibEncoder};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

/// Compression schemes understood by GELF collectors.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Send the document as-is.
    #[default]
    None,
    /// RFC 1952 gzip.
    Gzip,
    /// RFC 1950 zlib.
    Zlib,
}

impl Compression {
    /// Returns `true` unless no compression is applied.
    pub const fn is_compressed(self) -> bool {
        !matches!(self, Compression::None)
    }
}

/// Error raised when finalizing a compressed payload fails.
#[derive(Debug, Snafu)]
#[snafu(display("Failed to compress payload with {:?}: {}", compression, source))]
pub struct CompressionError {
    compression: Compression,
    source: io::Error,
}

enum Writer {
    Plain(Vec<u8>),
    Gzip(GzEncoder<Vec<u8>>),
    Zlib(ZlibEncoder<Vec<u8>>),
}

impl Writer {
    fn new(compression: Compression, level: flate2::Compression, capacity: usize) -> Self {
        let buffer = Vec::with_capacity(capacity);
        match compression {
            Compression::None => Writer::Plain(buffer),
            Compression::Gzip => Writer::Gzip(GzEncoder::new(buffer, level)),
            Compression::Zlib => Writer::Zlib(ZlibEncoder::new(buffer, level)),
        }
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Writer::Plain(buffer) => Ok(buffer),
            Writer::Gzip(writer) => writer.finish(),
            Writer::Zlib(writer) => writer.finish(),
        }
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Writer::Plain(inner) => inner.write(buf),
            Writer::Gzip(writer) => writer.write(buf),
            Writer::Zlib(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::Plain(_) => Ok(()),
            Writer::Gzip(writer) => writer.flush(),
            Writer::Zlib(writer) => writer.flush(),
        }
    }
}

/// Stateless compressor for a fixed scheme and level.
///
/// Compressed output is only guaranteed to decompress back to the input; the exact bytes may
/// differ between library versions.
#[derive(Clone, Copy, Debug)]
pub struct Compressor {
    compression: Compression,
    level: flate2::Compression,
}

impl Compressor {
    /// Creates a compressor. `level` ranges from 0 (store) to 9 (best); `None` uses the
    /// library default.
    pub fn new(compression: Compression, level: Option<u32>) -> Self {
        let level = level
            .map(|level| flate2::Compression::new(level.min(9)))
            .unwrap_or_default();
        Self { compression, level }
    }

    /// The scheme applied by this compressor.
    pub const fn compression(&self) -> Compression {
        self.compression
    }

    /// Compresses `bytes` in one shot.
    pub fn compress(&self, bytes: Bytes) -> Result<Bytes, CompressionError> {
        if !self.compression.is_compressed() {
            return Ok(bytes);
        }

        let mut writer = Writer::new(self.compression, self.level, bytes.len() / 2);
        writer
            .write_all(&bytes)
            .and_then(|_| writer.finish())
            .map(Bytes::from)
            .context(CompressionSnafu {
                compression: self.compression,
            })
    }
}

impl From<Compression> for Compressor {
    fn from(compression: Compression) -> Self {
        Self::new(compression, None)
    }
}
