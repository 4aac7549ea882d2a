use bytes::{BufMut, Bytes, BytesMut};
use snafu::Snafu;
use tokio_util::codec::Encoder;

const NULL_BYTE: u8 = 0x00;

/// An error that occurred while framing a payload.
#[derive(Debug, Snafu)]
pub enum FramingError {
    /// The payload contains the frame terminator and would be split by the collector.
    #[snafu(display("Payload contains a null byte at offset {}", position))]
    EmbeddedNull {
        /// Offset of the first null byte.
        position: usize,
    },

    /// The underlying stream failed.
    #[snafu(display("I/O error while framing: {}", source))]
    Io {
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl From<std::io::Error> for FramingError {
    fn from(source: std::io::Error) -> Self {
        FramingError::Io { source }
    }
}

/// Terminates each GELF document with a single `0x00` byte, the framing GELF TCP inputs expect.
///
/// Payloads that already contain a null byte are refused rather than sent, since the collector
/// would read them as two truncated messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDelimitedEncoder;

impl NullDelimitedEncoder {
    /// Creates a new `NullDelimitedEncoder`.
    pub const fn new() -> Self {
        Self
    }

    /// Checks that `payload` can be framed.
    pub fn validate(payload: &[u8]) -> Result<(), FramingError> {
        match memchr::memchr(NULL_BYTE, payload) {
            Some(position) => Err(FramingError::EmbeddedNull { position }),
            None => Ok(()),
        }
    }
}

impl Encoder<Bytes> for NullDelimitedEncoder {
    type Error = FramingError;

    fn encode(&mut self, payload: Bytes, buffer: &mut BytesMut) -> Result<(), FramingError> {
        Self::validate(&payload)?;
        buffer.reserve(payload.len() + 1);
        buffer.put(payload);
        buffer.put_u8(NULL_BYTE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_bytes() {
        let mut buffer = BytesMut::new();
        let mut encoder = NullDelimitedEncoder::new();

        encoder
            .encode(Bytes::from_static(b"{\"a\":1}"), &mut buffer)
            .unwrap();
        encoder
            .encode(Bytes::from_static(b"{\"b\":2}"), &mut buffer)
            .unwrap();

        assert_eq!(&buffer[..], b"{\"a\":1}\0{\"b\":2}\0");
    }

    #[test]
    fn encode_empty_payload() {
        let mut buffer = BytesMut::new();
        NullDelimitedEncoder::new()
            .encode(Bytes::new(), &mut buffer)
            .unwrap();
        assert_eq!(&buffer[..], b"\0");
    }

    #[test]
    fn rejects_embedded_null() {
        let mut buffer = BytesMut::new();
        let error = NullDelimitedEncoder::new()
            .encode(Bytes::from_static(b"ab\0cd"), &mut buffer)
            .unwrap_err();

        assert!(matches!(error, FramingError::EmbeddedNull { position: 2 }));
        assert!(buffer.is_empty());
    }
}
