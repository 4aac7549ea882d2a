//! Producer side of the pipeline: event to GELF document to optionally compressed payload.

use bytes::Bytes;
use codecs::{CompressionError, Compressor, EncodingError, GelfSerializer, LogEvent};
use snafu::{ResultExt, Snafu};

use crate::failure::FailureReason;

#[derive(Debug, Snafu)]
pub enum EncodeError {
    #[snafu(display("{}", source))]
    Serialize { source: EncodingError },
    #[snafu(display("{}", source))]
    Compress { source: CompressionError },
}

impl EncodeError {
    pub const fn reason(&self) -> FailureReason {
        match self {
            EncodeError::Serialize { .. } => FailureReason::Encoding,
            EncodeError::Compress { .. } => FailureReason::Compression,
        }
    }
}

/// Encodes events on the calling thread so the delivery worker only ever does I/O.
#[derive(Clone, Debug)]
pub struct GelfEncoder {
    serializer: GelfSerializer,
    compressor: Compressor,
}

impl GelfEncoder {
    pub const fn new(serializer: GelfSerializer, compressor: Compressor) -> Self {
        Self {
            serializer,
            compressor,
        }
    }

    pub fn encode(&self, event: LogEvent) -> Result<Bytes, EncodeError> {
        let document = self
            .serializer
            .to_message(event)
            .and_then(|message| message.to_json())
            .context(SerializeSnafu)?;
        self.compressor.compress(document).context(CompressSnafu)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use codecs::{Compression, GelfSerializerConfig, Level};
    use flate2::read::GzDecoder;
    use serde_json::Value;

    use super::*;

    fn encoder(compression: Compression) -> GelfEncoder {
        let serializer = GelfSerializerConfig::new("h1").build().unwrap();
        GelfEncoder::new(serializer, Compressor::from(compression))
    }

    #[test]
    fn plain_payload_is_json() {
        let payload = encoder(Compression::None)
            .encode(LogEvent::new(Level::Error, "disk full"))
            .unwrap();

        let document: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(document["host"], "h1");
        assert_eq!(document["level"], 3);
        assert_eq!(document["short_message"], "disk full");
    }

    #[test]
    fn gzip_payload_decompresses_to_document() {
        let payload = encoder(Compression::Gzip)
            .encode(LogEvent::new(Level::Info, "hello").with_field("k", "v"))
            .unwrap();

        let mut json = String::new();
        GzDecoder::new(&payload[..]).read_to_string(&mut json).unwrap();
        let document: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(document["_k"], "v");
    }

    #[test]
    fn empty_short_message_is_an_encoding_failure() {
        let error = encoder(Compression::None)
            .encode(LogEvent::new(Level::Info, ""))
            .unwrap_err();
        assert_eq!(error.reason(), FailureReason::Encoding);
    }
}
