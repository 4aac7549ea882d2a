use bytes::{BufMut, Bytes, BytesMut};
use rand::{RngCore, SeedableRng, rngs::StdRng};
use snafu::Snafu;
use tracing::trace;

/// Maximum number of chunks a collector will reassemble.
pub const GELF_MAX_TOTAL_CHUNKS: usize = 128;

/// Magic bytes, message id, sequence number and sequence count.
pub const GELF_CHUNK_HEADERS_LENGTH: usize = 12;

/// First two bytes of every chunk.
pub const GELF_MAGIC_BYTES: [u8; 2] = [0x1e, 0x0f];

/// Default chunk payload size. Keeps a chunk with its header inside an 8 KiB datagram.
pub const DEFAULT_CHUNK_SIZE: usize = 8192 - GELF_CHUNK_HEADERS_LENGTH;

/// Largest chunk payload that still fits a UDP datagram once the chunk header is added.
pub const MAX_CHUNK_SIZE: usize = 65_467 - GELF_CHUNK_HEADERS_LENGTH;

/// Errors raised while chunking a payload.
#[derive(Debug, Snafu)]
pub enum ChunkingError {
    /// The payload would need more chunks than a collector accepts.
    #[snafu(display(
        "Too many chunks to generate for GELF: {}, max: {}",
        count,
        GELF_MAX_TOTAL_CHUNKS
    ))]
    TooManyChunks {
        /// Number of chunks the payload would need.
        count: usize,
    },

    /// The chunker was configured with sizes outside the accepted bounds.
    #[snafu(display("Invalid GELF chunk size {}: {}", chunk_size, reason))]
    InvalidChunkSize {
        /// The rejected size.
        chunk_size: usize,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Source of GELF message ids.
///
/// Ids only have to be unpredictable enough that concurrent senders do not collide at the
/// collector, so a seeded `StdRng` is drawn from rather than the OS on every message.
#[derive(Debug)]
pub struct MessageIdGenerator {
    rng: StdRng,
}

impl MessageIdGenerator {
    /// Creates a generator seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Creates a generator with a fixed seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draws the next 8-byte message id.
    pub fn next_id(&mut self) -> [u8; 8] {
        let mut id = [0; 8];
        self.rng.fill_bytes(&mut id);
        id
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunks with GELF native chunking format, as documented from the [source][source].
///
/// Payloads up to `single_datagram_threshold` bytes are passed through untouched. Larger ones
/// are split into at most 128 chunks of `chunk_size` payload bytes, each prefixed with a
/// 12 byte header.
///
/// [source]: https://go2docs.graylog.org/current/getting_in_log_data/gelf.html#chunking
#[derive(Debug)]
pub struct GelfChunker {
    chunk_size: usize,
    single_datagram_threshold: usize,
    ids: MessageIdGenerator,
}

impl GelfChunker {
    /// Creates a chunker. `single_datagram_threshold` defaults to `chunk_size`.
    pub fn new(
        chunk_size: usize,
        single_datagram_threshold: Option<usize>,
        ids: MessageIdGenerator,
    ) -> Result<Self, ChunkingError> {
        validate_size(chunk_size)?;
        let single_datagram_threshold = single_datagram_threshold.unwrap_or(chunk_size);
        if single_datagram_threshold == 0 || single_datagram_threshold > 65_467 {
            return Err(ChunkingError::InvalidChunkSize {
                chunk_size: single_datagram_threshold,
                reason: "single datagram threshold must be between 1 and 65467 bytes",
            });
        }

        Ok(Self {
            chunk_size,
            single_datagram_threshold,
            ids,
        })
    }

    /// Splits `bytes` into datagrams. Returns `TooManyChunks` without drawing a message id
    /// when the payload would exceed the chunk limit.
    pub fn chunk(&mut self, bytes: Bytes) -> Result<Vec<Bytes>, ChunkingError> {
        if bytes.len() <= self.single_datagram_threshold {
            return Ok(vec![bytes]);
        }

        let chunk_count = bytes.len().div_ceil(self.chunk_size);
        if chunk_count > GELF_MAX_TOTAL_CHUNKS {
            return Err(ChunkingError::TooManyChunks { count: chunk_count });
        }

        let message_id = self.ids.next_id();

        trace!(
            message_id = u64::from_be_bytes(message_id),
            chunk_count,
            chunk_size = self.chunk_size,
            "Generating chunks for GELF."
        );

        let chunks = bytes
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(i, chunk)| {
                let mut framed = BytesMut::with_capacity(GELF_CHUNK_HEADERS_LENGTH + chunk.len());
                framed.put_slice(&GELF_MAGIC_BYTES);
                framed.put_slice(&message_id);
                framed.put_u8(i as u8);
                framed.put_u8(chunk_count as u8);
                framed.put_slice(chunk);
                framed.freeze()
            })
            .collect();
        Ok(chunks)
    }
}

fn validate_size(chunk_size: usize) -> Result<(), ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize {
            chunk_size,
            reason: "chunks must carry at least one byte",
        });
    }
    if chunk_size > MAX_CHUNK_SIZE {
        return Err(ChunkingError::InvalidChunkSize {
            chunk_size,
            reason: "chunk and header must fit in a 65467 byte datagram",
        });
    }
    Ok(())
}
