//! Splitting of oversized GELF payloads into independently sent UDP chunks.

mod gelf;

pub use gelf::{
    ChunkingError, DEFAULT_CHUNK_SIZE, GELF_CHUNK_HEADERS_LENGTH, GELF_MAGIC_BYTES,
    GELF_MAX_TOTAL_CHUNKS, GelfChunker, MAX_CHUNK_SIZE, MessageIdGenerator,
};
