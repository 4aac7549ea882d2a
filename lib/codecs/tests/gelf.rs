use std::io::Read;

use bytes::{Bytes, BytesMut};
use chrono::{TimeZone, Utc};
use codecs::{
    Compression, Compressor, GelfChunker, GelfSerializerConfig, Level, LogEvent,
    MessageIdGenerator, NullDelimitedEncoder, encoding::chunking::GELF_CHUNK_HEADERS_LENGTH,
    gelf_fields::*,
};
use flate2::read::GzDecoder;
use serde_json::{Value, json};
use similar_asserts::assert_eq;
use tokio_util::codec::Encoder;

fn encode(event: LogEvent) -> Bytes {
    GelfSerializerConfig::new("web-01")
        .build()
        .unwrap()
        .to_message(event)
        .unwrap()
        .to_json()
        .unwrap()
}

fn reassemble(chunks: &[Bytes]) -> Vec<u8> {
    let mut ordered = chunks.to_vec();
    ordered.sort_by_key(|chunk| chunk[10]);
    ordered
        .iter()
        .flat_map(|chunk| chunk[GELF_CHUNK_HEADERS_LENGTH..].iter().copied())
        .collect()
}

/// A small error event goes out as one plain datagram.
#[test]
fn gelf_small_event_is_single_datagram() {
    let event = LogEvent::new(Level::Error, "disk full")
        .with_timestamp(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let payload = encode(event);

    let mut chunker = GelfChunker::new(1024, None, MessageIdGenerator::new()).unwrap();
    let datagrams = chunker.chunk(payload.clone()).unwrap();

    assert_eq!(datagrams, vec![payload]);
    let document: Value = serde_json::from_slice(&datagrams[0]).unwrap();
    assert_eq!(document[LEVEL], json!(3));
    assert_eq!(document[SHORT_MESSAGE], json!("disk full"));
}

/// A 50,000 byte full message split into 1 KiB chunks needs 49 chunks.
#[test]
fn gelf_large_event_is_chunked() {
    let event = LogEvent::new(Level::Info, "big").with_full_message("x".repeat(50_000));
    let payload = encode(event);

    let mut chunker = GelfChunker::new(1024, None, MessageIdGenerator::new()).unwrap();
    let chunks = chunker.chunk(payload.clone()).unwrap();

    assert_eq!(chunks.len(), 49);
    let message_id = chunks[0][2..10].to_vec();
    for (sequence, chunk) in chunks.iter().enumerate() {
        assert_eq!(&chunk[..2], &[0x1e, 0x0f]);
        assert_eq!(chunk[2..10].to_vec(), message_id);
        assert_eq!(chunk[10] as usize, sequence);
        assert_eq!(chunk[11], 49);
    }
    assert_eq!(reassemble(&chunks), payload.to_vec());
}

/// Compression runs before chunking, so reassembled chunks decompress to the document.
#[test]
fn gelf_compressed_then_chunked() {
    let event = LogEvent::new(Level::Warn, "noisy")
        .with_full_message((0..20_000).map(|i| (i % 251) as u8 as char).collect::<String>());
    let payload = encode(event);
    let compressed = Compressor::new(Compression::Gzip, Some(1))
        .compress(payload.clone())
        .unwrap();

    let mut chunker = GelfChunker::new(512, None, MessageIdGenerator::new()).unwrap();
    let chunks = chunker.chunk(compressed).unwrap();
    assert!(chunks.len() > 1);

    let mut document = Vec::new();
    GzDecoder::new(&reassemble(&chunks)[..])
        .read_to_end(&mut document)
        .unwrap();
    assert_eq!(document, payload.to_vec());
}

/// Uncompressed JSON never contains a raw null, so every document frames cleanly.
#[test]
fn gelf_stream_framing() {
    let mut buffer = BytesMut::new();
    let mut framer = NullDelimitedEncoder::new();
    for message in ["first", "second\u{0}with escaped null"] {
        framer
            .encode(encode(LogEvent::new(Level::Debug, message)), &mut buffer)
            .unwrap();
    }

    let frames: Vec<&[u8]> = buffer.split(|b| *b == 0).collect();
    assert_eq!(frames.len(), 3);
    assert!(frames[2].is_empty());
    for frame in &frames[..2] {
        let document: Value = serde_json::from_slice(frame).unwrap();
        assert_eq!(document[VERSION], json!("1.1"));
        assert_eq!(document[HOST], json!("web-01"));
    }
}
