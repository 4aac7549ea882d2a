use std::{
    collections::HashSet,
    net::UdpSocket,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use chrono::{TimeZone, Utc};
use codecs::{Compressor, GelfSerializerConfig};
use gelf_shipper::{
    Compression, DeliveryFailure, EventAdapter, FailureCallback, FailureReason, GelfAppender,
    GelfConfig, Level, LogEvent, ShuttingDownError,
    buffers::WhenFull,
    config::{Pipeline, QueueSettings},
    encoder::GelfEncoder,
    test_util::{FakeTransport, trace_init},
    worker::WorkerSettings,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

fn pipeline(transport: FakeTransport, capacity: usize, when_full: WhenFull) -> Pipeline {
    let serializer = GelfSerializerConfig::new("h1").build().unwrap();
    Pipeline {
        encoder: GelfEncoder::new(serializer, Compressor::from(Compression::None)),
        transport: Box::new(transport),
        queue: QueueSettings {
            capacity,
            when_full,
            block_timeout: Duration::from_secs(10),
            worker: WorkerSettings {
                shutdown_grace_period: Duration::from_secs(10),
                max_item_age: None,
            },
        },
    }
}

fn short_message(payload: &[u8]) -> String {
    let document: Value = serde_json::from_slice(payload).unwrap();
    document["short_message"].as_str().unwrap().to_owned()
}

#[test]
fn every_produced_event_is_sent_exactly_once() {
    const PRODUCERS: usize = 8;
    const EVENTS: usize = 200;

    trace_init();
    let transport = FakeTransport::new();
    let appender = Arc::new(
        GelfAppender::launch(pipeline(transport.clone(), 32, WhenFull::Block), None).unwrap(),
    );

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let appender = Arc::clone(&appender);
            thread::spawn(move || {
                for event in 0..EVENTS {
                    appender
                        .submit(LogEvent::new(Level::Info, format!("{producer}-{event}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    appender.shutdown();

    let sent: Vec<_> = transport
        .sent()
        .iter()
        .map(|payload| short_message(payload))
        .collect();
    assert_eq!(sent.len(), PRODUCERS * EVENTS);
    let unique: HashSet<_> = sent.iter().collect();
    assert_eq!(unique.len(), PRODUCERS * EVENTS);

    // Each producer's events keep their relative order.
    for producer in 0..PRODUCERS {
        let prefix = format!("{producer}-");
        let order: Vec<usize> = sent
            .iter()
            .filter_map(|message| message.strip_prefix(&prefix))
            .map(|event| event.parse().unwrap())
            .collect();
        assert_eq!(order, (0..EVENTS).collect::<Vec<_>>());
    }

    let stats = appender.stats();
    assert_eq!(stats.enqueued, (PRODUCERS * EVENTS) as u64);
    assert_eq!(stats.sent, (PRODUCERS * EVENTS) as u64);
}

#[test]
fn drop_newest_never_blocks_a_producer() {
    trace_init();
    let transport = FakeTransport::new().with_delay(Duration::from_millis(500));
    let failures = Arc::new(Mutex::new(Vec::new()));
    let callback: FailureCallback = {
        let failures = Arc::clone(&failures);
        Arc::new(move |failure: &DeliveryFailure| failures.lock().push(failure.reason))
    };
    let mut pipeline = pipeline(transport, 2, WhenFull::DropNewest);
    pipeline.queue.worker.shutdown_grace_period = Duration::ZERO;
    let appender = GelfAppender::launch(pipeline, Some(callback)).unwrap();

    let started = Instant::now();
    for i in 0..20 {
        appender
            .submit(LogEvent::new(Level::Debug, format!("burst {i}")))
            .unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(400));

    appender.shutdown();
    let queue_full = failures
        .lock()
        .iter()
        .filter(|reason| **reason == FailureReason::QueueFull)
        .count();
    // At most one event is in flight and two are queued when the burst ends.
    assert!(queue_full >= 17, "only {queue_full} events were rejected");
}

#[test]
fn submit_after_shutdown_is_rejected() {
    trace_init();
    let appender =
        GelfAppender::launch(pipeline(FakeTransport::new(), 4, WhenFull::Block), None).unwrap();
    appender.shutdown();

    assert_eq!(
        appender.submit(LogEvent::new(Level::Error, "too late")),
        Err(ShuttingDownError)
    );
}

struct Record {
    millis: i64,
    logger: &'static str,
    level: &'static str,
    text: String,
}

struct RecordAdapter;

impl EventAdapter for RecordAdapter {
    type Event = Record;

    fn normalize(&self, record: &Record) -> LogEvent {
        let level = match record.level {
            "ERROR" => Level::Error,
            "WARN" => Level::Warn,
            _ => Level::Info,
        };
        LogEvent::new(level, record.text.clone())
            .with_timestamp(Utc.timestamp_millis_opt(record.millis).unwrap())
            .with_field("logger", record.logger)
    }
}

#[test]
fn toml_configured_appender_ships_adapted_records_over_udp() {
    trace_init();
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let addr = socket.local_addr().unwrap();

    let config = GelfConfig::from_toml(&format!(
        r#"
        host = "127.0.0.1"
        port = {}
        origin_host = "web-01"

        [static_fields]
        environment = "test"
        logger = "overridden"
        "#,
        addr.port()
    ))
    .unwrap();
    let appender = GelfAppender::start(&config, None).unwrap();

    appender
        .append(
            &RecordAdapter,
            &Record {
                millis: 1_700_000_000_123,
                logger: "billing",
                level: "ERROR",
                text: "payment failed".to_owned(),
            },
        )
        .unwrap();
    appender.shutdown();

    let mut buf = [0; 8192];
    let size = socket.recv(&mut buf).unwrap();
    let document: Value = serde_json::from_slice(&buf[..size]).unwrap();
    similar_asserts::assert_eq!(
        document,
        json!({
            "version": "1.1",
            "host": "web-01",
            "short_message": "payment failed",
            "timestamp": 1_700_000_000.123,
            "level": 3,
            "_environment": "test",
            "_logger": "billing",
        })
    );
}
