//! User facing configuration and its validation into a ready-to-run pipeline.

use std::{collections::BTreeMap, time::Duration};

use codecs::{
    Compression, Compressor, FieldValue, GelfChunker, GelfSerializerConfig, MessageIdGenerator,
    encoding::chunking::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE},
    encoding::format::DEFAULT_MAX_FIELD_LENGTH,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::{
    buffers::WhenFull,
    encoder::GelfEncoder,
    sinks::{
        Transport,
        util::{
            DisconnectedPolicy, ReconnectMode, RecycleLimits, TcpTransport, TcpTransportOptions,
            UdpTransport,
        },
    },
    tls::{MaybeTlsSettings, TlsConfig, TlsError},
    worker::WorkerSettings,
};

pub const DEFAULT_PORT: u16 = 12201;

#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("Failed to parse configuration: {}", source))]
    Parse { source: toml::de::Error },
    #[snafu(display("Collector host must not be empty."))]
    MissingHost,
    #[snafu(display("Collector port must not be zero."))]
    MissingPort,
    #[snafu(display("Origin host must not be empty."))]
    MissingOriginHost,
    #[snafu(display("TLS is only supported with the tcp protocol."))]
    TlsRequiresTcp,
    #[snafu(display(
        "Compression {:?} cannot be used with tcp; compressed bytes may contain the frame delimiter.",
        compression
    ))]
    CompressionOverTcp { compression: Compression },
    #[snafu(display("Compression level {} is out of range 0..=9.", level))]
    InvalidCompressionLevel { level: u32 },
    #[snafu(display("Invalid UDP chunking: {}", source))]
    Chunking { source: codecs::ChunkingError },
    #[snafu(display("Invalid GELF encoding settings: {}", source))]
    Serializer { source: crate::Error },
    #[snafu(display("Invalid TLS settings: {}", source))]
    Tls { source: TlsError },
    #[snafu(display("Queue capacity must be at least 1."))]
    QueueCapacity,
    #[snafu(display("pending_capacity must be at least 1 when buffering while disconnected."))]
    PendingCapacity,
}

/// Transport used to reach the collector.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    #[serde(alias = "UDP")]
    Udp,
    #[serde(alias = "TCP")]
    Tcp,
}

impl Protocol {
    /// The queue-full policy used when none is configured. UDP is lossy anyway, so producers
    /// never wait for it; TCP producers wait briefly for a reconnect.
    pub const fn default_when_full(self) -> WhenFull {
        match self {
            Protocol::Udp => WhenFull::DropNewest,
            Protocol::Tcp => WhenFull::Block,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GelfConfig {
    /// Collector host name or IP address.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub protocol: Protocol,

    /// Value of the GELF `host` field. Defaults to this machine's hostname.
    #[serde(default)]
    pub origin_host: Option<String>,

    /// Additional fields attached to every message.
    #[serde(default)]
    pub static_fields: BTreeMap<String, FieldValue>,

    #[serde(default)]
    pub encoding: EncodingConfig,

    #[serde(default)]
    pub udp: UdpConfig,

    #[serde(default)]
    pub tcp: TcpConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EncodingConfig {
    #[serde(default)]
    pub compression: Compression,

    /// 0 (fastest) to 9 (smallest).
    #[serde(default)]
    pub compression_level: Option<u32>,

    /// Longer string values of additional fields are truncated. Unset disables truncation.
    #[serde(default = "default_max_field_length")]
    pub max_field_length: Option<usize>,

    #[serde(default)]
    pub short_message_placeholder: Option<String>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            compression_level: None,
            max_field_length: default_max_field_length(),
            short_message_placeholder: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UdpConfig {
    /// Payload bytes per chunk, excluding the 12 byte chunk header.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Payloads up to this size go out as a single datagram. Defaults to `chunk_size`.
    #[serde(default)]
    pub single_datagram_threshold: Option<usize>,

    #[serde(default)]
    pub send_buffer_size: Option<usize>,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            single_datagram_threshold: None,
            send_buffer_size: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TcpConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// A write that makes no progress for this long drops the connection.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Delay before the first reconnect attempt; doubles on each failure.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_max_reconnect_interval_ms")]
    pub max_reconnect_interval_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectMode,

    #[serde(default)]
    pub when_disconnected: DisconnectedPolicy,

    #[serde(default = "default_pending_capacity")]
    pub pending_capacity: usize,

    #[serde(default)]
    pub max_connection_lifetime_secs: Option<u64>,

    #[serde(default)]
    pub max_connection_idle_secs: Option<u64>,

    #[serde(default)]
    pub send_buffer_size: Option<usize>,

    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_interval_ms: default_max_reconnect_interval_ms(),
            reconnect: ReconnectMode::default(),
            when_disconnected: DisconnectedPolicy::default(),
            pending_capacity: default_pending_capacity(),
            max_connection_lifetime_secs: None,
            max_connection_idle_secs: None,
            send_buffer_size: None,
            tls: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Defaults to `drop_newest` for udp and `block` for tcp.
    #[serde(default)]
    pub when_full: Option<WhenFull>,

    /// Upper bound on how long `block` waits for space.
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    #[serde(default = "default_shutdown_grace_period_ms")]
    pub shutdown_grace_period_ms: u64,

    /// Messages that waited longer than this are dropped instead of sent.
    #[serde(default)]
    pub max_item_age_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            when_full: None,
            block_timeout_ms: default_block_timeout_ms(),
            shutdown_grace_period_ms: default_shutdown_grace_period_ms(),
            max_item_age_ms: None,
        }
    }
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_max_field_length() -> Option<usize> {
    Some(DEFAULT_MAX_FIELD_LENGTH)
}

const fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

const fn default_connect_timeout_ms() -> u64 {
    15_000
}

const fn default_write_timeout_ms() -> u64 {
    30_000
}

const fn default_reconnect_interval_ms() -> u64 {
    500
}

const fn default_max_reconnect_interval_ms() -> u64 {
    60_000
}

const fn default_pending_capacity() -> usize {
    1000
}

const fn default_queue_capacity() -> usize {
    8192
}

const fn default_block_timeout_ms() -> u64 {
    100
}

const fn default_shutdown_grace_period_ms() -> u64 {
    2000
}

/// Queue and worker settings resolved from `QueueConfig`.
#[derive(Clone, Copy, Debug)]
pub struct QueueSettings {
    pub capacity: usize,
    pub when_full: WhenFull,
    pub block_timeout: Duration,
    pub worker: WorkerSettings,
}

/// Everything a `GelfAppender` needs, validated and constructed.
pub struct Pipeline {
    pub encoder: GelfEncoder,
    pub transport: Box<dyn Transport>,
    pub queue: QueueSettings,
}

impl GelfConfig {
    pub fn new(host: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            protocol,
            origin_host: None,
            static_fields: BTreeMap::new(),
            encoding: EncodingConfig::default(),
            udp: UdpConfig::default(),
            tcp: TcpConfig::default(),
            queue: QueueConfig::default(),
        }
    }

    pub fn from_toml(input: &str) -> Result<Self, BuildError> {
        toml::from_str(input).context(ParseSnafu)
    }

    /// Validates the configuration and constructs every component. Nothing touches the network
    /// yet; the collector host is resolved when the first connection is made.
    pub fn build(&self) -> Result<Pipeline, BuildError> {
        if self.host.trim().is_empty() {
            return Err(BuildError::MissingHost);
        }
        if self.port == 0 {
            return Err(BuildError::MissingPort);
        }

        let encoder = self.build_encoder()?;
        let transport = match self.protocol {
            Protocol::Udp => self.build_udp()?,
            Protocol::Tcp => self.build_tcp()?,
        };

        if self.queue.capacity == 0 {
            return Err(BuildError::QueueCapacity);
        }
        let queue = QueueSettings {
            capacity: self.queue.capacity,
            when_full: self
                .queue
                .when_full
                .unwrap_or_else(|| self.protocol.default_when_full()),
            block_timeout: Duration::from_millis(self.queue.block_timeout_ms),
            worker: WorkerSettings {
                shutdown_grace_period: Duration::from_millis(self.queue.shutdown_grace_period_ms),
                max_item_age: self.queue.max_item_age_ms.map(Duration::from_millis),
            },
        };

        Ok(Pipeline {
            encoder,
            transport,
            queue,
        })
    }

    fn origin_host(&self) -> Result<String, BuildError> {
        match &self.origin_host {
            Some(host) if host.trim().is_empty() => Err(BuildError::MissingOriginHost),
            Some(host) => Ok(host.clone()),
            None => Ok(local_hostname()),
        }
    }

    fn build_encoder(&self) -> Result<GelfEncoder, BuildError> {
        let encoding = &self.encoding;
        if let Some(level) = encoding.compression_level {
            if level > 9 {
                return Err(BuildError::InvalidCompressionLevel { level });
            }
        }
        if self.protocol == Protocol::Tcp && encoding.compression.is_compressed() {
            return Err(BuildError::CompressionOverTcp {
                compression: encoding.compression,
            });
        }

        let serializer = GelfSerializerConfig {
            host: self.origin_host()?,
            static_fields: self.static_fields.clone(),
            max_field_length: encoding.max_field_length,
            short_message_placeholder: encoding.short_message_placeholder.clone(),
        }
        .build()
        .context(SerializerSnafu)?;
        let compressor = Compressor::new(encoding.compression, encoding.compression_level);

        Ok(GelfEncoder::new(serializer, compressor))
    }

    fn build_udp(&self) -> Result<Box<dyn Transport>, BuildError> {
        if self
            .tcp
            .tls
            .as_ref()
            .is_some_and(|tls| tls.enabled.unwrap_or(false))
        {
            return Err(BuildError::TlsRequiresTcp);
        }

        let chunker = GelfChunker::new(
            self.udp.chunk_size,
            self.udp.single_datagram_threshold,
            MessageIdGenerator::new(),
        )
        .context(ChunkingSnafu)?;

        Ok(Box::new(UdpTransport::new(
            self.host.clone(),
            self.port,
            chunker,
            self.udp.send_buffer_size,
        )))
    }

    fn build_tcp(&self) -> Result<Box<dyn Transport>, BuildError> {
        let tcp = &self.tcp;
        if tcp.when_disconnected == DisconnectedPolicy::Buffer && tcp.pending_capacity == 0 {
            return Err(BuildError::PendingCapacity);
        }

        let tls = MaybeTlsSettings::from_config(tcp.tls.as_ref()).context(TlsSnafu)?;
        let options = TcpTransportOptions {
            connect_timeout: Duration::from_millis(tcp.connect_timeout_ms),
            write_timeout: Duration::from_millis(tcp.write_timeout_ms),
            reconnect_interval: Duration::from_millis(tcp.reconnect_interval_ms),
            max_reconnect_interval: Duration::from_millis(
                tcp.max_reconnect_interval_ms.max(tcp.reconnect_interval_ms),
            ),
            reconnect_mode: tcp.reconnect,
            when_disconnected: tcp.when_disconnected,
            pending_capacity: tcp.pending_capacity,
            recycle: RecycleLimits {
                max_lifetime: tcp.max_connection_lifetime_secs.map(Duration::from_secs),
                max_idle: tcp.max_connection_idle_secs.map(Duration::from_secs),
            },
            send_buffer_size: tcp.send_buffer_size,
        };

        Ok(Box::new(TcpTransport::new(
            self.host.clone(),
            self.port,
            tls,
            options,
        )))
    }
}

fn local_hostname() -> String {
    match hostname::get().map(|name| name.into_string()) {
        Ok(Ok(name)) if !name.is_empty() => name,
        _ => {
            warn!(message = "Unable to determine hostname; using \"localhost\" as origin host.");
            "localhost".to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::TlsOptions;

    fn assert_build_error(config: &GelfConfig, matches: impl Fn(&BuildError) -> bool) {
        match config.build() {
            Ok(_) => panic!("expected build to fail"),
            Err(error) => assert!(matches(&error), "unexpected error: {error}"),
        }
    }

    #[test]
    fn parses_minimal_toml_with_defaults() {
        let config = GelfConfig::from_toml(r#"host = "graylog.example.org""#).unwrap();

        assert_eq!(config.port, 12201);
        assert_eq!(config.protocol, Protocol::Udp);
        assert_eq!(config.udp.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.encoding.compression, Compression::None);
        assert_eq!(config.queue.capacity, 8192);

        let pipeline = config.build().unwrap();
        assert_eq!(pipeline.transport.protocol(), "udp");
        assert_eq!(pipeline.queue.when_full, WhenFull::DropNewest);
    }

    #[test]
    fn parses_full_toml() {
        let config = GelfConfig::from_toml(
            r#"
            host = "graylog.example.org"
            port = 12202
            protocol = "tcp"
            origin_host = "h1"

            [static_fields]
            app = "billing"
            shard = 3

            [encoding]
            max_field_length = 1024
            short_message_placeholder = "-"

            [tcp]
            connect_timeout_ms = 1000
            reconnect = "eager"
            when_disconnected = "buffer"
            pending_capacity = 10
            max_connection_idle_secs = 30

            [tcp.tls]
            enabled = false
            verify_hostname = true

            [queue]
            capacity = 100
            when_full = "drop_oldest"
            max_item_age_ms = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.static_fields["shard"], FieldValue::from(3));
        assert_eq!(config.tcp.reconnect, ReconnectMode::Eager);

        let pipeline = config.build().unwrap();
        assert_eq!(pipeline.transport.protocol(), "tcp");
        assert!(pipeline.transport.reconnect_tick().is_some());
        assert_eq!(pipeline.queue.when_full, WhenFull::DropOldest);
        assert_eq!(
            pipeline.queue.worker.max_item_age,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn tcp_defaults_to_blocking_queue() {
        let pipeline = GelfConfig::new("localhost", Protocol::Tcp).build().unwrap();
        assert_eq!(pipeline.queue.when_full, WhenFull::Block);
        assert_eq!(pipeline.queue.block_timeout, Duration::from_millis(100));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = GelfConfig::from_toml(
            r#"
            host = "localhost"
            [udp]
            chunk_sise = 10
            "#,
        )
        .unwrap_err();
        assert!(matches!(error, BuildError::Parse { .. }));
    }

    #[test]
    fn protocol_accepts_upper_case() {
        let config = GelfConfig::from_toml(
            r#"
            host = "localhost"
            protocol = "TCP"
            "#,
        )
        .unwrap();
        assert_eq!(config.protocol, Protocol::Tcp);
    }

    #[test]
    fn invalid_host_and_port_are_fatal() {
        assert_build_error(&GelfConfig::new(" ", Protocol::Udp), |error| {
            matches!(error, BuildError::MissingHost)
        });

        let mut config = GelfConfig::new("localhost", Protocol::Udp);
        config.port = 0;
        assert_build_error(&config, |error| matches!(error, BuildError::MissingPort));
    }

    #[test]
    fn compression_over_tcp_is_rejected() {
        let mut config = GelfConfig::new("localhost", Protocol::Tcp);
        config.encoding.compression = Compression::Gzip;
        assert_build_error(&config, |error| {
            matches!(error, BuildError::CompressionOverTcp { .. })
        });
    }

    #[test]
    fn tls_over_udp_is_rejected() {
        let mut config = GelfConfig::new("localhost", Protocol::Udp);
        config.tcp.tls = Some(TlsConfig::enabled());
        assert_build_error(&config, |error| matches!(error, BuildError::TlsRequiresTcp));
    }

    #[test]
    fn chunk_size_bounds_are_checked() {
        let mut config = GelfConfig::new("localhost", Protocol::Udp);
        config.udp.chunk_size = 0;
        assert_build_error(&config, |error| matches!(error, BuildError::Chunking { .. }));

        config.udp.chunk_size = MAX_CHUNK_SIZE + 1;
        assert_build_error(&config, |error| matches!(error, BuildError::Chunking { .. }));

        config.udp.chunk_size = MAX_CHUNK_SIZE;
        assert!(config.build().is_ok());
    }

    #[test]
    fn unreadable_tls_material_is_fatal() {
        let mut config = GelfConfig::new("localhost", Protocol::Tcp);
        config.tcp.tls = Some(TlsConfig {
            enabled: Some(true),
            options: TlsOptions {
                ca_file: Some("/nonexistent/ca.crt".into()),
                ..Default::default()
            },
        });
        assert_build_error(&config, |error| matches!(error, BuildError::Tls { .. }));
    }

    #[test]
    fn other_validation_errors() {
        let mut config = GelfConfig::new("localhost", Protocol::Udp);
        config.encoding.compression_level = Some(10);
        assert_build_error(&config, |error| {
            matches!(error, BuildError::InvalidCompressionLevel { level: 10 })
        });

        let mut config = GelfConfig::new("localhost", Protocol::Udp);
        config.origin_host = Some(String::new());
        assert_build_error(&config, |error| matches!(error, BuildError::MissingOriginHost));

        let mut config = GelfConfig::new("localhost", Protocol::Udp);
        config.queue.capacity = 0;
        assert_build_error(&config, |error| matches!(error, BuildError::QueueCapacity));

        let mut config = GelfConfig::new("localhost", Protocol::Tcp);
        config.tcp.when_disconnected = DisconnectedPolicy::Buffer;
        config.tcp.pending_capacity = 0;
        assert_build_error(&config, |error| matches!(error, BuildError::PendingCapacity));
    }

    #[test]
    fn origin_host_defaults_to_hostname() {
        let config = GelfConfig::new("localhost", Protocol::Udp);
        assert!(!config.origin_host().unwrap().is_empty());
    }
}
