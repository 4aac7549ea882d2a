//! Network transports for encoded GELF payloads.

pub mod util;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use codecs::{ChunkingError, FramingError};
use snafu::Snafu;

use crate::tls::TlsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("Unable to resolve DNS for {}: {}", host, source))]
    Dns {
        host: String,
        source: std::io::Error,
    },
    #[snafu(display("No addresses returned for {}.", host))]
    NoAddresses { host: String },
    #[snafu(display("Failed to bind UDP socket: {}", source))]
    UdpBind { source: std::io::Error },
    #[snafu(display("Failed to connect UDP socket: {}", source))]
    UdpConnect { source: std::io::Error },
    #[snafu(display("Connect error: {}", source))]
    Connect { source: TlsError },
    #[snafu(display("Connect timed out after {:?}.", timeout))]
    ConnectTimeout { timeout: Duration },
    #[snafu(display("Write error: {}", source))]
    Write { source: std::io::Error },
    #[snafu(display("Sent {} of {} bytes of a datagram.", sent, data_size))]
    IncompleteDatagram { data_size: usize, sent: usize },
    #[snafu(display("Payload cannot be framed: {}", source))]
    Framing { source: FramingError },
    #[snafu(display("Payload cannot be chunked: {}", source))]
    Chunking { source: ChunkingError },
    #[snafu(display("Not connected; payload dropped."))]
    Disconnected,
    #[snafu(display("Pending buffer of {} payloads is full; oldest payload dropped.", capacity))]
    PendingOverflow { capacity: usize },
    #[snafu(display("Transport is closed."))]
    Closed,
}

impl TransportError {
    /// Failures that happened before or while establishing a connection.
    pub const fn is_connect(&self) -> bool {
        matches!(
            self,
            Self::Dns { .. }
                | Self::NoAddresses { .. }
                | Self::UdpBind { .. }
                | Self::UdpConnect { .. }
                | Self::Connect { .. }
                | Self::ConnectTimeout { .. }
                | Self::Disconnected
                | Self::PendingOverflow { .. }
        )
    }
}

/// A destination for encoded payloads. Owned and driven by a single delivery worker.
#[async_trait]
pub trait Transport: Send {
    /// Short protocol name used in logs and metrics.
    fn protocol(&self) -> &'static str;

    /// Sends one payload. Returns how many payloads reached the wire, which can be zero when the
    /// payload was buffered or more than one when earlier buffered payloads were flushed. An
    /// error means exactly one payload was lost.
    async fn send(&mut self, payload: Bytes) -> Result<usize, TransportError>;

    /// Interval at which the worker calls `reconnect_if_due`, if the transport wants it.
    fn reconnect_tick(&self) -> Option<Duration> {
        None
    }

    /// Re-establishes a dropped connection once its backoff has elapsed.
    async fn reconnect_if_due(&mut self) -> Result<usize, TransportError> {
        Ok(0)
    }

    /// Payloads held back while disconnected, waiting for the next connection.
    fn buffered(&self) -> usize {
        0
    }

    /// Releases the connection. Returns the number of buffered payloads that were discarded.
    async fn close(&mut self) -> usize;
}
