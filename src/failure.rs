//! Delivery failure reporting for the host application.

use std::{fmt, sync::Arc};

use codecs::ChunkingError;

use crate::sinks::TransportError;

/// Why a message did not reach the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// The event could not be turned into a GELF document.
    Encoding,
    /// The document could not be compressed.
    Compression,
    /// The queue was full and the message was rejected or evicted.
    QueueFull,
    /// The message waited in the queue longer than the configured maximum age.
    Stale,
    /// The document needs more than 128 UDP chunks.
    TooManyChunks,
    /// The document contains a byte that cannot be framed on a stream.
    Framing,
    /// No connection could be established, or none was available.
    Connect,
    /// Writing to an established connection failed.
    Write,
    /// The message was still queued or buffered when shutdown finished.
    Shutdown,
}

impl FailureReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            FailureReason::Encoding => "encoding",
            FailureReason::Compression => "compression",
            FailureReason::QueueFull => "queue_full",
            FailureReason::Stale => "stale",
            FailureReason::TooManyChunks => "too_many_chunks",
            FailureReason::Framing => "framing",
            FailureReason::Connect => "connect",
            FailureReason::Write => "write",
            FailureReason::Shutdown => "shutdown",
        }
    }

    /// Whether the message was discarded without a send attempt.
    pub const fn is_drop(self) -> bool {
        matches!(
            self,
            FailureReason::QueueFull | FailureReason::Stale | FailureReason::Shutdown
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&TransportError> for FailureReason {
    fn from(error: &TransportError) -> Self {
        match error {
            TransportError::Chunking {
                source: ChunkingError::TooManyChunks { .. },
            } => FailureReason::TooManyChunks,
            TransportError::Chunking { .. } | TransportError::Framing { .. } => {
                FailureReason::Framing
            }
            TransportError::Write { .. } | TransportError::IncompleteDatagram { .. } => {
                FailureReason::Write
            }
            TransportError::Closed => FailureReason::Shutdown,
            _ if error.is_connect() => FailureReason::Connect,
            _ => FailureReason::Write,
        }
    }
}

/// Passed to the failure callback for every message that was not delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub reason: FailureReason,
    pub error: String,
}

impl DeliveryFailure {
    pub fn new(reason: FailureReason, error: impl fmt::Display) -> Self {
        Self {
            reason,
            error: error.to_string(),
        }
    }
}

/// Invoked once per undelivered message. Transport failures are reported from the delivery
/// worker thread; encoding and queue failures from the thread that submitted the event.
pub type FailureCallback = Arc<dyn Fn(&DeliveryFailure) + Send + Sync>;
