//! Asynchronous GELF log shipping.
//!
//! Events are encoded and compressed on the submitting thread, queued on a bounded in-memory
//! queue, and written by a single background worker over chunked UDP or null-delimited TCP,
//! optionally wrapped in TLS.

#[macro_use]
extern crate tracing;

pub mod appender;
pub mod buffers;
pub mod config;
pub mod encoder;
pub mod failure;
pub mod internal_events;
pub mod net;
pub mod sinks;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_util;
pub mod tls;
pub mod worker;

pub use appender::{EventAdapter, GelfAppender, ShuttingDownError, StartError};
pub use codecs::{Compression, FieldValue, Level, LogEvent};
pub use config::{BuildError, GelfConfig, Protocol};
pub use failure::{DeliveryFailure, FailureCallback, FailureReason};
pub use worker::AppenderStats;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;
