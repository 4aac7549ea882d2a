//! Framing for stream transports, where a collector needs explicit message boundaries.

#![deny(missing_docs)]

mod null_delimited;

pub use self::null_delimited::{FramingError, NullDelimitedEncoder};
