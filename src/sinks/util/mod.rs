pub mod connection;
pub mod tcp;
pub mod udp;

use std::net::SocketAddr;

use snafu::ResultExt;

pub use self::{
    connection::{ConnectionEvent, ConnectionState, ConnectionTracker, RecycleLimits},
    tcp::{DisconnectedPolicy, ReconnectMode, TcpTransport, TcpTransportOptions},
    udp::UdpTransport,
};
use super::{DnsSnafu, TransportError};

/// Resolves `host` and returns the first address.
pub(crate) async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    debug!(message = "Resolving DNS.", %host);
    let addr = tokio::net::lookup_host((host, port))
        .await
        .context(DnsSnafu { host })?
        .next()
        .ok_or_else(|| TransportError::NoAddresses {
            host: host.to_owned(),
        })?;
    debug!(message = "Resolved address.", %addr);
    Ok(addr)
}
