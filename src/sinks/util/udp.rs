use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use bytes::Bytes;
use codecs::GelfChunker;
use snafu::ResultExt;
use tokio::net::UdpSocket;

use crate::{
    emit,
    internal_events::{
        GelfMessageChunked, UdpDatagramsSent, UdpSendIncompleteError,
        UdpSocketConnectionEstablished, UdpSocketOutgoingConnectionError,
    },
    net,
    sinks::{
        ChunkingSnafu, Transport, TransportError, UdpBindSnafu, UdpConnectSnafu, WriteSnafu,
        util::resolve,
    },
};

enum UdpState {
    Disconnected,
    Connected(UdpSocket),
}

/// Sends each payload as one datagram, or as a train of GELF chunks when it is larger than the
/// chunker's single datagram threshold.
pub struct UdpTransport {
    host: String,
    port: u16,
    chunker: GelfChunker,
    send_buffer_size: Option<usize>,
    state: UdpState,
}

impl UdpTransport {
    pub fn new(
        host: String,
        port: u16,
        chunker: GelfChunker,
        send_buffer_size: Option<usize>,
    ) -> Self {
        Self {
            host,
            port,
            chunker,
            send_buffer_size,
            state: UdpState::Disconnected,
        }
    }

    async fn connect(&self) -> Result<UdpSocket, TransportError> {
        let addr = resolve(&self.host, self.port).await?;

        let bind_address = find_bind_address(&addr);
        let socket = UdpSocket::bind(bind_address).await.context(UdpBindSnafu)?;
        socket.connect(addr).await.context(UdpConnectSnafu)?;

        net::apply_send_buffer_size(&socket, self.send_buffer_size, "udp");

        Ok(socket)
    }

    async fn socket(&mut self) -> Result<&UdpSocket, TransportError> {
        if let UdpState::Disconnected = self.state {
            match self.connect().await {
                Ok(socket) => {
                    emit!(UdpSocketConnectionEstablished);
                    self.state = UdpState::Connected(socket);
                }
                Err(error) => {
                    emit!(UdpSocketOutgoingConnectionError { error: &error });
                    return Err(error);
                }
            }
        }

        match &self.state {
            UdpState::Connected(socket) => Ok(socket),
            UdpState::Disconnected => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn protocol(&self) -> &'static str {
        "udp"
    }

    async fn send(&mut self, payload: Bytes) -> Result<usize, TransportError> {
        let byte_size = payload.len();
        // An oversized message must not put a single datagram on the wire.
        let datagrams = self.chunker.chunk(payload).context(ChunkingSnafu)?;
        if datagrams.len() > 1 {
            emit!(GelfMessageChunked {
                byte_size,
                chunk_count: datagrams.len(),
            });
        }

        let socket = self.socket().await?;
        let mut result = Ok(());
        for datagram in &datagrams {
            match socket.send(datagram).await {
                Ok(sent) if sent == datagram.len() => {}
                Ok(sent) => {
                    emit!(UdpSendIncompleteError {
                        data_size: datagram.len(),
                        sent,
                    });
                    result = Err(TransportError::IncompleteDatagram {
                        data_size: datagram.len(),
                        sent,
                    });
                    break;
                }
                Err(error) => {
                    result = Err(error).context(WriteSnafu);
                    break;
                }
            }
        }

        match result {
            Ok(()) => {
                emit!(UdpDatagramsSent {
                    byte_size,
                    datagrams: datagrams.len(),
                });
                Ok(1)
            }
            Err(error) => {
                if let TransportError::Write { .. } = error {
                    self.state = UdpState::Disconnected;
                }
                Err(error)
            }
        }
    }

    async fn close(&mut self) -> usize {
        self.state = UdpState::Disconnected;
        0
    }
}

fn find_bind_address(remote_addr: &SocketAddr) -> SocketAddr {
    match remote_addr {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

#[cfg(test)]
mod tests {
    use std::net::UdpSocket as StdUdpSocket;

    use codecs::{MessageIdGenerator, encoding::chunking::GELF_MAGIC_BYTES};

    use super::*;
    use crate::test_util::trace_init;

    fn receiver() -> (StdUdpSocket, SocketAddr) {
        let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(std::time::Duration::from_secs(5)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    fn transport(addr: SocketAddr, chunk_size: usize) -> UdpTransport {
        let chunker = GelfChunker::new(chunk_size, None, MessageIdGenerator::new()).unwrap();
        UdpTransport::new(addr.ip().to_string(), addr.port(), chunker, None)
    }

    #[test]
    fn bind_address_matches_family() {
        let v4: SocketAddr = "10.0.0.1:12201".parse().unwrap();
        let v6: SocketAddr = "[::1]:12201".parse().unwrap();
        assert!(find_bind_address(&v4).is_ipv4());
        assert!(find_bind_address(&v6).is_ipv6());
        assert_eq!(find_bind_address(&v4).port(), 0);
    }

    #[tokio::test]
    async fn small_payload_is_one_datagram() {
        trace_init();
        let (receiver, addr) = receiver();
        let mut transport = transport(addr, 1024);

        transport
            .send(Bytes::from_static(b"{\"short_message\":\"x\"}"))
            .await
            .unwrap();

        let mut buf = [0; 2048];
        let size = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..size], b"{\"short_message\":\"x\"}");
    }

    #[tokio::test]
    async fn large_payload_is_chunked_in_order() {
        trace_init();
        let (receiver, addr) = receiver();
        let mut transport = transport(addr, 10);

        transport.send(Bytes::from(vec![b'a'; 35])).await.unwrap();

        let mut buf = [0; 64];
        for sequence in 0..4u8 {
            let size = receiver.recv(&mut buf).unwrap();
            assert_eq!(buf[..2], GELF_MAGIC_BYTES);
            assert_eq!(buf[10], sequence);
            assert_eq!(buf[11], 4);
            assert_eq!(size, 12 + if sequence < 3 { 10 } else { 5 });
        }
    }

    #[tokio::test]
    async fn too_many_chunks_sends_nothing() {
        trace_init();
        let (receiver, addr) = receiver();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_millis(200)))
            .unwrap();
        let mut transport = transport(addr, 1);

        let error = transport
            .send(Bytes::from(vec![b'a'; 129]))
            .await
            .unwrap_err();
        assert!(matches!(error, TransportError::Chunking { .. }));

        let mut buf = [0; 64];
        assert!(receiver.recv(&mut buf).is_err());
    }

    #[tokio::test]
    async fn unresolvable_host_fails() {
        trace_init();
        let chunker = GelfChunker::new(1024, None, MessageIdGenerator::new()).unwrap();
        let mut transport =
            UdpTransport::new("nonexistent.invalid".to_owned(), 12201, chunker, None);

        let error = transport.send(Bytes::from_static(b"{}")).await.unwrap_err();
        assert!(matches!(
            error,
            TransportError::Dns { .. } | TransportError::NoAddresses { .. }
        ));
    }
}
