use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use codecs::{FramingError, NullDelimitedEncoder};
use futures::{SinkExt, task::noop_waker_ref};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::{
    io::{AsyncRead, ReadBuf},
    net::TcpStream,
    time::{Instant, timeout},
};
use tokio_util::codec::FramedWrite;

use super::{
    connection::{ConnectionEvent, ConnectionTracker, RecycleLimits},
    resolve,
};
use crate::{
    emit,
    internal_events::{
        TcpBytesSent, TcpConnectionDisconnected, TcpConnectionEstablished, TcpConnectionFailed,
        TcpConnectionRecycled, TcpConnectionShutdown, TcpPendingDropped, TcpSendError,
    },
    net,
    sinks::{ConnectSnafu, FramingSnafu, Transport, TransportError},
    tls::{MaybeTlsSettings, MaybeTlsStream},
};

/// When a dropped connection is re-established.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectMode {
    /// On the next send once the backoff delay has elapsed.
    #[default]
    Lazy,
    /// From a background tick as soon as the backoff delay has elapsed.
    Eager,
}

/// What happens to payloads sent while there is no connection.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectedPolicy {
    /// Report them as failed.
    #[default]
    Drop,
    /// Keep up to `pending_capacity` of them, oldest dropped first, and write them once
    /// connected.
    Buffer,
}

#[derive(Clone, Debug)]
pub struct TcpTransportOptions {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub reconnect_interval: Duration,
    pub max_reconnect_interval: Duration,
    pub reconnect_mode: ReconnectMode,
    pub when_disconnected: DisconnectedPolicy,
    pub pending_capacity: usize,
    pub recycle: RecycleLimits,
    pub send_buffer_size: Option<usize>,
}

impl Default for TcpTransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(30),
            reconnect_interval: Duration::from_millis(500),
            max_reconnect_interval: Duration::from_secs(60),
            reconnect_mode: ReconnectMode::default(),
            when_disconnected: DisconnectedPolicy::default(),
            pending_capacity: 1000,
            recycle: RecycleLimits::default(),
            send_buffer_size: None,
        }
    }
}

type FramedStream = FramedWrite<MaybeTlsStream<TcpStream>, NullDelimitedEncoder>;

enum PeerState {
    Open,
    Closed,
    Errored(std::io::Error),
}

/// Writes null terminated GELF documents over one persistent TCP or TLS connection.
pub struct TcpTransport {
    host: String,
    port: u16,
    tls: MaybeTlsSettings,
    options: TcpTransportOptions,
    tracker: ConnectionTracker,
    stream: Option<FramedStream>,
    pending: VecDeque<Bytes>,
}

impl TcpTransport {
    pub fn new(
        host: String,
        port: u16,
        tls: MaybeTlsSettings,
        options: TcpTransportOptions,
    ) -> Self {
        Self {
            host,
            port,
            tls,
            tracker: ConnectionTracker::new(
                options.reconnect_interval,
                options.max_reconnect_interval,
            ),
            pending: VecDeque::with_capacity(options.pending_capacity.min(1024)),
            stream: None,
            options,
        }
    }

    pub const fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    async fn connect(&self) -> Result<MaybeTlsStream<TcpStream>, TransportError> {
        let addr = resolve(&self.host, self.port).await?;
        debug!(message = "Connecting.", %addr);
        let stream = self
            .tls
            .connect(&self.host, addr)
            .await
            .context(ConnectSnafu)?;
        net::apply_send_buffer_size(stream.get_ref(), self.options.send_buffer_size, "tcp");
        Ok(stream)
    }

    async fn try_connect(&mut self) -> Result<(), TransportError> {
        self.tracker.connect_started();
        let connect_timeout = self.options.connect_timeout;
        let result = match timeout(connect_timeout, self.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout {
                timeout: connect_timeout,
            }),
        };

        match result {
            Ok(stream) => {
                emit!(TcpConnectionEstablished {
                    peer_addr: stream.peer_addr().ok(),
                });
                self.tracker.connect_succeeded(Instant::now());
                self.stream = Some(FramedWrite::new(stream, NullDelimitedEncoder::new()));
                Ok(())
            }
            Err(error) => {
                let delay = self
                    .tracker
                    .failed(ConnectionEvent::ConnectFailed, Instant::now());
                emit!(TcpConnectionFailed {
                    error: &error,
                    consecutive_failures: self.tracker.consecutive_failures(),
                });
                debug!(
                    message = "Backing off before reconnecting.",
                    delay_ms = delay.as_millis() as u64,
                );
                Err(error)
            }
        }
    }

    async fn recycle_if_needed(&mut self) {
        if let Some(reason) = self
            .tracker
            .recycle_reason(Instant::now(), self.options.recycle)
        {
            emit!(TcpConnectionRecycled { reason });
            if let Some(mut stream) = self.stream.take() {
                if let Err(error) = stream.close().await {
                    debug!(message = "Error closing recycled connection.", %error);
                }
            }
            self.tracker.recycled();
        }
    }

    fn connection_lost(&mut self, event: ConnectionEvent) {
        self.stream = None;
        self.tracker.failed(event, Instant::now());
    }

    /// Checks for a peer close with a non-blocking one byte read.
    fn check_peer(stream: &mut FramedStream) -> PeerState {
        let stream: &mut MaybeTlsStream<TcpStream> = stream.get_mut();
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        match Pin::new(stream).poll_read(&mut cx, &mut buf) {
            Poll::Ready(Err(error)) => PeerState::Errored(error),
            Poll::Ready(Ok(())) if buf.filled().is_empty() => PeerState::Closed,
            // Collectors never talk back. Stray bytes and `Pending` both mean the peer is
            // still there.
            _ => PeerState::Open,
        }
    }

    /// Writes one payload on the open connection. `Ok(false)` means the peer had already gone
    /// away and nothing was written.
    async fn write(&mut self, payload: Bytes) -> Result<bool, TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };

        match Self::check_peer(stream) {
            PeerState::Open => {}
            PeerState::Closed => {
                emit!(TcpConnectionShutdown);
                self.connection_lost(ConnectionEvent::PeerClosed);
                return Ok(false);
            }
            PeerState::Errored(error) => {
                emit!(TcpConnectionDisconnected { error });
                self.connection_lost(ConnectionEvent::PeerClosed);
                return Ok(false);
            }
        }

        let byte_size = payload.len();
        let write_timeout = self.options.write_timeout;
        let result = match timeout(write_timeout, stream.send(payload)).await {
            Ok(result) => result,
            // A collector that stopped reading. The connection is unusable from here on.
            Err(_) => Err(FramingError::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("write timed out after {write_timeout:?}"),
                ),
            }),
        };
        match result {
            Ok(()) => {
                emit!(TcpBytesSent {
                    byte_size: byte_size + 1,
                });
                self.tracker.send_succeeded(Instant::now());
                Ok(true)
            }
            Err(FramingError::Io { source }) => {
                emit!(TcpSendError { error: &source });
                self.connection_lost(ConnectionEvent::WriteFailed);
                Err(TransportError::Write { source })
            }
            Err(error) => Err(error).context(FramingSnafu),
        }
    }

    /// Writes buffered payloads in order. Stops at the first one that could not be written.
    async fn flush_pending(&mut self) -> Result<usize, TransportError> {
        let mut written = 0;
        while let Some(payload) = self.pending.pop_front() {
            match self.write(payload.clone()).await {
                Ok(true) => written += 1,
                Ok(false) => {
                    self.pending.push_front(payload);
                    break;
                }
                Err(error) => return Err(error),
            }
        }
        Ok(written)
    }

    /// Handles a payload that cannot be written right now.
    fn hold(&mut self, payload: Bytes, cause: TransportError) -> Result<usize, TransportError> {
        match self.options.when_disconnected {
            DisconnectedPolicy::Drop => {
                emit!(TcpPendingDropped {
                    count: 1,
                    reason: "disconnected",
                });
                Err(cause)
            }
            DisconnectedPolicy::Buffer => {
                let overflow = self.pending.len() >= self.options.pending_capacity;
                if overflow {
                    self.pending.pop_front();
                    emit!(TcpPendingDropped {
                        count: 1,
                        reason: "pending_full",
                    });
                }
                self.pending.push_back(payload);
                if overflow {
                    Err(TransportError::PendingOverflow {
                        capacity: self.options.pending_capacity,
                    })
                } else {
                    trace!(
                        message = "Buffered payload while disconnected.",
                        pending = self.pending.len(),
                    );
                    Ok(0)
                }
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn protocol(&self) -> &'static str {
        "tcp"
    }

    fn reconnect_tick(&self) -> Option<Duration> {
        match self.options.reconnect_mode {
            ReconnectMode::Eager => {
                Some(self.options.reconnect_interval.min(Duration::from_secs(1)))
            }
            ReconnectMode::Lazy => None,
        }
    }

    async fn send(&mut self, payload: Bytes) -> Result<usize, TransportError> {
        // Refuse before anything reaches the socket.
        NullDelimitedEncoder::validate(&payload).context(FramingSnafu)?;

        self.recycle_if_needed().await;

        if self.stream.is_none()
            && self.options.reconnect_mode == ReconnectMode::Lazy
            && self.tracker.may_attempt(Instant::now())
        {
            if let Err(error) = self.try_connect().await {
                return self.hold(payload, error);
            }
        }
        if self.stream.is_none() {
            return self.hold(payload, TransportError::Disconnected);
        }

        let flushed = match self.flush_pending().await {
            Ok(flushed) => flushed,
            Err(error) => {
                // The buffered payload that failed is lost and freed a slot for this one.
                self.pending.push_back(payload);
                return Err(error);
            }
        };
        if !self.pending.is_empty() {
            return self.hold(payload, TransportError::Disconnected).map(|_| flushed);
        }

        match self.write(payload.clone()).await? {
            true => Ok(flushed + 1),
            false => self.hold(payload, TransportError::Disconnected).map(|_| flushed),
        }
    }

    async fn reconnect_if_due(&mut self) -> Result<usize, TransportError> {
        self.recycle_if_needed().await;
        if self.stream.is_none() && self.tracker.may_attempt(Instant::now()) {
            self.try_connect().await?;
        }
        if self.stream.is_some() {
            self.flush_pending().await
        } else {
            Ok(0)
        }
    }

    fn buffered(&self) -> usize {
        self.pending.len()
    }

    async fn close(&mut self) -> usize {
        if self.stream.is_some() {
            if let Err(error) = self.flush_pending().await {
                debug!(message = "Failed flushing buffered payloads on close.", %error);
            }
        }
        if let Some(mut stream) = self.stream.take() {
            if let Err(error) = stream.close().await {
                debug!(message = "Error closing connection.", %error);
            }
        }
        self.tracker.closed();
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::{io::AsyncReadExt, net::TcpListener};

    use super::*;
    use crate::{sinks::util::ConnectionState, test_util::trace_init};

    async fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn transport(addr: SocketAddr, options: TcpTransportOptions) -> TcpTransport {
        TcpTransport::new(
            addr.ip().to_string(),
            addr.port(),
            MaybeTlsSettings::Raw(()),
            options,
        )
    }

    async fn read_frames(stream: &mut TcpStream, count: usize) -> Vec<Vec<u8>> {
        let mut data = Vec::new();
        let mut buf = [0; 1024];
        while data.iter().filter(|b| **b == 0).count() < count {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed early");
            data.extend_from_slice(&buf[..n]);
        }
        data.split(|b| *b == 0)
            .take(count)
            .map(<[u8]>::to_vec)
            .collect()
    }

    #[tokio::test]
    async fn frames_are_null_terminated_in_order() {
        trace_init();
        let (listener, addr) = listener().await;
        let mut transport = transport(addr, TcpTransportOptions::default());

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_frames(&mut stream, 3).await
        });

        for payload in ["one", "two", "three"] {
            assert_eq!(transport.send(Bytes::from(payload)).await.unwrap(), 1);
        }

        let frames = server.await.unwrap();
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert_eq!(transport.tracker().state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn embedded_null_is_rejected_without_connecting() {
        trace_init();
        let (_listener, addr) = listener().await;
        let mut transport = transport(addr, TcpTransportOptions::default());

        let error = transport
            .send(Bytes::from_static(b"a\0b"))
            .await
            .unwrap_err();

        assert!(matches!(error, TransportError::Framing { .. }));
        assert_eq!(transport.tracker().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn refused_connection_drops_and_backs_off() {
        trace_init();
        let (listener, addr) = listener().await;
        drop(listener);
        let mut transport = transport(
            addr,
            TcpTransportOptions {
                reconnect_interval: Duration::from_secs(30),
                ..Default::default()
            },
        );

        let error = transport.send(Bytes::from("x")).await.unwrap_err();
        assert!(matches!(error, TransportError::Connect { .. }));
        assert_eq!(transport.tracker().consecutive_failures(), 1);

        // Still inside the backoff window: no new attempt is made.
        let error = transport.send(Bytes::from("y")).await.unwrap_err();
        assert!(matches!(error, TransportError::Disconnected));
        assert_eq!(transport.tracker().consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn buffered_payloads_are_flushed_after_reconnect() {
        trace_init();
        let (listener, addr) = listener().await;
        drop(listener);
        let mut transport = transport(
            addr,
            TcpTransportOptions {
                reconnect_interval: Duration::from_millis(2),
                when_disconnected: DisconnectedPolicy::Buffer,
                pending_capacity: 2,
                ..Default::default()
            },
        );

        assert_eq!(transport.send(Bytes::from("a")).await.unwrap(), 0);
        assert_eq!(transport.send(Bytes::from("b")).await.unwrap(), 0);
        let error = transport.send(Bytes::from("c")).await.unwrap_err();
        assert!(matches!(error, TransportError::PendingOverflow { capacity: 2 }));
        assert_eq!(transport.buffered(), 2);

        let listener = TcpListener::bind(addr).await.unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_frames(&mut stream, 3).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.send(Bytes::from("d")).await.unwrap(), 3);

        let frames = server.await.unwrap();
        assert_eq!(frames, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(transport.buffered(), 0);
    }

    #[tokio::test]
    async fn peer_close_is_detected_before_writing() {
        trace_init();
        let (listener, addr) = listener().await;
        let mut transport = transport(
            addr,
            TcpTransportOptions {
                reconnect_interval: Duration::from_secs(30),
                ..Default::default()
            },
        );

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let frames = read_frames(&mut stream, 1).await;
            drop(stream);
            frames
        });

        transport.send(Bytes::from("first")).await.unwrap();
        server.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let error = transport.send(Bytes::from("second")).await.unwrap_err();
        assert!(matches!(error, TransportError::Disconnected));
        assert_eq!(transport.tracker().state(), ConnectionState::Disconnected);
        assert_eq!(transport.tracker().consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn eager_mode_reconnects_from_tick() {
        trace_init();
        let (listener, addr) = listener().await;
        let mut transport = transport(
            addr,
            TcpTransportOptions {
                reconnect_mode: ReconnectMode::Eager,
                when_disconnected: DisconnectedPolicy::Buffer,
                ..Default::default()
            },
        );
        assert!(transport.reconnect_tick().is_some());

        // Sends never connect in eager mode.
        assert_eq!(transport.send(Bytes::from("queued")).await.unwrap(), 0);
        assert_eq!(transport.tracker().state(), ConnectionState::Disconnected);

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_frames(&mut stream, 1).await
        });

        assert_eq!(transport.reconnect_if_due().await.unwrap(), 1);
        assert_eq!(server.await.unwrap(), vec![b"queued".to_vec()]);
    }

    #[tokio::test]
    async fn idle_connection_is_recycled() {
        trace_init();
        let (listener, addr) = listener().await;
        let mut transport = transport(
            addr,
            TcpTransportOptions {
                recycle: RecycleLimits {
                    max_lifetime: None,
                    max_idle: Some(Duration::from_millis(20)),
                },
                ..Default::default()
            },
        );

        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let a = read_frames(&mut first, 1).await;
            let (mut second, _) = listener.accept().await.unwrap();
            let b = read_frames(&mut second, 1).await;
            (a, b)
        });

        transport.send(Bytes::from("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.send(Bytes::from("b")).await.unwrap();

        let (a, b) = server.await.unwrap();
        assert_eq!(a, vec![b"a".to_vec()]);
        assert_eq!(b, vec![b"b".to_vec()]);
        assert_eq!(transport.tracker().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn close_reports_discarded_pending() {
        trace_init();
        let (listener, addr) = listener().await;
        drop(listener);
        let mut transport = transport(
            addr,
            TcpTransportOptions {
                reconnect_interval: Duration::from_secs(30),
                when_disconnected: DisconnectedPolicy::Buffer,
                ..Default::default()
            },
        );

        transport.send(Bytes::from("a")).await.unwrap();
        transport.send(Bytes::from("b")).await.unwrap();
        assert_eq!(transport.close().await, 2);
        assert_eq!(transport.buffered(), 0);
    }

    #[tokio::test]
    async fn stalled_collector_times_out_the_write() {
        trace_init();
        let (listener, addr) = listener().await;
        let mut transport = transport(
            addr,
            TcpTransportOptions {
                write_timeout: Duration::from_millis(200),
                reconnect_interval: Duration::from_secs(30),
                send_buffer_size: Some(4096),
                ..Default::default()
            },
        );

        // Accepts and then never reads.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });

        let payload = Bytes::from(vec![b'a'; 64 * 1024]);
        let mut outcome = None;
        for _ in 0..1024 {
            if let Err(error) = transport.send(payload.clone()).await {
                outcome = Some(error);
                break;
            }
        }
        server.abort();

        match outcome {
            Some(TransportError::Write { source }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::TimedOut);
            }
            other => panic!("expected a timed out write, got {other:?}"),
        }
        assert_eq!(transport.tracker().state(), ConnectionState::Disconnected);
        assert_eq!(transport.tracker().consecutive_failures(), 1);
    }
}
