use std::net::SocketAddr;

use metrics::counter;

use super::{InternalEvent, error_stage, error_type, io_error_code};

#[derive(Debug)]
pub struct TcpConnectionEstablished {
    pub peer_addr: Option<SocketAddr>,
}

impl InternalEvent for TcpConnectionEstablished {
    fn emit(self) {
        if let Some(peer_addr) = self.peer_addr {
            debug!(message = "Connected.", %peer_addr);
        } else {
            debug!(message = "Connected.", peer_addr = "unknown");
        }
        counter!("connection_established_total", "mode" => "tcp").increment(1);
    }
}

#[derive(Debug)]
pub struct TcpConnectionFailed<E> {
    pub error: E,
    pub consecutive_failures: u32,
}

impl<E: std::error::Error> InternalEvent for TcpConnectionFailed<E> {
    fn emit(self) {
        error!(
            message = "Unable to connect.",
            error = %self.error,
            consecutive_failures = self.consecutive_failures,
            error_code = "failed_connecting",
            error_type = error_type::CONNECTION_FAILED,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "error_code" => "failed_connecting",
            "error_type" => error_type::CONNECTION_FAILED,
            "stage" => error_stage::SENDING,
            "mode" => "tcp",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct TcpConnectionDisconnected {
    pub error: std::io::Error,
}

impl InternalEvent for TcpConnectionDisconnected {
    fn emit(self) {
        error!(
            message = "Connection disconnected.",
            error = %self.error,
            error_code = io_error_code(&self.error),
            error_type = error_type::WRITER_FAILED,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "error_code" => io_error_code(&self.error),
            "error_type" => error_type::WRITER_FAILED,
            "stage" => error_stage::SENDING,
            "mode" => "tcp",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct TcpConnectionShutdown;

impl InternalEvent for TcpConnectionShutdown {
    fn emit(self) {
        warn!(message = "Received EOF from the server, shutdown.");
        counter!("connection_shutdown_total", "mode" => "tcp").increment(1);
    }
}

#[derive(Debug)]
pub struct TcpConnectionRecycled {
    pub reason: &'static str,
}

impl InternalEvent for TcpConnectionRecycled {
    fn emit(self) {
        debug!(message = "Recycling connection.", reason = self.reason);
        counter!("connection_recycled_total", "reason" => self.reason).increment(1);
    }
}

#[derive(Debug)]
pub struct TcpBytesSent {
    pub byte_size: usize,
}

impl InternalEvent for TcpBytesSent {
    fn emit(self) {
        trace!(message = "Bytes sent.", byte_size = self.byte_size, protocol = "tcp");
        counter!("bytes_sent_total", "protocol" => "tcp").increment(self.byte_size as u64);
        counter!("component_sent_events_total", "protocol" => "tcp").increment(1);
    }
}

#[derive(Debug)]
pub struct TcpSendError<E> {
    pub error: E,
}

impl<E: std::error::Error> InternalEvent for TcpSendError<E> {
    fn emit(self) {
        error!(
            message = "Failed writing to connection.",
            error = %self.error,
            error_type = error_type::WRITER_FAILED,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "error_type" => error_type::WRITER_FAILED,
            "stage" => error_stage::SENDING,
            "mode" => "tcp",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct TcpPendingDropped {
    pub count: usize,
    pub reason: &'static str,
}

impl InternalEvent for TcpPendingDropped {
    fn emit(self) {
        debug!(
            message = "Dropping messages while disconnected.",
            count = self.count,
            reason = self.reason,
        );
        counter!(
            "component_discarded_events_total",
            "intentional" => "false",
            "reason" => self.reason,
            "mode" => "tcp",
        )
        .increment(self.count as u64);
    }
}
