use metrics::counter;

use super::{InternalEvent, error_stage, error_type};

#[derive(Debug)]
pub struct UdpSocketConnectionEstablished;

impl InternalEvent for UdpSocketConnectionEstablished {
    fn emit(self) {
        debug!(message = "Connected.");
        counter!("connection_established_total", "mode" => "udp").increment(1);
    }
}

#[derive(Debug)]
pub struct UdpSocketOutgoingConnectionError<E> {
    pub error: E,
}

impl<E: std::error::Error> InternalEvent for UdpSocketOutgoingConnectionError<E> {
    fn emit(self) {
        error!(
            message = "Unable to connect.",
            error = %self.error,
            error_code = "failed_connecting",
            error_type = error_type::CONNECTION_FAILED,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "error_code" => "failed_connecting",
            "error_type" => error_type::CONNECTION_FAILED,
            "stage" => error_stage::SENDING,
            "mode" => "udp",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct UdpSendIncompleteError {
    pub data_size: usize,
    pub sent: usize,
}

impl InternalEvent for UdpSendIncompleteError {
    fn emit(self) {
        error!(
            message = "Could not send all data in one UDP packet; dropping some data.",
            data_size = self.data_size,
            sent = self.sent,
            dropped = self.data_size - self.sent,
            error_type = error_type::WRITER_FAILED,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "error_type" => error_type::WRITER_FAILED,
            "stage" => error_stage::SENDING,
            "mode" => "udp",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct GelfMessageChunked {
    pub byte_size: usize,
    pub chunk_count: usize,
}

impl InternalEvent for GelfMessageChunked {
    fn emit(self) {
        trace!(
            message = "Chunked GELF message.",
            byte_size = self.byte_size,
            chunk_count = self.chunk_count,
        );
        counter!("gelf_messages_chunked_total").increment(1);
        counter!("gelf_chunks_sent_total").increment(self.chunk_count as u64);
    }
}

#[derive(Debug)]
pub struct UdpDatagramsSent {
    pub byte_size: usize,
    pub datagrams: usize,
}

impl InternalEvent for UdpDatagramsSent {
    fn emit(self) {
        trace!(
            message = "Datagrams sent.",
            byte_size = self.byte_size,
            datagrams = self.datagrams,
        );
        counter!("bytes_sent_total", "protocol" => "udp").increment(self.byte_size as u64);
        counter!("component_sent_events_total", "protocol" => "udp").increment(1);
    }
}
