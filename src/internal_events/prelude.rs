pub mod error_stage {
    pub const PROCESSING: &str = "processing";
    pub const SENDING: &str = "sending";
}

pub mod error_type {
    pub const CONDITION_FAILED: &str = "condition_failed";
    pub const CONNECTION_FAILED: &str = "connection_failed";
    pub const ENCODER_FAILED: &str = "encoder_failed";
    pub const WRITER_FAILED: &str = "writer_failed";
}

pub fn io_error_code(error: &std::io::Error) -> &'static str {
    use std::io::ErrorKind::*;

    match error.kind() {
        AddrInUse => "address_in_use",
        AddrNotAvailable => "address_not_available",
        BrokenPipe => "broken_pipe",
        ConnectionAborted => "connection_aborted",
        ConnectionRefused => "connection_refused",
        ConnectionReset => "connection_reset",
        Interrupted => "operation_interrupted",
        InvalidData => "invalid_data",
        InvalidInput => "invalid_input_parameter",
        NotConnected => "not_connected",
        NotFound => "entity_not_found",
        Other => "other_error",
        PermissionDenied => "permission_denied",
        TimedOut => "timed_out",
        UnexpectedEof => "unexpected_end_of_file",
        WouldBlock => "operation_would_block",
        WriteZero => "write_zero",
        _ => "unknown",
    }
}
