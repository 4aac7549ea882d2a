use metrics::counter;

use super::{InternalEvent, error_stage, error_type};

#[derive(Debug)]
pub struct GelfEncoderError<E> {
    pub error: E,
}

impl<E: std::error::Error> InternalEvent for GelfEncoderError<E> {
    fn emit(self) {
        error!(
            message = "Failed to encode event; dropping it.",
            error = %self.error,
            error_code = "encoding",
            error_type = error_type::ENCODER_FAILED,
            stage = error_stage::PROCESSING,
        );
        counter!(
            "component_errors_total",
            "error_code" => "encoding",
            "error_type" => error_type::ENCODER_FAILED,
            "stage" => error_stage::PROCESSING,
        )
        .increment(1);
        counter!(
            "component_discarded_events_total",
            "intentional" => "false",
            "reason" => "encoding",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct DeliveryFailed<'a> {
    pub reason: &'a str,
    pub error: &'a str,
}

impl InternalEvent for DeliveryFailed<'_> {
    fn emit(self) {
        warn!(
            message = "Message was not delivered.",
            reason = self.reason,
            error = self.error,
        );
        counter!("delivery_failures_total", "reason" => self.reason.to_owned()).increment(1);
    }
}
