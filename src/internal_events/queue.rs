use metrics::counter;

use super::{InternalEvent, error_stage, error_type};

#[derive(Debug)]
pub struct QueueFullDrop {
    pub policy: &'static str,
}

impl InternalEvent for QueueFullDrop {
    fn emit(self) {
        debug!(message = "Delivery queue full; dropping message.", policy = self.policy);
        counter!(
            "component_discarded_events_total",
            "intentional" => "true",
            "reason" => "queue_full",
            "policy" => self.policy,
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct StaleItemDropped {
    pub age_ms: u128,
}

impl InternalEvent for StaleItemDropped {
    fn emit(self) {
        warn!(
            message = "Dropping message that waited too long in the queue.",
            age_ms = self.age_ms as u64,
            error_type = error_type::CONDITION_FAILED,
            stage = error_stage::PROCESSING,
        );
        counter!(
            "component_discarded_events_total",
            "intentional" => "true",
            "reason" => "stale",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct ShutdownDiscarded {
    pub count: usize,
}

impl InternalEvent for ShutdownDiscarded {
    fn emit(self) {
        if self.count > 0 {
            warn!(
                message = "Shutdown grace period elapsed; discarding queued messages.",
                count = self.count,
            );
        }
        counter!(
            "component_discarded_events_total",
            "intentional" => "true",
            "reason" => "shutdown",
        )
        .increment(self.count as u64);
    }
}
