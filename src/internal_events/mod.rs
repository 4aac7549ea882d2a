//! Operational events of the delivery pipeline. Each event logs through `tracing` and updates
//! `metrics` counters; a host application decides whether anything collects either.

mod encoding;
mod prelude;
mod queue;
mod tcp;
mod udp;

pub use self::encoding::*;
pub(crate) use self::prelude::{error_stage, error_type, io_error_code};
pub use self::queue::*;
pub use self::tcp::*;
pub use self::udp::*;

pub trait InternalEvent: Sized {
    fn emit(self);
}

pub fn emit(event: impl InternalEvent) {
    event.emit();
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit($event)
    };
}
