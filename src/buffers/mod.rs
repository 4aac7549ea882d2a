//! The bounded in-memory queue between producer threads and the delivery worker.

mod queue;

use serde::{Deserialize, Serialize};

pub use self::queue::{DeliveryQueue, EnqueueError, QueueItem};

/// Behavior of `enqueue` when the queue is at capacity.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Copy, Clone)]
#[serde(rename_all = "snake_case")]
pub enum WhenFull {
    /// Wait for free space, up to the configured block timeout, then give up.
    Block,
    /// Reject the message being enqueued.
    DropNewest,
    /// Evict the oldest queued message to make room.
    DropOldest,
}

impl WhenFull {
    pub const fn as_str(self) -> &'static str {
        match self {
            WhenFull::Block => "block",
            WhenFull::DropNewest => "drop_newest",
            WhenFull::DropOldest => "drop_oldest",
        }
    }
}
