use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use snafu::Snafu;
use tokio::sync::Notify;

use super::WhenFull;
use crate::{emit, internal_events::QueueFullDrop};

/// An encoded payload waiting for the worker.
#[derive(Clone, Debug)]
pub struct QueueItem {
    pub payload: Bytes,
    pub enqueued_at: Instant,
}

impl QueueItem {
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            enqueued_at: Instant::now(),
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum EnqueueError {
    #[snafu(display("Delivery queue is full."))]
    Full,
    #[snafu(display("Delivery queue is shutting down."))]
    ShuttingDown,
}

struct Inner {
    items: VecDeque<QueueItem>,
    closed: bool,
}

/// Multi-producer, single-consumer FIFO queue with a fixed capacity.
///
/// Producers only ever hold the lock for a push, so they never wait on network I/O. The single
/// consumer is async and is woken through a `Notify`.
pub struct DeliveryQueue {
    inner: Mutex<Inner>,
    not_full: Condvar,
    not_empty: Notify,
    capacity: usize,
    when_full: WhenFull,
    block_timeout: Duration,
}

impl DeliveryQueue {
    pub fn new(capacity: usize, when_full: WhenFull, block_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Notify::new(),
            capacity,
            when_full,
            block_timeout,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn when_full(&self) -> WhenFull {
        self.when_full
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Adds an item at the back of the queue.
    ///
    /// Under `DropOldest` the evicted item is returned so the caller can report it.
    pub fn push(&self, item: QueueItem) -> Result<Option<QueueItem>, EnqueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(EnqueueError::ShuttingDown);
        }

        let mut evicted = None;
        if inner.items.len() >= self.capacity {
            match self.when_full {
                WhenFull::DropNewest => {
                    drop(inner);
                    return Err(self.rejected());
                }
                WhenFull::DropOldest => {
                    evicted = inner.items.pop_front();
                }
                WhenFull::Block => {
                    let deadline = Instant::now() + self.block_timeout;
                    while inner.items.len() >= self.capacity && !inner.closed {
                        if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                            break;
                        }
                    }
                    if inner.closed {
                        return Err(EnqueueError::ShuttingDown);
                    }
                    if inner.items.len() >= self.capacity {
                        drop(inner);
                        return Err(self.rejected());
                    }
                }
            }
        }

        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        if evicted.is_some() {
            emit!(QueueFullDrop {
                policy: self.when_full.as_str(),
            });
        }
        Ok(evicted)
    }

    // Called with the lock released.
    fn rejected(&self) -> EnqueueError {
        emit!(QueueFullDrop {
            policy: self.when_full.as_str(),
        });
        EnqueueError::Full
    }

    pub fn try_pop(&self) -> Option<QueueItem> {
        let item = self.inner.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Waits for the next item. Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<QueueItem> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            // `notify_one` stores a permit when nobody is waiting, so a push racing with the
            // check above still wakes this single consumer.
            self.not_empty.notified().await;
        }
    }

    /// Stops accepting items. Already queued items stay available to `pop`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_one();
    }

    /// Removes and returns everything still queued.
    pub fn drain(&self) -> Vec<QueueItem> {
        let items: Vec<_> = self.inner.lock().items.drain(..).collect();
        self.not_full.notify_all();
        items
    }
}
