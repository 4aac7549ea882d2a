//! The single consumer of the delivery queue. It owns the transport and performs all network I/O.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::time::{Instant as TokioInstant, Interval, MissedTickBehavior, interval, timeout_at};
use tokio_util::sync::CancellationToken;

use crate::{
    buffers::{DeliveryQueue, QueueItem},
    emit,
    failure::{DeliveryFailure, FailureCallback, FailureReason},
    internal_events::{DeliveryFailed, ShutdownDiscarded, StaleItemDropped},
    sinks::Transport,
};

/// Delivery counters shared between producers, the worker and the host application.
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    enqueued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// A point-in-time copy of the delivery counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppenderStats {
    /// Messages accepted onto the queue.
    pub enqueued: u64,
    /// Messages written to the network.
    pub sent: u64,
    /// Messages lost to encoding or transport errors.
    pub failed: u64,
    /// Messages discarded without a send attempt: queue full, stale, or left over at shutdown.
    pub dropped: u64,
}

impl DeliveryCounters {
    pub(crate) fn enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sent(&self, count: usize) {
        self.sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn lost(&self, reason: FailureReason, count: usize) {
        let counter = if reason.is_drop() {
            &self.dropped
        } else {
            &self.failed
        };
        counter.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AppenderStats {
        AppenderStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Counts a lost message and hands it to the failure callback.
pub(crate) fn report_failure(
    counters: &DeliveryCounters,
    on_failure: Option<&FailureCallback>,
    failure: DeliveryFailure,
) {
    counters.lost(failure.reason, 1);
    emit!(DeliveryFailed {
        reason: failure.reason.as_str(),
        error: &failure.error,
    });
    if let Some(callback) = on_failure {
        callback(&failure);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WorkerSettings {
    pub shutdown_grace_period: Duration,
    pub max_item_age: Option<Duration>,
}

pub struct DeliveryWorker {
    queue: Arc<DeliveryQueue>,
    transport: Box<dyn Transport>,
    settings: WorkerSettings,
    counters: Arc<DeliveryCounters>,
    on_failure: Option<FailureCallback>,
    shutdown: CancellationToken,
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        transport: Box<dyn Transport>,
        settings: WorkerSettings,
        counters: Arc<DeliveryCounters>,
        on_failure: Option<FailureCallback>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            transport,
            settings,
            counters,
            on_failure,
            shutdown,
        }
    }

    /// Delivers queued payloads until shutdown is requested or the queue is closed and empty,
    /// then drains what is left within the grace period and releases the transport.
    ///
    /// The grace period starts when shutdown is requested, even if a send or reconnect is in
    /// flight at that moment, so the worker always exits shortly after the deadline.
    pub async fn run(mut self) {
        let protocol = self.transport.protocol();
        debug!(message = "Delivery worker started.", %protocol);

        let mut reconnect = self.transport.reconnect_tick().map(|period| {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick
        });

        let shutdown = self.shutdown.clone();
        let grace = self.settings.shutdown_grace_period;
        let mut deadline = None;
        let mut expired = false;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                item = self.queue.pop() => match item {
                    Some(item) => {
                        let delivered =
                            within_grace(&shutdown, grace, &mut deadline, self.deliver(item)).await;
                        if !delivered {
                            // The payload that was in flight is lost along with the rest.
                            self.discard(1, "shutdown grace period elapsed");
                            expired = true;
                            break;
                        }
                    }
                    None => break,
                },
                _ = next_tick(&mut reconnect) => {
                    if !within_grace(&shutdown, grace, &mut deadline, self.reconnect()).await {
                        expired = true;
                        break;
                    }
                }
            }
        }

        let deadline = deadline.unwrap_or_else(|| TokioInstant::now() + grace);
        self.drain(deadline, expired).await;

        let discarded = match timeout_at(deadline, self.transport.close()).await {
            Ok(discarded) => discarded,
            Err(_) => {
                warn!(message = "Timed out releasing the connection.", %protocol);
                self.transport.buffered()
            }
        };
        self.discard(discarded, "buffered while disconnected");
        debug!(message = "Delivery worker stopped.", %protocol);
    }

    async fn deliver(&mut self, item: QueueItem) {
        if let Some(max_age) = self.settings.max_item_age {
            let age = item.age(Instant::now());
            if age > max_age {
                emit!(StaleItemDropped {
                    age_ms: age.as_millis(),
                });
                self.fail(DeliveryFailure::new(
                    FailureReason::Stale,
                    format_args!("queued for {age:?}, limit is {max_age:?}"),
                ));
                return;
            }
        }

        match self.transport.send(item.payload).await {
            Ok(count) => self.counters.sent(count),
            Err(error) => self.fail(DeliveryFailure::new(FailureReason::from(&error), &error)),
        }
    }

    async fn reconnect(&mut self) {
        match self.transport.reconnect_if_due().await {
            Ok(count) => self.counters.sent(count),
            Err(error) => {
                // Only a buffered payload that failed mid-flush is lost here.
                if !error.is_connect() {
                    self.fail(DeliveryFailure::new(FailureReason::from(&error), &error));
                }
            }
        }
    }

    async fn drain(&mut self, deadline: TokioInstant, expired: bool) {
        self.queue.close();
        if expired {
            let discarded = self.queue.drain().len();
            self.discard(discarded, "shutdown grace period elapsed");
            return;
        }

        while let Some(item) = self.queue.try_pop() {
            if timeout_at(deadline, self.deliver(item)).await.is_err() {
                let discarded = 1 + self.queue.drain().len();
                self.discard(discarded, "shutdown grace period elapsed");
                return;
            }
        }
    }

    fn discard(&self, count: usize, error: &str) {
        if count > 0 {
            emit!(ShutdownDiscarded { count });
            self.lost(FailureReason::Shutdown, count, error);
        }
    }

    fn fail(&self, failure: DeliveryFailure) {
        report_failure(&self.counters, self.on_failure.as_ref(), failure);
    }

    fn lost(&self, reason: FailureReason, count: usize, error: &str) {
        for _ in 0..count {
            self.fail(DeliveryFailure::new(reason, error));
        }
    }
}

/// Runs `work` to completion, unless shutdown is requested while it runs. From then on it only
/// gets until the grace deadline, which is fixed by the first such request. Returns `false` when
/// the deadline cut it short.
async fn within_grace(
    shutdown: &CancellationToken,
    grace: Duration,
    deadline: &mut Option<TokioInstant>,
    work: impl Future<Output = ()>,
) -> bool {
    tokio::pin!(work);
    tokio::select! {
        biased;

        () = &mut work => true,
        () = shutdown.cancelled() => {
            let at = *deadline.get_or_insert_with(|| TokioInstant::now() + grace);
            timeout_at(at, work).await.is_ok()
        }
    }
}

async fn next_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(tick) => {
            tick.tick().await;
        }
        None => std::future::pending().await,
    }
}
