//! The facade a logging framework adapter talks to.

use std::{fmt, sync::Arc, thread};

use codecs::LogEvent;
use parking_lot::Mutex;
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;

use crate::{
    buffers::{DeliveryQueue, EnqueueError, QueueItem},
    config::{BuildError, GelfConfig, Pipeline},
    emit,
    encoder::GelfEncoder,
    failure::{DeliveryFailure, FailureCallback, FailureReason},
    internal_events::GelfEncoderError,
    worker::{AppenderStats, DeliveryCounters, DeliveryWorker, report_failure},
};

/// Translates a framework specific record into a `LogEvent`.
pub trait EventAdapter {
    type Event: ?Sized;

    fn normalize(&self, event: &Self::Event) -> LogEvent;
}

#[derive(Debug, Snafu)]
pub enum StartError {
    #[snafu(display("{}", source))]
    Build { source: BuildError },
    #[snafu(display("Failed to start delivery worker: {}", source))]
    Runtime { source: std::io::Error },
}

/// Returned by `submit` once `shutdown` has begun.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShuttingDownError;

impl fmt::Display for ShuttingDownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GELF appender is shutting down.")
    }
}

impl std::error::Error for ShuttingDownError {}

/// Ships log events to a GELF collector from a dedicated background thread.
///
/// `submit` encodes on the calling thread and only ever waits on the queue, never on the network.
/// Delivery is best effort: failures are counted and reported to the optional callback.
pub struct GelfAppender {
    encoder: GelfEncoder,
    queue: Arc<DeliveryQueue>,
    counters: Arc<DeliveryCounters>,
    on_failure: Option<FailureCallback>,
    shutdown: CancellationToken,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl GelfAppender {
    /// Validates `config` and starts delivering. Invalid configuration is reported here and
    /// nothing is started.
    pub fn start(
        config: &GelfConfig,
        on_failure: Option<FailureCallback>,
    ) -> Result<Self, StartError> {
        let pipeline = config.build().context(BuildSnafu)?;
        Self::launch(pipeline, on_failure)
    }

    /// Starts delivering with already constructed components.
    pub fn launch(
        pipeline: Pipeline,
        on_failure: Option<FailureCallback>,
    ) -> Result<Self, StartError> {
        let Pipeline {
            encoder,
            transport,
            queue: settings,
        } = pipeline;

        let queue = Arc::new(DeliveryQueue::new(
            settings.capacity,
            settings.when_full,
            settings.block_timeout,
        ));
        let counters = Arc::new(DeliveryCounters::default());
        let shutdown = CancellationToken::new();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context(RuntimeSnafu)?;
        let worker = DeliveryWorker::new(
            Arc::clone(&queue),
            transport,
            settings.worker,
            Arc::clone(&counters),
            on_failure.clone(),
            shutdown.clone(),
        );
        let handle = thread::Builder::new()
            .name("gelf-delivery".to_owned())
            .spawn(move || runtime.block_on(worker.run()))
            .context(RuntimeSnafu)?;

        info!(
            message = "GELF appender started.",
            capacity = settings.capacity,
            when_full = settings.when_full.as_str(),
        );

        Ok(Self {
            encoder,
            queue,
            counters,
            on_failure,
            shutdown,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Encodes `event` and queues it for delivery. Only fails once shutdown has begun; every
    /// other problem is reported through the failure callback and the counters.
    pub fn submit(&self, event: LogEvent) -> Result<(), ShuttingDownError> {
        if self.queue.is_closed() {
            return Err(ShuttingDownError);
        }

        let payload = match self.encoder.encode(event) {
            Ok(payload) => payload,
            Err(error) => {
                emit!(GelfEncoderError { error: &error });
                self.report(DeliveryFailure::new(error.reason(), &error));
                return Ok(());
            }
        };

        match self.queue.push(QueueItem::new(payload)) {
            Ok(evicted) => {
                self.counters.enqueued();
                if evicted.is_some() {
                    self.report(DeliveryFailure::new(
                        FailureReason::QueueFull,
                        "evicted by a newer message",
                    ));
                }
                Ok(())
            }
            Err(EnqueueError::Full) => {
                self.report(DeliveryFailure::new(FailureReason::QueueFull, EnqueueError::Full));
                Ok(())
            }
            Err(EnqueueError::ShuttingDown) => Err(ShuttingDownError),
        }
    }

    /// Normalizes a framework record with `adapter` and submits it.
    pub fn append<A: EventAdapter>(
        &self,
        adapter: &A,
        event: &A::Event,
    ) -> Result<(), ShuttingDownError> {
        self.submit(adapter.normalize(event))
    }

    pub fn stats(&self) -> AppenderStats {
        self.counters.snapshot()
    }

    /// Stops accepting events, lets the worker drain for up to the grace period, and waits for it
    /// to release the connection. Calling it again is a no-op.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        self.queue.close();
        self.shutdown.cancel();
        if handle.join().is_err() {
            error!(message = "Delivery worker panicked.");
        }

        let stats = self.stats();
        info!(
            message = "GELF appender stopped.",
            sent = stats.sent,
            failed = stats.failed,
            dropped = stats.dropped,
        );
    }

    fn report(&self, failure: DeliveryFailure) {
        report_failure(&self.counters, self.on_failure.as_ref(), failure);
    }
}

impl Drop for GelfAppender {
    fn drop(&mut self) {
        self.shutdown();
    }
}
