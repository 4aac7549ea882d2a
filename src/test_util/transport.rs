use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::sinks::{Transport, TransportError};

#[derive(Default)]
struct State {
    sent: Vec<Bytes>,
    attempts: usize,
    script: VecDeque<bool>,
    closed: bool,
}

/// In-memory transport. Clones share state, so a test keeps one handle and gives the other to
/// the worker.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<State>>,
    delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send waits this long before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The next `count` sends fail with a write error.
    pub fn fail_next(&self, count: usize) {
        self.state
            .lock()
            .script
            .extend(std::iter::repeat_n(false, count));
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.state.lock().sent.clone()
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn protocol(&self) -> &'static str {
        "fake"
    }

    async fn send(&mut self, payload: Bytes) -> Result<usize, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.attempts += 1;
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.script.pop_front() == Some(false) {
            return Err(TransportError::Write {
                source: std::io::ErrorKind::BrokenPipe.into(),
            });
        }
        state.sent.push(payload);
        Ok(1)
    }

    async fn close(&mut self) -> usize {
        self.state.lock().closed = true;
        0
    }
}
