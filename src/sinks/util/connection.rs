//! Connection lifecycle bookkeeping for stream transports, kept free of any I/O so the
//! reconnect and backoff rules can be exercised without sockets.

use std::{fmt, time::Duration};

use tokio::time::Instant;

use tokio_retry::strategy::ExponentialBackoff;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionEvent {
    ConnectStarted,
    ConnectSucceeded,
    ConnectFailed,
    WriteFailed,
    PeerClosed,
    Recycled,
    Reset,
    Closed,
}

impl ConnectionState {
    /// Transition table. Returns `None` for events that are not valid in the current state.
    pub const fn next(self, event: ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (Disconnected, ConnectStarted) => Some(Connecting),
            (Connecting, ConnectSucceeded) => Some(Connected),
            (Connecting, ConnectFailed) => Some(Failed),
            (Connected, WriteFailed | PeerClosed) => Some(Failed),
            (Connected, Recycled) => Some(Disconnected),
            (Failed, Reset) => Some(Disconnected),
            (_, Closed) => Some(Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Limits after which an open connection is closed and replaced.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecycleLimits {
    pub max_lifetime: Option<Duration>,
    pub max_idle: Option<Duration>,
}

/// Current state of a connection plus the failure history driving its backoff.
#[derive(Debug)]
pub struct ConnectionTracker {
    state: ConnectionState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    retry_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_used: Option<Instant>,
    reconnect_interval: Duration,
    max_reconnect_interval: Duration,
    backoff: ExponentialBackoff,
}

impl ConnectionTracker {
    /// The first retry waits `reconnect_interval`, each further one twice as long, up to
    /// `max_reconnect_interval`.
    pub fn new(reconnect_interval: Duration, max_reconnect_interval: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            last_failure: None,
            retry_at: None,
            connected_at: None,
            last_used: None,
            reconnect_interval,
            max_reconnect_interval,
            backoff: fresh_backoff(reconnect_interval, max_reconnect_interval),
        }
    }

    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub const fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    pub const fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    fn apply(&mut self, event: ConnectionEvent) {
        match self.state.next(event) {
            Some(next) => {
                trace!(
                    message = "Connection state changed.",
                    from = %self.state,
                    to = %next,
                    ?event,
                );
                self.state = next;
            }
            None => {
                debug!(
                    message = "Ignoring invalid connection transition.",
                    state = %self.state,
                    ?event,
                );
            }
        }
    }

    /// Whether a connection attempt is allowed at `now`.
    pub fn may_attempt(&self, now: Instant) -> bool {
        self.state == ConnectionState::Disconnected && self.retry_at.is_none_or(|at| now >= at)
    }

    pub fn connect_started(&mut self) {
        self.apply(ConnectionEvent::ConnectStarted);
    }

    pub fn connect_succeeded(&mut self, now: Instant) {
        self.apply(ConnectionEvent::ConnectSucceeded);
        self.connected_at = Some(now);
        self.last_used = Some(now);
        self.retry_at = None;
    }

    /// Records a failed connect, write or peer close: the connection passes through `Failed`
    /// and lands in `Disconnected` with the next attempt scheduled after the backoff delay.
    pub fn failed(&mut self, event: ConnectionEvent, now: Instant) -> Duration {
        self.apply(event);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);

        let delay = self.backoff.next().unwrap_or(Duration::ZERO);
        self.retry_at = Some(now + delay);
        self.connected_at = None;

        self.apply(ConnectionEvent::Reset);
        delay
    }

    /// A payload was fully written. Backoff starts over from its base delay.
    pub fn send_succeeded(&mut self, now: Instant) {
        self.last_used = Some(now);
        if self.consecutive_failures > 0 {
            self.consecutive_failures = 0;
            self.backoff = fresh_backoff(self.reconnect_interval, self.max_reconnect_interval);
        }
    }

    /// Returns why the open connection should be replaced before the next write, if it should.
    pub fn recycle_reason(&self, now: Instant, limits: RecycleLimits) -> Option<&'static str> {
        if self.state != ConnectionState::Connected {
            return None;
        }
        if let (Some(max), Some(at)) = (limits.max_lifetime, self.connected_at) {
            if now.duration_since(at) >= max {
                return Some("max_lifetime");
            }
        }
        if let (Some(max), Some(at)) = (limits.max_idle, self.last_used) {
            if now.duration_since(at) >= max {
                return Some("max_idle");
            }
        }
        None
    }

    pub fn recycled(&mut self) {
        self.apply(ConnectionEvent::Recycled);
        self.connected_at = None;
    }

    pub fn closed(&mut self) {
        self.apply(ConnectionEvent::Closed);
        self.connected_at = None;
    }
}

fn fresh_backoff(initial: Duration, max: Duration) -> ExponentialBackoff {
    let initial_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
    ExponentialBackoff::from_millis(2)
        .factor((initial_ms / 2).max(1))
        .max_delay(max)
}
