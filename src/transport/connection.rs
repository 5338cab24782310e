//! Connection lifecycle state machine.
//!
//! A socket is in exactly one [`ConnectionState`] at any instant. All
//! transitions happen inside the socket actor task; handles observe the
//! current state through a watch mirror and the event stream.

use std::fmt;
use std::time::Duration;

use super::backoff::RetryPolicy;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connect cycle is in progress.
    Connecting,
    /// A live socket is established.
    Connected,
    /// Disconnected; a reconnect attempt is scheduled.
    Retrying,
    /// Paused by the application; no reconnect activity.
    Offline,
    /// Terminal. No transition leaves this state.
    Closed,
}

impl ConnectionState {
    /// Whether traffic can be transmitted right now.
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// Whether the lifecycle has ended.
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Retrying => "disconnected-retrying",
            ConnectionState::Offline => "paused-offline",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// Reconnect attempt bookkeeping.
///
/// The ordinal counts failed cycles since the last successful connection.
/// A `Schedule` event always carries the ordinal of the attempt it
/// announces; the matching `Retry` event carries the same ordinal.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    ordinal: u32,
}

impl RetryState {
    /// Create bookkeeping for the given policy, starting at ordinal zero.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, ordinal: 0 }
    }

    /// Ordinal of the next attempt to be scheduled.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Backoff delay for the next attempt.
    pub fn next_delay(&self) -> Duration {
        self.policy.delay_for(self.ordinal)
    }

    /// Whether the retry budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.policy.is_exhausted(self.ordinal)
    }

    /// Consume the next ordinal as an attempt begins.
    ///
    /// Returns the ordinal the attempt runs under; subsequent failures are
    /// scheduled with the incremented ordinal.
    pub fn begin_attempt(&mut self) -> u32 {
        let current = self.ordinal;
        self.ordinal = self.ordinal.saturating_add(1);
        current
    }

    /// Reset after a successful connection (or an application resume).
    pub fn reset(&mut self) {
        self.ordinal = 0;
    }
}
