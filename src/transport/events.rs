//! Lifecycle event vocabulary and fan-out.
//!
//! Every layer of the stack reports through the same [`TetherEvent`] set.
//! Events are emitted from a single task per connection, so each subscriber
//! observes the full causal order: a `Disconnect` always precedes the
//! `Schedule` it provokes, a `Schedule` always precedes its `Retry`, and
//! nothing follows `Close`.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TetherEvent {
    /// First successful connection of this socket.
    Open,
    /// Informational failure report; never fatal by itself.
    Error {
        /// Rendered cause.
        message: String,
    },
    /// The live connection was lost.
    Disconnect,
    /// A reconnect attempt was scheduled. Emitted before the timer starts.
    Schedule {
        /// Attempt ordinal the schedule announces.
        attempt: u32,
        /// Delay until the attempt begins.
        delay: Duration,
    },
    /// A reconnect attempt is beginning.
    Retry {
        /// Attempt ordinal, matching the preceding `Schedule`.
        attempt: u32,
    },
    /// A connection was re-established after a loss.
    Reconnect,
    /// The socket was paused; reconnect activity is suppressed.
    Offline,
    /// The socket was resumed; a zero-delay reconnect follows.
    Online,
    /// Terminal teardown. Always the last event.
    Close {
        /// Why the socket closed.
        reason: String,
    },
}

impl TetherEvent {
    /// Short stable name, used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            TetherEvent::Open => "open",
            TetherEvent::Error { .. } => "error",
            TetherEvent::Disconnect => "disconnect",
            TetherEvent::Schedule { .. } => "schedule",
            TetherEvent::Retry { .. } => "retry",
            TetherEvent::Reconnect => "reconnect",
            TetherEvent::Offline => "offline",
            TetherEvent::Online => "online",
            TetherEvent::Close { .. } => "close",
        }
    }
}

/// Fan-out point for [`TetherEvent`] streams.
///
/// Subscribers receive every event emitted after they subscribed, in
/// emission order. Dropped receivers are pruned on the next emit.
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<UnboundedSender<TetherEvent>>>,
}

impl EventHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new subscriber.
    pub fn subscribe(&self) -> UnboundedReceiver<TetherEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: TetherEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop every subscriber channel, ending all receivers.
    ///
    /// Called after the terminal `Close` event so subscriber loops finish.
    pub fn shutdown(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<UnboundedSender<TetherEvent>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
