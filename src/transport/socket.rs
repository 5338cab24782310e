//! Resilient reconnecting socket.
//!
//! [`TetherSocket`] is a handle to an actor task that owns the TCP stream
//! and the lifecycle state machine. Directives flow to the actor over a
//! channel; state is mirrored outward through a watch, lifecycle events
//! through an [`EventHub`], and inbound payloads through a single-consumer
//! channel that survives reconnects.
//!
//! The actor serializes everything: state transitions, event emission, and
//! wire writes all happen on one task, which is what makes the documented
//! event orderings exact rather than best-effort.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use crate::core::{CONNECT_TIMEOUT, TetherError, TetherResult};

use super::backoff::RetryPolicy;
use super::connection::{ConnectionState, RetryState};
use super::endpoint::EndpointSource;
use super::events::{EventHub, TetherEvent};
use super::frame;

/// Socket configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Deadline for a single candidate endpoint to accept.
    pub connect_timeout: Duration,

    /// Reconnect schedule.
    pub retry: RetryPolicy,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl SocketConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> SocketConfigBuilder {
        SocketConfigBuilder::new()
    }
}

/// Builder for [`SocketConfig`].
#[derive(Debug, Default)]
pub struct SocketConfigBuilder {
    config: SocketConfig,
}

impl SocketConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-candidate connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the reconnect schedule.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SocketConfig {
        self.config
    }
}

/// Control messages from handles to the actor.
enum Directive {
    Open(oneshot::Sender<TetherResult<()>>),
    Send(Vec<u8>, oneshot::Sender<TetherResult<()>>),
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<()>),
    Retry(oneshot::Sender<TetherResult<()>>),
    Interrupt(String),
    Close(String, Option<oneshot::Sender<()>>),
}

/// A reconnecting socket with an explicit lifecycle.
///
/// Construction is inert; [`open`](Self::open) starts the first connect
/// cycle. Once opened the socket keeps itself connected until
/// [`close`](Self::close), pausing only on request.
pub struct TetherSocket {
    directives: mpsc::UnboundedSender<Directive>,
    state_rx: watch::Receiver<ConnectionState>,
    events: Arc<EventHub>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl TetherSocket {
    /// Create the socket and its actor task.
    ///
    /// No network activity happens until [`open`](Self::open); until then
    /// the socket reports [`ConnectionState::Connecting`].
    pub fn new(source: EndpointSource, config: SocketConfig) -> Self {
        let (directive_tx, directive_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventHub::new());

        let actor = SocketActor {
            source,
            config,
            directives: directive_rx,
            state_tx,
            events: events.clone(),
            incoming_tx,
            retry: RetryState::new(config.retry),
            first_connect: true,
        };
        tokio::spawn(actor.run());

        Self {
            directives: directive_tx,
            state_rx,
            events,
            incoming: Mutex::new(Some(incoming_rx)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to lifecycle events emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TetherEvent> {
        self.events.subscribe()
    }

    /// Take the inbound payload receiver.
    ///
    /// There is exactly one; subsequent calls return `None`. The stream
    /// spans reconnects and ends when the socket closes.
    pub fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.incoming
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Begin the first connect cycle.
    ///
    /// Resolves once connected, or with the cycle's error after every
    /// candidate failed. A failed first cycle still arms the reconnect
    /// schedule; callers that give up must [`close`](Self::close).
    pub async fn open(&self) -> TetherResult<()> {
        if self.state().is_terminal() {
            return Err(TetherError::InvalidState("socket is closed".into()));
        }
        let (tx, rx) = oneshot::channel();
        self.directives
            .send(Directive::Open(tx))
            .map_err(|_| TetherError::ConnectionClosed)?;
        rx.await.map_err(|_| TetherError::ConnectionClosed)?
    }

    /// Transmit one payload on the live connection.
    ///
    /// Resolves once the payload is accepted for transmission; a failure
    /// after acceptance surfaces as an `Error` event and the reconnect
    /// path, never as a send error.
    pub async fn send(&self, payload: Vec<u8>) -> TetherResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(TetherError::ConnectionUnavailable);
        }
        let (tx, rx) = oneshot::channel();
        self.directives
            .send(Directive::Send(payload, tx))
            .map_err(|_| TetherError::ConnectionClosed)?;
        rx.await.map_err(|_| TetherError::ConnectionClosed)?
    }

    /// Suspend all network activity until [`resume`](Self::resume).
    ///
    /// A live connection is torn down first (`Disconnect`, then `Offline`).
    /// No reconnects are scheduled while paused. Has no effect before
    /// [`open`](Self::open) or after close.
    pub async fn pause(&self) {
        let (tx, rx) = oneshot::channel();
        if self.directives.send(Directive::Pause(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Leave the paused state and reconnect immediately.
    ///
    /// Emits `Online`, then a zero-delay `Schedule` for attempt zero. A
    /// no-op unless the socket is paused.
    pub async fn resume(&self) {
        let (tx, rx) = oneshot::channel();
        if self.directives.send(Directive::Resume(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Skip the pending backoff timer and retry now.
    ///
    /// Fails with [`TetherError::InvalidState`] unless a reconnect is
    /// currently scheduled.
    pub async fn retry_now(&self) -> TetherResult<()> {
        let (tx, rx) = oneshot::channel();
        self.directives
            .send(Directive::Retry(tx))
            .map_err(|_| TetherError::InvalidState("socket is closed".into()))?;
        rx.await
            .map_err(|_| TetherError::InvalidState("socket is closed".into()))?
    }

    /// Declare the live connection dead, entering the reconnect path.
    ///
    /// Used by higher layers when the link is up but unresponsive, for
    /// example after a missed liveness probe. A no-op unless connected.
    pub fn interrupt(&self, reason: impl Into<String>) {
        let _ = self.directives.send(Directive::Interrupt(reason.into()));
    }

    /// Terminal teardown. Emits `Close` and ends all event streams.
    ///
    /// Idempotent; later calls are no-ops.
    pub async fn close(&self, reason: impl Into<String>) {
        let (tx, rx) = oneshot::channel();
        if self
            .directives
            .send(Directive::Close(reason.into(), Some(tx)))
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

impl Drop for TetherSocket {
    fn drop(&mut self) {
        let _ = self
            .directives
            .send(Directive::Close("socket handle dropped".into(), None));
    }
}

impl std::fmt::Debug for TetherSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherSocket")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// What the actor does next after leaving a phase.
enum Phase {
    /// Created, waiting for `open()`.
    Idle,
    /// Connect cycle on behalf of an `open()` caller.
    Opening(oneshot::Sender<TetherResult<()>>),
    /// Connect cycle on behalf of the reconnect schedule.
    Cycling,
    /// Live connection.
    Connected {
        writer: OwnedWriteHalf,
        reader_done: oneshot::Receiver<Option<String>>,
        reader_task: JoinHandle<()>,
    },
    /// Waiting out a backoff delay.
    Retrying { deadline: Instant },
    /// Paused by the application.
    Offline,
    /// Done; the actor exits.
    Terminal,
}

struct SocketActor {
    source: EndpointSource,
    config: SocketConfig,
    directives: mpsc::UnboundedReceiver<Directive>,
    state_tx: watch::Sender<ConnectionState>,
    events: Arc<EventHub>,
    incoming_tx: mpsc::UnboundedSender<Vec<u8>>,
    retry: RetryState,
    first_connect: bool,
}

impl SocketActor {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Opening(ack) => self.cycle(Some(ack)).await,
                Phase::Cycling => self.cycle(None).await,
                Phase::Connected {
                    writer,
                    reader_done,
                    reader_task,
                } => self.connected(writer, reader_done, reader_task).await,
                Phase::Retrying { deadline } => self.retrying(deadline).await,
                Phase::Offline => self.offline().await,
                Phase::Terminal => break,
            };
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() != state {
            debug!(state = %state, "connection state changed");
            self.state_tx.send_replace(state);
        }
    }

    /// Waiting for `open()`. Nothing has touched the network yet.
    async fn idle(&mut self) -> Phase {
        while let Some(directive) = self.directives.recv().await {
            match directive {
                Directive::Open(ack) => return Phase::Opening(ack),
                Directive::Send(_, ack) => {
                    let _ = ack.send(Err(TetherError::ConnectionUnavailable));
                }
                Directive::Retry(ack) => {
                    let _ = ack.send(Err(TetherError::InvalidState(
                        "no connection has been opened".into(),
                    )));
                }
                Directive::Pause(ack) | Directive::Resume(ack) => {
                    let _ = ack.send(());
                }
                Directive::Interrupt(_) => {}
                Directive::Close(reason, ack) => return self.terminate(reason, ack),
            }
        }
        self.terminate("socket handle dropped".into(), None)
    }

    /// One connect cycle, interruptible by directives.
    async fn cycle(&mut self, mut ack: Option<oneshot::Sender<TetherResult<()>>>) -> Phase {
        self.set_state(ConnectionState::Connecting);
        let connect = connect_cycle(self.source.clone(), self.config.connect_timeout);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(stream) => self.on_connected(stream, ack),
                        Err(err) => self.on_cycle_failed(err, ack),
                    };
                }
                directive = self.directives.recv() => match directive {
                    Some(Directive::Open(tx)) => {
                        let _ = tx.send(Err(TetherError::InvalidState("already opened".into())));
                    }
                    Some(Directive::Send(_, tx)) => {
                        let _ = tx.send(Err(TetherError::ConnectionUnavailable));
                    }
                    Some(Directive::Retry(tx)) => {
                        let _ = tx.send(Err(TetherError::InvalidState(
                            "connect already in progress".into(),
                        )));
                    }
                    Some(Directive::Resume(tx)) => {
                        let _ = tx.send(());
                    }
                    Some(Directive::Pause(tx)) => {
                        if let Some(ack) = ack.take() {
                            let _ = ack.send(Err(TetherError::InvalidState(
                                "paused while connecting".into(),
                            )));
                        }
                        self.set_state(ConnectionState::Offline);
                        self.events.emit(TetherEvent::Offline);
                        let _ = tx.send(());
                        return Phase::Offline;
                    }
                    Some(Directive::Interrupt(_)) => {}
                    Some(Directive::Close(reason, tx)) => {
                        if let Some(ack) = ack.take() {
                            let _ = ack.send(Err(TetherError::ConnectionClosed));
                        }
                        return self.terminate(reason, tx);
                    }
                    None => {
                        if let Some(ack) = ack.take() {
                            let _ = ack.send(Err(TetherError::ConnectionClosed));
                        }
                        return self.terminate("socket handle dropped".into(), None);
                    }
                }
            }
        }
    }

    fn on_connected(
        &mut self,
        stream: TcpStream,
        ack: Option<oneshot::Sender<TetherResult<()>>>,
    ) -> Phase {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let _ = stream.set_nodelay(true);

        self.retry.reset();
        self.set_state(ConnectionState::Connected);
        if self.first_connect {
            self.first_connect = false;
            info!(%peer, "connection established");
            self.events.emit(TetherEvent::Open);
        } else {
            info!(%peer, "connection re-established");
            self.events.emit(TetherEvent::Reconnect);
        }
        if let Some(ack) = ack {
            let _ = ack.send(Ok(()));
        }

        let (mut reader, writer) = stream.into_split();
        let incoming = self.incoming_tx.clone();
        let (done_tx, reader_done) = oneshot::channel();
        let reader_task = tokio::spawn(async move {
            let outcome = read_loop(&mut reader, &incoming).await;
            let _ = done_tx.send(outcome);
        });

        Phase::Connected {
            writer,
            reader_done,
            reader_task,
        }
    }

    fn on_cycle_failed(
        &mut self,
        err: TetherError,
        ack: Option<oneshot::Sender<TetherResult<()>>>,
    ) -> Phase {
        warn!(error = %err, "connect cycle failed");
        self.events.emit(TetherEvent::Error {
            message: err.to_string(),
        });
        if let Some(ack) = ack {
            let _ = ack.send(Err(err));
        }
        self.schedule_retry()
    }

    /// Arm the backoff timer for the next attempt, or give up if the
    /// retry budget is spent.
    fn schedule_retry(&mut self) -> Phase {
        if self.retry.is_exhausted() {
            let reason = format!(
                "retry budget exhausted after {} attempts",
                self.retry.ordinal()
            );
            error!("{reason}");
            self.events.emit(TetherEvent::Error {
                message: reason.clone(),
            });
            return self.terminate(reason, None);
        }

        let attempt = self.retry.ordinal();
        let delay = self.retry.next_delay();
        debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.events.emit(TetherEvent::Schedule { attempt, delay });
        self.set_state(ConnectionState::Retrying);
        Phase::Retrying {
            deadline: Instant::now() + delay,
        }
    }

    /// Live connection: route directives to the writer, watch the reader.
    async fn connected(
        &mut self,
        mut writer: OwnedWriteHalf,
        mut reader_done: oneshot::Receiver<Option<String>>,
        reader_task: JoinHandle<()>,
    ) -> Phase {
        let next = loop {
            tokio::select! {
                outcome = &mut reader_done => {
                    let error = match outcome {
                        Ok(None) => {
                            info!("connection closed by peer");
                            None
                        }
                        Ok(Some(message)) => Some(message),
                        Err(_) => Some("reader task failed".into()),
                    };
                    break self.on_connection_lost(error);
                }
                directive = self.directives.recv() => match directive {
                    Some(Directive::Send(payload, tx)) => {
                        let _ = tx.send(Ok(()));
                        if let Err(err) = frame::write_frame(&mut writer, &payload).await {
                            break self.on_connection_lost(Some(err.to_string()));
                        }
                    }
                    Some(Directive::Open(tx)) => {
                        let _ = tx.send(Err(TetherError::InvalidState("already opened".into())));
                    }
                    Some(Directive::Retry(tx)) => {
                        let _ = tx.send(Err(TetherError::InvalidState(
                            "connection is live".into(),
                        )));
                    }
                    Some(Directive::Resume(tx)) => {
                        let _ = tx.send(());
                    }
                    Some(Directive::Pause(tx)) => {
                        info!("socket paused; tearing down live connection");
                        self.events.emit(TetherEvent::Disconnect);
                        self.set_state(ConnectionState::Offline);
                        self.events.emit(TetherEvent::Offline);
                        let _ = tx.send(());
                        break Phase::Offline;
                    }
                    Some(Directive::Interrupt(reason)) => {
                        warn!(%reason, "connection interrupted");
                        break self.on_connection_lost(Some(reason));
                    }
                    Some(Directive::Close(reason, tx)) => {
                        break self.terminate(reason, tx);
                    }
                    None => break self.terminate("socket handle dropped".into(), None),
                }
            }
        };
        reader_task.abort();
        next
    }

    fn on_connection_lost(&mut self, error: Option<String>) -> Phase {
        if let Some(message) = error {
            self.events.emit(TetherEvent::Error { message });
        }
        self.retry.reset();
        self.events.emit(TetherEvent::Disconnect);
        self.schedule_retry()
    }

    /// Waiting out the backoff delay.
    async fn retrying(&mut self, deadline: Instant) -> Phase {
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    let attempt = self.retry.begin_attempt();
                    self.events.emit(TetherEvent::Retry { attempt });
                    return Phase::Cycling;
                }
                directive = self.directives.recv() => match directive {
                    Some(Directive::Retry(tx)) => {
                        let attempt = self.retry.begin_attempt();
                        debug!(attempt, "retry forced ahead of schedule");
                        self.events.emit(TetherEvent::Retry { attempt });
                        let _ = tx.send(Ok(()));
                        return Phase::Cycling;
                    }
                    Some(Directive::Pause(tx)) => {
                        self.set_state(ConnectionState::Offline);
                        self.events.emit(TetherEvent::Offline);
                        let _ = tx.send(());
                        return Phase::Offline;
                    }
                    Some(Directive::Send(_, tx)) => {
                        let _ = tx.send(Err(TetherError::ConnectionUnavailable));
                    }
                    Some(Directive::Open(tx)) => {
                        let _ = tx.send(Err(TetherError::InvalidState("already opened".into())));
                    }
                    Some(Directive::Resume(tx)) => {
                        let _ = tx.send(());
                    }
                    Some(Directive::Interrupt(_)) => {}
                    Some(Directive::Close(reason, tx)) => return self.terminate(reason, tx),
                    None => return self.terminate("socket handle dropped".into(), None),
                }
            }
        }
    }

    /// Paused: nothing happens until resume or close.
    async fn offline(&mut self) -> Phase {
        while let Some(directive) = self.directives.recv().await {
            match directive {
                Directive::Resume(tx) => {
                    info!("socket resumed");
                    self.retry.reset();
                    self.events.emit(TetherEvent::Online);
                    self.events.emit(TetherEvent::Schedule {
                        attempt: 0,
                        delay: Duration::ZERO,
                    });
                    let attempt = self.retry.begin_attempt();
                    self.events.emit(TetherEvent::Retry { attempt });
                    let _ = tx.send(());
                    return Phase::Cycling;
                }
                Directive::Pause(tx) => {
                    let _ = tx.send(());
                }
                Directive::Send(_, tx) => {
                    let _ = tx.send(Err(TetherError::ConnectionUnavailable));
                }
                Directive::Open(tx) => {
                    let _ = tx.send(Err(TetherError::InvalidState("already opened".into())));
                }
                Directive::Retry(tx) => {
                    let _ = tx.send(Err(TetherError::InvalidState("socket is paused".into())));
                }
                Directive::Interrupt(_) => {}
                Directive::Close(reason, ack) => return self.terminate(reason, ack),
            }
        }
        self.terminate("socket handle dropped".into(), None)
    }

    /// Terminal teardown. The `Close` event is the last one ever emitted.
    fn terminate(&mut self, reason: String, ack: Option<oneshot::Sender<()>>) -> Phase {
        self.set_state(ConnectionState::Closed);
        info!(%reason, "socket closed");
        self.events.emit(TetherEvent::Close { reason });
        self.events.shutdown();
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        Phase::Terminal
    }
}

/// Try every candidate of one cycle strictly in order, no delay between
/// candidates. First success wins; otherwise the last error is returned.
async fn connect_cycle(
    source: EndpointSource,
    connect_timeout: Duration,
) -> TetherResult<TcpStream> {
    let candidates = source.resolve().await?;
    let mut last_err = TetherError::ResolutionFailed("endpoint list is empty".into());
    for endpoint in &candidates {
        debug!(%endpoint, "attempting candidate");
        match timeout(connect_timeout, TcpStream::connect(endpoint.as_str())).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) => {
                debug!(%endpoint, error = %err, "candidate failed");
                last_err = TetherError::Socket(format!("connect to {endpoint} failed: {err}"));
            }
            Err(_) => {
                debug!(%endpoint, "candidate timed out");
                last_err = TetherError::Socket(format!("connect to {endpoint} timed out"));
            }
        }
    }
    Err(last_err)
}

/// Pump inbound frames into the payload channel until the stream ends.
///
/// Returns `None` on clean EOF, `Some(message)` on a read error.
async fn read_loop(
    reader: &mut OwnedReadHalf,
    incoming: &mpsc::UnboundedSender<Vec<u8>>,
) -> Option<String> {
    loop {
        match frame::read_frame(reader).await {
            // A dropped consumer does not tear the connection down; the
            // lifecycle side may still be in use.
            Ok(payload) => {
                let _ = incoming.send(payload);
            }
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return None,
            Err(err) => return Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    fn fast_config() -> SocketConfig {
        SocketConfig::builder()
            .connect_timeout(Duration::from_secs(1))
            .retry(RetryPolicy::new(
                Duration::from_millis(20),
                Duration::from_millis(100),
            ))
            .build()
    }

    async fn recv_event(rx: &mut UnboundedReceiver<TetherEvent>) -> TetherEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream ended")
    }

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_open_skips_dead_candidates_in_order() {
        let (listener, addr) = bind().await;
        // Ports 1 and 2 are reserved and refuse immediately on loopback.
        let source = EndpointSource::fixed([
            "127.0.0.1:1".to_string(),
            "127.0.0.1:2".to_string(),
            addr,
        ]);
        let socket = TetherSocket::new(source, fast_config());
        let mut events = socket.subscribe();

        socket.open().await.unwrap();
        assert_eq!(socket.state(), ConnectionState::Connected);
        assert_eq!(recv_event(&mut events).await, TetherEvent::Open);
        listener.accept().await.unwrap();

        socket.close("test done").await;
    }

    #[tokio::test]
    async fn test_first_live_candidate_wins() {
        let (first, first_addr) = bind().await;
        let (second, second_addr) = bind().await;
        let socket = TetherSocket::new(
            EndpointSource::fixed([first_addr, second_addr]),
            fast_config(),
        );

        socket.open().await.unwrap();
        first.accept().await.unwrap();
        assert!(
            timeout(Duration::from_millis(100), second.accept())
                .await
                .is_err(),
            "second candidate must not be dialed when the first accepts"
        );

        socket.close("test done").await;
    }

    #[tokio::test]
    async fn test_send_fails_fast_without_a_connection() {
        let (_listener, addr) = bind().await;
        let socket = TetherSocket::new(EndpointSource::fixed([addr]), fast_config());

        let result = timeout(Duration::from_millis(50), socket.send(b"hello".to_vec())).await;
        assert_eq!(result.unwrap(), Err(TetherError::ConnectionUnavailable));

        // Closing the unopened socket does not change the answer.
        socket.close("never used").await;
        assert_eq!(
            socket.send(b"hello".to_vec()).await,
            Err(TetherError::ConnectionUnavailable)
        );
    }

    #[tokio::test]
    async fn test_payload_roundtrip() {
        let (listener, addr) = bind().await;
        let socket = TetherSocket::new(EndpointSource::fixed([addr]), fast_config());
        let mut incoming = socket.take_incoming().unwrap();
        assert!(socket.take_incoming().is_none());

        socket.open().await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        socket.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(frame::read_frame(&mut server).await.unwrap(), b"ping");

        frame::write_frame(&mut server, b"pong").await.unwrap();
        let payload = timeout(Duration::from_secs(5), incoming.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, b"pong");

        socket.close("test done").await;
    }

    #[tokio::test]
    async fn test_reconnect_sequence_after_peer_drop() {
        let (listener, addr) = bind().await;
        let socket = TetherSocket::new(EndpointSource::fixed([addr]), fast_config());
        let mut events = socket.subscribe();

        socket.open().await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        assert_eq!(recv_event(&mut events).await, TetherEvent::Open);

        // Force an unexpected closure; the listener stays up for the retry.
        drop(server);

        assert_eq!(recv_event(&mut events).await, TetherEvent::Disconnect);
        assert_eq!(
            recv_event(&mut events).await,
            TetherEvent::Schedule {
                attempt: 0,
                delay: Duration::from_millis(20),
            }
        );
        assert_eq!(
            recv_event(&mut events).await,
            TetherEvent::Retry { attempt: 0 }
        );
        assert_eq!(recv_event(&mut events).await, TetherEvent::Reconnect);
        assert_eq!(socket.state(), ConnectionState::Connected);
        listener.accept().await.unwrap();

        socket.close("test done").await;
    }

    #[tokio::test]
    async fn test_failed_open_arms_the_reconnect_schedule() {
        let socket = TetherSocket::new(
            EndpointSource::fixed(["127.0.0.1:1".to_string()]),
            fast_config(),
        );
        let mut events = socket.subscribe();

        let err = socket.open().await.unwrap_err();
        assert!(matches!(err, TetherError::Socket(_)));

        assert!(matches!(
            recv_event(&mut events).await,
            TetherEvent::Error { .. }
        ));
        assert_eq!(
            recv_event(&mut events).await,
            TetherEvent::Schedule {
                attempt: 0,
                delay: Duration::from_millis(20),
            }
        );
        assert_eq!(
            recv_event(&mut events).await,
            TetherEvent::Retry { attempt: 0 }
        );

        socket.close("giving up").await;
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_closes_the_socket() {
        let config = SocketConfig::builder()
            .connect_timeout(Duration::from_secs(1))
            .retry(
                RetryPolicy::new(Duration::from_millis(5), Duration::from_millis(5))
                    .with_max_retries(1),
            )
            .build();
        let socket = TetherSocket::new(
            EndpointSource::fixed(["127.0.0.1:1".to_string()]),
            config,
        );
        let mut events = socket.subscribe();

        let _ = socket.open().await;
        loop {
            match recv_event(&mut events).await {
                TetherEvent::Close { .. } => break,
                _ => continue,
            }
        }
        assert_eq!(socket.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_no_events_after_close() {
        let (listener, addr) = bind().await;
        let socket = TetherSocket::new(EndpointSource::fixed([addr]), fast_config());
        let mut events = socket.subscribe();

        socket.open().await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        assert_eq!(recv_event(&mut events).await, TetherEvent::Open);

        socket.close("shutting down").await;
        assert_eq!(socket.state(), ConnectionState::Closed);
        assert_eq!(
            recv_event(&mut events).await,
            TetherEvent::Close {
                reason: "shutting down".into(),
            }
        );

        // Peer-side teardown after close must not produce events.
        drop(server);
        assert!(events.recv().await.is_none());

        // The lifecycle is terminal.
        assert_eq!(
            socket.open().await,
            Err(TetherError::InvalidState("socket is closed".into()))
        );
        assert_eq!(
            socket.send(b"late".to_vec()).await,
            Err(TetherError::ConnectionUnavailable)
        );
    }

    #[tokio::test]
    async fn test_pause_and_resume_orderings() {
        let (listener, addr) = bind().await;
        let socket = TetherSocket::new(EndpointSource::fixed([addr]), fast_config());
        let mut events = socket.subscribe();

        socket.open().await.unwrap();
        listener.accept().await.unwrap();
        assert_eq!(recv_event(&mut events).await, TetherEvent::Open);

        socket.pause().await;
        assert_eq!(socket.state(), ConnectionState::Offline);
        assert_eq!(recv_event(&mut events).await, TetherEvent::Disconnect);
        assert_eq!(recv_event(&mut events).await, TetherEvent::Offline);

        // No reconnect scheduling while paused.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(events.try_recv().is_err());

        socket.resume().await;
        assert_eq!(recv_event(&mut events).await, TetherEvent::Online);
        assert_eq!(
            recv_event(&mut events).await,
            TetherEvent::Schedule {
                attempt: 0,
                delay: Duration::ZERO,
            }
        );
        assert_eq!(
            recv_event(&mut events).await,
            TetherEvent::Retry { attempt: 0 }
        );
        assert_eq!(recv_event(&mut events).await, TetherEvent::Reconnect);
        assert_eq!(socket.state(), ConnectionState::Connected);
        listener.accept().await.unwrap();

        socket.close("test done").await;
    }

    #[tokio::test]
    async fn test_retry_now_skips_the_backoff_timer() {
        let (listener, addr) = bind().await;
        // Swap the endpoint between cycles through a dynamic source.
        let target = Arc::new(Mutex::new(addr));
        let source_target = target.clone();
        let source = EndpointSource::resolver(move || {
            let target = source_target.clone();
            async move {
                let addr = target.lock().unwrap_or_else(|e| e.into_inner()).clone();
                Ok(vec![addr])
            }
        });

        let config = SocketConfig::builder()
            .connect_timeout(Duration::from_secs(1))
            .retry(RetryPolicy::new(
                Duration::from_secs(60),
                Duration::from_secs(60),
            ))
            .build();
        let socket = TetherSocket::new(source, config);
        let mut events = socket.subscribe();

        socket.open().await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        assert_eq!(recv_event(&mut events).await, TetherEvent::Open);

        // Forcing a retry while connected is an error.
        assert!(matches!(
            socket.retry_now().await,
            Err(TetherError::InvalidState(_))
        ));

        // Lose the connection; the 60 s backoff would stall the test.
        drop(server);
        drop(listener);
        assert_eq!(recv_event(&mut events).await, TetherEvent::Disconnect);
        assert!(matches!(
            recv_event(&mut events).await,
            TetherEvent::Schedule { attempt: 0, .. }
        ));
        assert_eq!(socket.state(), ConnectionState::Retrying);

        // Point the source at a fresh listener and skip the timer.
        let (fresh, fresh_addr) = bind().await;
        *target.lock().unwrap_or_else(|e| e.into_inner()) = fresh_addr;
        socket.retry_now().await.unwrap();

        assert_eq!(
            recv_event(&mut events).await,
            TetherEvent::Retry { attempt: 0 }
        );
        assert_eq!(recv_event(&mut events).await, TetherEvent::Reconnect);
        fresh.accept().await.unwrap();

        socket.close("test done").await;
    }

    #[tokio::test]
    async fn test_interrupt_enters_the_reconnect_path() {
        let (listener, addr) = bind().await;
        let socket = TetherSocket::new(EndpointSource::fixed([addr]), fast_config());
        let mut events = socket.subscribe();

        socket.open().await.unwrap();
        listener.accept().await.unwrap();
        assert_eq!(recv_event(&mut events).await, TetherEvent::Open);

        socket.interrupt("liveness probe missed");
        assert_eq!(
            recv_event(&mut events).await,
            TetherEvent::Error {
                message: "liveness probe missed".into(),
            }
        );
        assert_eq!(recv_event(&mut events).await, TetherEvent::Disconnect);
        assert!(matches!(
            recv_event(&mut events).await,
            TetherEvent::Schedule { attempt: 0, .. }
        ));

        socket.close("test done").await;
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let (listener, addr) = bind().await;
        let socket = TetherSocket::new(EndpointSource::fixed([addr]), fast_config());

        socket.open().await.unwrap();
        listener.accept().await.unwrap();
        assert!(matches!(
            socket.open().await,
            Err(TetherError::InvalidState(_))
        ));

        socket.close("test done").await;
    }

    #[tokio::test]
    async fn test_write_failure_is_an_event_not_a_send_error() {
        let (listener, addr) = bind().await;
        let socket = TetherSocket::new(EndpointSource::fixed([addr]), fast_config());
        let mut events = socket.subscribe();

        socket.open().await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        assert_eq!(recv_event(&mut events).await, TetherEvent::Open);

        // Half-close from the peer: the client sees EOF and reconnects.
        server.shutdown().await.unwrap();
        drop(server);

        // A send racing the teardown either gets accepted (failure then
        // surfaces as events) or is refused as unavailable; it is never a
        // transport error.
        let sent = socket.send(b"into the void".to_vec()).await;
        assert!(sent == Ok(()) || sent == Err(TetherError::ConnectionUnavailable));

        loop {
            match recv_event(&mut events).await {
                TetherEvent::Disconnect => break,
                TetherEvent::Error { .. } => continue,
                other => panic!("unexpected event before disconnect: {other:?}"),
            }
        }

        socket.close("test done").await;
    }
}
