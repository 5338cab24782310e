//! Correlated request/reply connection.
//!
//! [`TetherConnection`] layers protocol semantics over a [`TetherSocket`]:
//! serial-correlated requests with per-request deadlines, heartbeat
//! liveness probing, a session handshake after every (re)connect, and
//! routing of unsolicited commands to registered sessions.
//!
//! A driver task owns the inbound frame stream and the transport event
//! stream. It never awaits a correlated reply itself; handshakes and
//! probes run on spawned tasks so the driver keeps draining frames.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::{
    HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT, REQUEST_TIMEOUT, TetherError, TetherResult,
};
use crate::transport::{ConnectionState, EventHub, TetherEvent, TetherSocket};

use super::command::{Command, CommandKind, OpKind};
use super::handshake::{SessionConfig, validate_signature};
use super::pending::PendingTable;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Default deadline for correlated requests.
    pub request_timeout: Duration,

    /// Gap between heartbeat probes; zero disables probing.
    pub heartbeat_interval: Duration,

    /// Deadline for a heartbeat probe before the link is declared dead.
    pub heartbeat_timeout: Duration,

    /// Application id stamped onto outgoing commands that lack one.
    pub app_id: Option<String>,

    /// Session handshake settings.
    pub session: SessionConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            app_id: None,
            session: SessionConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default request deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the heartbeat probe interval; zero disables probing.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the heartbeat probe deadline.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout = timeout;
        self
    }

    /// Stamp this application id onto outgoing commands.
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.config.app_id = Some(app_id.into());
        self
    }

    /// Set the session handshake settings.
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

struct Inner {
    socket: TetherSocket,
    config: ConnectionConfig,
    pending: Mutex<PendingTable>,
    routes: Mutex<HashMap<String, mpsc::UnboundedSender<Command>>>,
    identity: Mutex<Option<String>>,
    events: Arc<EventHub>,
    probe_outstanding: AtomicBool,
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_routes(&self) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<Command>>> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_identity(&self) -> MutexGuard<'_, Option<String>> {
        self.identity.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A protocol connection over a resilient socket.
///
/// Cheap to clone; all clones share one socket and one driver.
///
/// ```ignore
/// let socket = TetherSocket::new(
///     EndpointSource::fixed(["up.example.com:9080"]),
///     SocketConfig::default(),
/// );
/// let conn = TetherConnection::new(socket, ConnectionConfig::default());
/// conn.open().await?;
/// let online = conn.ping(["peer-1", "peer-2"]).await?;
/// ```
#[derive(Clone)]
pub struct TetherConnection {
    inner: Arc<Inner>,
}

impl TetherConnection {
    /// Wrap a socket, spawning the driver task.
    ///
    /// The socket's inbound payload stream is consumed here; commands
    /// arrive through [`register_session`](Self::register_session) inboxes
    /// and correlated replies, not through the raw socket.
    pub fn new(socket: TetherSocket, config: ConnectionConfig) -> Self {
        let frames = socket.take_incoming();
        let transport_events = socket.subscribe();

        let inner = Arc::new(Inner {
            socket,
            config,
            pending: Mutex::new(PendingTable::new()),
            routes: Mutex::new(HashMap::new()),
            identity: Mutex::new(None),
            events: Arc::new(EventHub::new()),
            probe_outstanding: AtomicBool::new(false),
        });

        let frames = frames.unwrap_or_else(|| {
            warn!("socket payload stream was already taken; inbound commands will be lost");
            mpsc::unbounded_channel().1
        });
        tokio::spawn(drive(Arc::downgrade(&inner), frames, transport_events));

        Self { inner }
    }

    /// Open the transport and establish the session.
    ///
    /// On handshake failure the transport is left open and retrying;
    /// callers that give up must [`close`](Self::close).
    pub async fn open(&self) -> TetherResult<()> {
        self.inner.socket.open().await?;
        open_session(&self.inner, false).await
    }

    /// Send a correlated request and await its reply.
    ///
    /// Uses the configured default deadline. An error reply surfaces as
    /// [`TetherError::ApplicationError`].
    pub async fn send_request(&self, command: Command) -> TetherResult<Command> {
        request(&self.inner, command, self.inner.config.request_timeout).await
    }

    /// Send a correlated request with an explicit deadline.
    pub async fn send_request_with_timeout(
        &self,
        command: Command,
        timeout: Duration,
    ) -> TetherResult<Command> {
        request(&self.inner, command, timeout).await
    }

    /// Send a command without awaiting a reply.
    pub async fn send(&self, command: Command) -> TetherResult<()> {
        send_plain(&self.inner, command).await
    }

    /// Ask which of the given identities are currently online.
    pub async fn ping(
        &self,
        targets: impl IntoIterator<Item = impl Into<String>>,
    ) -> TetherResult<Vec<String>> {
        let targets: Vec<String> = targets.into_iter().map(Into::into).collect();
        let reply = self.send_request(Command::presence_query(targets)).await?;
        Ok(reply.presence.and_then(|p| p.online).unwrap_or_default())
    }

    /// Register an inbox for unsolicited commands addressed to `identity`.
    ///
    /// Commands whose destination matches exactly are delivered here.
    /// Destination-less commands are delivered only while this is the
    /// single registered session. Re-registering an identity replaces the
    /// previous inbox.
    pub fn register_session(&self, identity: impl Into<String>) -> mpsc::UnboundedReceiver<Command> {
        let identity = identity.into();
        let (tx, rx) = mpsc::unbounded_channel();
        if self
            .inner
            .lock_routes()
            .insert(identity.clone(), tx)
            .is_some()
        {
            debug!(identity = %identity, "existing session route replaced");
        }
        rx
    }

    /// Remove the inbox for `identity`; its receiver ends.
    pub fn deregister_session(&self, identity: &str) {
        self.inner.lock_routes().remove(identity);
    }

    /// The identity assigned by the most recent session handshake.
    pub fn session_identity(&self) -> Option<String> {
        self.inner.lock_identity().clone()
    }

    /// Current transport state.
    pub fn state(&self) -> ConnectionState {
        self.inner.socket.state()
    }

    /// Subscribe to lifecycle events, including protocol-level errors.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TetherEvent> {
        self.inner.events.subscribe()
    }

    /// Suspend the underlying socket.
    pub async fn pause(&self) {
        self.inner.socket.pause().await;
    }

    /// Resume the underlying socket.
    pub async fn resume(&self) {
        self.inner.socket.resume().await;
    }

    /// Skip the pending reconnect backoff.
    pub async fn retry_now(&self) -> TetherResult<()> {
        self.inner.socket.retry_now().await
    }

    /// Close the connection; outstanding requests are rejected.
    pub async fn close(&self, reason: impl Into<String>) {
        self.inner.socket.close(reason).await;
    }
}

impl std::fmt::Debug for TetherConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherConnection")
            .field("state", &self.state())
            .field("identity", &self.session_identity())
            .field("pending", &self.inner.lock_pending().len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// DRIVER
// ============================================================================

async fn drive(
    inner: Weak<Inner>,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    mut transport_events: mpsc::UnboundedReceiver<TetherEvent>,
) {
    let (probing, period) = {
        let Some(inner) = inner.upgrade() else { return };
        let interval = inner.config.heartbeat_interval;
        if interval.is_zero() {
            (false, Duration::from_secs(3600))
        } else {
            (true, interval)
        }
    };
    let mut heartbeat = tokio::time::interval(period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.reset();

    let mut frames_open = true;
    loop {
        tokio::select! {
            frame = frames.recv(), if frames_open => match frame {
                Some(bytes) => {
                    let Some(inner) = inner.upgrade() else { break };
                    handle_frame(&inner, &bytes);
                }
                None => frames_open = false,
            },
            event = transport_events.recv() => {
                let Some(event) = event else { break };
                let Some(inner) = inner.upgrade() else { break };
                if handle_transport_event(&inner, event).is_break() {
                    break;
                }
            }
            _ = heartbeat.tick(), if probing => {
                let Some(inner) = inner.upgrade() else { break };
                spawn_probe(&inner);
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner
            .lock_pending()
            .fail_all(TetherError::ConnectionClosed);
        inner.events.shutdown();
    }
    debug!("connection driver stopped");
}

fn handle_frame(inner: &Arc<Inner>, bytes: &[u8]) {
    let command = match Command::decode(bytes) {
        Ok(command) => command,
        Err(err) => {
            warn!(error = %err, "undecodable frame dropped");
            return;
        }
    };

    let Some(serial) = command.serial else {
        dispatch_unsolicited(inner, command);
        return;
    };

    let slot = inner.lock_pending().take(serial);
    match slot {
        Some(tx) => {
            let outcome = match command {
                Command {
                    cmd: CommandKind::Error,
                    error: Some(payload),
                    ..
                } => Err(TetherError::ApplicationError {
                    code: payload.code,
                    reason: payload.reason,
                }),
                reply => Ok(reply),
            };
            let _ = tx.send(outcome);
        }
        None => {
            // The caller may have timed out already; the reply still
            // belongs to somebody.
            debug!(serial, "reply for unknown serial; dispatching as unsolicited");
            dispatch_unsolicited(inner, command);
        }
    }
}

fn dispatch_unsolicited(inner: &Arc<Inner>, command: Command) {
    // The server probes us too; answer in kind.
    if command.cmd == CommandKind::Echo {
        if let Some(serial) = command.serial {
            let weak = Arc::downgrade(inner);
            tokio::spawn(async move {
                let Some(inner) = weak.upgrade() else { return };
                if let Err(err) = send_plain(&inner, Command::echo_reply(serial)).await {
                    debug!(error = %err, "echo reply not sent");
                }
            });
        }
        return;
    }

    let destination = command.peer_id.clone();
    let routes = inner.lock_routes();
    match destination.as_deref() {
        Some(identity) => {
            if let Some(tx) = routes.get(identity) {
                let _ = tx.send(command);
            } else {
                debug!(peer = identity, "no session for destination; command dropped");
            }
        }
        None => {
            if routes.len() == 1 {
                if let Some(tx) = routes.values().next() {
                    let _ = tx.send(command);
                }
            } else {
                debug!(
                    sessions = routes.len(),
                    "no unique destination; command dropped"
                );
            }
        }
    }
}

fn handle_transport_event(inner: &Arc<Inner>, event: TetherEvent) -> ControlFlow<()> {
    match &event {
        TetherEvent::Reconnect => {
            inner.events.emit(event);
            let weak = Arc::downgrade(inner);
            tokio::spawn(async move {
                let Some(inner) = weak.upgrade() else { return };
                if let Err(err) = open_session(&inner, true).await {
                    warn!(error = %err, "session re-establishment failed");
                    inner.events.emit(TetherEvent::Error {
                        message: format!("session re-establishment failed: {err}"),
                    });
                    inner.socket.interrupt("session re-establishment failed");
                }
            });
            ControlFlow::Continue(())
        }
        TetherEvent::Disconnect => {
            inner.probe_outstanding.store(false, Ordering::SeqCst);
            inner.events.emit(event);
            ControlFlow::Continue(())
        }
        TetherEvent::Close { .. } => {
            inner
                .lock_pending()
                .fail_all(TetherError::ConnectionClosed);
            inner.events.emit(event);
            inner.events.shutdown();
            ControlFlow::Break(())
        }
        _ => {
            inner.events.emit(event);
            ControlFlow::Continue(())
        }
    }
}

fn spawn_probe(inner: &Arc<Inner>) {
    if inner.socket.state() != ConnectionState::Connected {
        return;
    }
    // One probe at a time; the outstanding probe's own deadline decides.
    if inner.probe_outstanding.swap(true, Ordering::SeqCst) {
        return;
    }
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let Some(inner) = weak.upgrade() else { return };
        let result = request(&inner, Command::echo(), inner.config.heartbeat_timeout).await;
        inner.probe_outstanding.store(false, Ordering::SeqCst);
        match result {
            Ok(_) => {}
            Err(TetherError::Timeout) => {
                warn!("heartbeat probe went unanswered");
                inner.socket.interrupt("heartbeat timeout");
            }
            Err(err) => debug!(error = %err, "heartbeat probe skipped"),
        }
    });
}

// ============================================================================
// REQUEST PIPELINE
// ============================================================================

async fn request(inner: &Inner, mut command: Command, timeout: Duration) -> TetherResult<Command> {
    if inner.socket.state() != ConnectionState::Connected {
        return Err(TetherError::ConnectionUnavailable);
    }

    let (tx, rx) = oneshot::channel();
    let serial = inner.lock_pending().issue(tx);
    command.serial = Some(serial);
    if command.app_id.is_none() {
        command.app_id = inner.config.app_id.clone();
    }

    let bytes = match command.encode() {
        Ok(bytes) => bytes,
        Err(err) => {
            inner.lock_pending().take(serial);
            return Err(err);
        }
    };
    if let Err(err) = inner.socket.send(bytes).await {
        inner.lock_pending().take(serial);
        return Err(err);
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => Err(TetherError::ConnectionClosed),
        Err(_) => {
            inner.lock_pending().take(serial);
            debug!(
                serial,
                timeout_ms = timeout.as_millis() as u64,
                "request timed out"
            );
            Err(TetherError::Timeout)
        }
    }
}

async fn send_plain(inner: &Inner, mut command: Command) -> TetherResult<()> {
    if command.app_id.is_none() {
        command.app_id = inner.config.app_id.clone();
    }
    inner.socket.send(command.encode()?).await
}

/// Run the session handshake on the live connection.
///
/// Invokes the signature factory when one is configured, validates its
/// output, and adopts the identity from the server's reply.
async fn open_session(inner: &Inner, reconnect: bool) -> TetherResult<()> {
    let session = &inner.config.session;
    let adopted = inner.lock_identity().clone();
    // A resumption claim needs an identity from a previous epoch.
    let reconnect = reconnect && adopted.is_some();
    let requested = adopted.or_else(|| session.identity.clone());

    let signature = match &session.signature_factory {
        Some(factory) => {
            let produced = factory(requested.clone()).await.map_err(|message| {
                TetherError::HandshakeFailed(format!("signature callback failed: {message}"))
            })?;
            validate_signature(&produced)?;
            Some(produced)
        }
        None => None,
    };

    let command =
        Command::session_open(requested, session.capability_string(), reconnect, signature);
    let reply = request(inner, command, inner.config.request_timeout).await?;
    if reply.op != Some(OpKind::Opened) {
        debug!(op = ?reply.op, "unexpected session reply operation");
    }
    match reply.peer_id {
        Some(identity) => {
            info!(identity = %identity, reconnect, "session established");
            *inner.lock_identity() = Some(identity);
        }
        None => warn!("session opened without an identity assignment"),
    }
    Ok(())
}
