//! Pooled session hub.
//!
//! [`Realtime`] hands out [`ClientSession`]s while keeping at most one
//! [`TetherConnection`] per (application, region, capability) key. The
//! first registration for a key starts the connection; everyone else
//! joins the same in-flight open. The last session to leave closes the
//! connection, exactly once.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::{DEFAULT_REGION, TetherError, TetherResult};
use crate::protocol::{
    Command, ConnectionConfig, SessionConfig, Signature, SignatureFactory, SignatureFuture,
    TetherConnection,
};
use crate::transport::{EndpointSource, EventHub, SocketConfig, TetherEvent, TetherSocket};

use super::router::{Router, RouterQuery, RouterResponse};

/// An application endpoint wanting its own session on a shared connection.
#[derive(Clone)]
pub struct SessionOwner {
    /// Session identity; unsolicited commands addressed to it land in
    /// this owner's inbox.
    pub identity: String,

    /// Capability string; owners with different capabilities get
    /// separate pooled connections.
    pub capabilities: Option<String>,

    /// Signature factory used when this owner is the one to open the
    /// pooled connection.
    pub signature_factory: Option<Arc<SignatureFactory>>,
}

impl SessionOwner {
    /// An owner with the given identity and default capabilities.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            capabilities: None,
            signature_factory: None,
        }
    }

    /// Partition this owner onto connections with the given capabilities.
    pub fn with_capabilities(mut self, capabilities: impl Into<String>) -> Self {
        self.capabilities = Some(capabilities.into());
        self
    }

    /// Attach a signature factory for the session handshake.
    pub fn with_signature_factory<F, Fut>(mut self, factory: F) -> Self
    where
        F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Signature, String>> + Send + 'static,
    {
        self.signature_factory = Some(Arc::new(move |identity| {
            Box::pin(factory(identity)) as SignatureFuture
        }));
        self
    }
}

impl fmt::Debug for SessionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOwner")
            .field("identity", &self.identity)
            .field("capabilities", &self.capabilities)
            .field(
                "signature_factory",
                &self.signature_factory.as_ref().map(|_| ".."),
            )
            .finish()
    }
}

/// One session riding a pooled connection.
#[derive(Debug)]
pub struct ClientSession {
    /// The shared connection; requests and presence queries go here.
    pub connection: TetherConnection,

    /// Unsolicited commands addressed to this session.
    pub inbox: mpsc::UnboundedReceiver<Command>,
}

/// Hub configuration assembled by [`RealtimeBuilder`].
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Application id; stamped onto every outgoing command.
    pub app_id: String,

    /// Region the application is homed in.
    pub region: String,

    /// Transport settings for pooled connections.
    pub socket: SocketConfig,

    /// Protocol settings for pooled connections.
    pub connection: ConnectionConfig,
}

type SharedOpen = Shared<BoxFuture<'static, TetherResult<TetherConnection>>>;

struct PoolSlot {
    open: SharedOpen,
    owners: HashSet<String>,
    generation: u64,
}

/// Connection-pooling entry point.
///
/// See the crate root for a complete example.
pub struct Realtime {
    config: RealtimeConfig,
    router: Arc<Router>,
    pool: Mutex<HashMap<String, PoolSlot>>,
    events: Arc<EventHub>,
    next_generation: AtomicU64,
}

impl Realtime {
    /// Start building a hub for the given application.
    pub fn builder(app_id: impl Into<String>) -> RealtimeBuilder {
        RealtimeBuilder::new(app_id.into())
    }

    /// Open (or join) the pooled connection for `owner` and register its
    /// session.
    ///
    /// Concurrent calls for the same pool key share a single connection
    /// attempt; a failure is reported to every caller and leaves no
    /// half-open state behind.
    pub async fn open_for(&self, owner: &SessionOwner) -> TetherResult<ClientSession> {
        let key = self.pool_key(owner);
        let (open, generation) = {
            let mut pool = self.lock_pool();
            match pool.get_mut(&key) {
                Some(slot) => {
                    slot.owners.insert(owner.identity.clone());
                    debug!(
                        key = %key,
                        owner = %owner.identity,
                        owners = slot.owners.len(),
                        "joined pooled connection"
                    );
                    (slot.open.clone(), slot.generation)
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let open = start_open(
                        self.config.clone(),
                        session_for(owner),
                        self.router.clone(),
                        self.events.clone(),
                        key.clone(),
                    );
                    info!(key = %key, owner = %owner.identity, "opening pooled connection");
                    pool.insert(
                        key.clone(),
                        PoolSlot {
                            open: open.clone(),
                            owners: HashSet::from([owner.identity.clone()]),
                            generation,
                        },
                    );
                    (open, generation)
                }
            }
        };

        match open.await {
            Ok(connection) => {
                let inbox = connection.register_session(owner.identity.as_str());
                Ok(ClientSession { connection, inbox })
            }
            Err(err) => {
                // Walk this owner back out; drop the slot when it was the
                // last one, unless a newer slot took the key over.
                let mut pool = self.lock_pool();
                if let Some(slot) = pool.get_mut(&key) {
                    if slot.generation == generation {
                        slot.owners.remove(&owner.identity);
                        if slot.owners.is_empty() {
                            pool.remove(&key);
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Remove `owner`'s session; the last owner out closes the
    /// connection.
    pub async fn deregister(&self, owner: &SessionOwner) {
        let key = self.pool_key(owner);
        let open = {
            let mut pool = self.lock_pool();
            let Some(slot) = pool.get_mut(&key) else { return };
            slot.owners.remove(&owner.identity);
            if !slot.owners.is_empty() {
                if let Some(Ok(connection)) = slot.open.peek() {
                    connection.deregister_session(&owner.identity);
                }
                debug!(
                    key = %key,
                    owner = %owner.identity,
                    owners = slot.owners.len(),
                    "left pooled connection"
                );
                return;
            }
            pool.remove(&key).map(|slot| slot.open)
        };
        let Some(open) = open else { return };

        info!(key = %key, "last session left; closing pooled connection");
        match open.peek() {
            Some(Ok(connection)) => {
                connection.deregister_session(&owner.identity);
                connection.close("no remaining sessions").await;
            }
            Some(Err(_)) => {}
            None => {
                // The open is still in flight; finish it off the hot path
                // and tear the connection down once it lands.
                let identity = owner.identity.clone();
                tokio::spawn(async move {
                    if let Ok(connection) = open.await {
                        connection.deregister_session(&identity);
                        connection.close("no remaining sessions").await;
                    }
                });
            }
        }
    }

    /// Skip the backoff on every pooled connection waiting to reconnect.
    ///
    /// Fails with [`TetherError::InvalidState`] when no connection has
    /// been opened or any pooled connection is currently live.
    pub async fn retry(&self) -> TetherResult<()> {
        let connections = self.resolved_connections();
        if connections.is_empty() {
            return Err(TetherError::InvalidState("no connection opened".into()));
        }
        if connections.iter().any(|c| c.state().is_connected()) {
            return Err(TetherError::InvalidState("connection is live".into()));
        }
        for connection in connections {
            connection.retry_now().await?;
        }
        Ok(())
    }

    /// Pause every pooled connection.
    pub async fn pause(&self) {
        for connection in self.resolved_connections() {
            connection.pause().await;
        }
    }

    /// Resume every pooled connection.
    pub async fn resume(&self) {
        for connection in self.resolved_connections() {
            connection.resume().await;
        }
    }

    /// Subscribe to lifecycle events from every pooled connection.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TetherEvent> {
        self.events.subscribe()
    }

    /// Number of pooled connections, including ones still opening.
    pub fn connection_count(&self) -> usize {
        self.lock_pool().len()
    }

    /// Close every pooled connection and empty the pool.
    pub async fn close(&self) {
        let opens: Vec<SharedOpen> = {
            let mut pool = self.lock_pool();
            pool.drain().map(|(_, slot)| slot.open).collect()
        };
        for open in opens {
            if let Ok(connection) = open.await {
                connection.close("hub closed").await;
            }
        }
        info!("realtime hub closed");
    }

    fn pool_key(&self, owner: &SessionOwner) -> String {
        format!(
            "{}/{}/{}",
            self.config.app_id,
            self.config.region,
            owner.capabilities.as_deref().unwrap_or("")
        )
    }

    fn lock_pool(&self) -> MutexGuard<'_, HashMap<String, PoolSlot>> {
        self.pool.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn resolved_connections(&self) -> Vec<TetherConnection> {
        self.lock_pool()
            .values()
            .filter_map(|slot| match slot.open.peek() {
                Some(Ok(connection)) => Some(connection.clone()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Debug for Realtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realtime")
            .field("app_id", &self.config.app_id)
            .field("region", &self.config.region)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

fn session_for(owner: &SessionOwner) -> SessionConfig {
    SessionConfig {
        identity: Some(owner.identity.clone()),
        capabilities: owner.capabilities.clone(),
        signature_factory: owner.signature_factory.clone(),
    }
}

fn start_open(
    config: RealtimeConfig,
    session: SessionConfig,
    router: Arc<Router>,
    hub_events: Arc<EventHub>,
    key: String,
) -> SharedOpen {
    async move {
        let query = RouterQuery {
            app_id: config.app_id.clone(),
            region: config.region.clone(),
        };
        let servers = router.resolve(query).await?;

        let socket = TetherSocket::new(EndpointSource::fixed(servers), config.socket);
        let mut connection_config = config.connection;
        connection_config.app_id = Some(config.app_id);
        connection_config.session = session;
        let connection = TetherConnection::new(socket, connection_config);

        // Mirror this connection's events onto the hub stream.
        let mut events = connection.subscribe();
        let tag = key.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                hub_events.emit(event);
            }
            debug!(key = %tag, "pooled connection event stream ended");
        });

        if let Err(err) = connection.open().await {
            warn!(key = %key, error = %err, "pooled connection failed to open");
            connection.close("initial open failed").await;
            return Err(err);
        }
        info!(key = %key, "pooled connection ready");
        Ok(connection)
    }
    .boxed()
    .shared()
}

/// Builder for [`Realtime`].
pub struct RealtimeBuilder {
    app_id: String,
    region: String,
    servers: Option<Vec<String>>,
    resolver: Option<Router>,
    socket: SocketConfig,
    connection: ConnectionConfig,
}

impl RealtimeBuilder {
    fn new(app_id: String) -> Self {
        Self {
            app_id,
            region: DEFAULT_REGION.to_string(),
            servers: None,
            resolver: None,
            socket: SocketConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }

    /// Set the region; defaults to the global region.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Connect to these servers, skipping resolution entirely.
    ///
    /// Takes precedence over [`resolver`](Self::resolver).
    pub fn servers(mut self, servers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.servers = Some(servers.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve servers through an async lookup, cached per its TTL.
    pub fn resolver<F, Fut>(mut self, resolver: F) -> Self
    where
        F: Fn(RouterQuery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TetherResult<RouterResponse>> + Send + 'static,
    {
        self.resolver = Some(Router::resolving(resolver));
        self
    }

    /// Transport settings for pooled connections.
    pub fn socket(mut self, config: SocketConfig) -> Self {
        self.socket = config;
        self
    }

    /// Protocol settings for pooled connections.
    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    /// Build the hub.
    pub fn build(self) -> Realtime {
        let router = match (self.servers, self.resolver) {
            (Some(servers), _) => Router::fixed(servers),
            (None, Some(router)) => router,
            (None, None) => Router::unconfigured(),
        };
        Realtime {
            config: RealtimeConfig {
                app_id: self.app_id,
                region: self.region,
                socket: self.socket,
                connection: self.connection,
            },
            router: Arc::new(router),
            pool: Mutex::new(HashMap::new()),
            events: Arc::new(EventHub::new()),
            next_generation: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::json;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout as with_deadline;

    use crate::protocol::{CommandKind, OpKind};
    use crate::transport::{ConnectionState, RetryPolicy, frame};

    use super::*;

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    async fn read_command(stream: &mut TcpStream) -> Command {
        let bytes = with_deadline(Duration::from_secs(5), frame::read_frame(stream))
            .await
            .expect("timed out waiting for a command")
            .unwrap();
        Command::decode(&bytes).unwrap()
    }

    async fn write_command(stream: &mut TcpStream, command: &Command) {
        frame::write_frame(stream, &command.encode().unwrap())
            .await
            .unwrap();
    }

    async fn accept_session(listener: &TcpListener, fallback: &str) -> (TcpStream, Command) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let open = read_command(&mut stream).await;
        assert_eq!(open.cmd, CommandKind::Session);
        let assigned = open.peer_id.clone().unwrap_or_else(|| fallback.to_string());
        let reply = Command {
            op: Some(OpKind::Opened),
            serial: open.serial,
            peer_id: Some(assigned),
            ..Command::new(CommandKind::Session)
        };
        write_command(&mut stream, &reply).await;
        (stream, open)
    }

    /// Owned-listener variant for handing accepts between tasks.
    async fn serve_one(
        listener: TcpListener,
        fallback: &'static str,
    ) -> (TcpListener, TcpStream, Command) {
        let (stream, open) = accept_session(&listener, fallback).await;
        (listener, stream, open)
    }

    fn test_hub(addr: String) -> Realtime {
        Realtime::builder("pool-app")
            .region("test")
            .servers([addr])
            .socket(
                SocketConfig::builder()
                    .retry(RetryPolicy::new(
                        Duration::from_millis(20),
                        Duration::from_millis(100),
                    ))
                    .build(),
            )
            .connection(
                ConnectionConfig::builder()
                    .heartbeat_interval(Duration::ZERO)
                    .build(),
            )
            .build()
    }

    #[tokio::test]
    async fn test_owners_share_one_pooled_connection() {
        let (listener, addr) = bind().await;
        let hub = test_hub(addr);

        let server = tokio::spawn(async move {
            let (stream, open) = accept_session(&listener, "x").await;
            // No second connection may be dialed.
            let second = with_deadline(Duration::from_millis(200), listener.accept()).await;
            (stream, open, second.is_err())
        });

        let owner_a = SessionOwner::new("owner-a");
        let owner_b = SessionOwner::new("owner-b");
        let (session_a, session_b) = tokio::join!(hub.open_for(&owner_a), hub.open_for(&owner_b));
        let session_a = session_a.unwrap();
        let session_b = session_b.unwrap();

        assert_eq!(hub.connection_count(), 1);
        // The slot creator's identity was used for the handshake.
        assert_eq!(
            session_a.connection.session_identity().as_deref(),
            Some("owner-a")
        );
        assert_eq!(
            session_b.connection.session_identity().as_deref(),
            Some("owner-a")
        );

        let (_stream, open, lone_connection) = server.await.unwrap();
        assert!(lone_connection);
        assert_eq!(open.peer_id.as_deref(), Some("owner-a"));
        assert_eq!(open.app_id.as_deref(), Some("pool-app"));

        hub.close().await;
    }

    #[tokio::test]
    async fn test_capabilities_partition_the_pool() {
        let (listener, addr) = bind().await;
        let hub = test_hub(addr);

        let task = tokio::spawn(serve_one(listener, "x"));
        hub.open_for(&SessionOwner::new("plain")).await.unwrap();
        let (listener, _plain_stream, _) = task.await.unwrap();

        let task = tokio::spawn(serve_one(listener, "x"));
        hub.open_for(&SessionOwner::new("tuned").with_capabilities("audio/1"))
            .await
            .unwrap();
        let (_listener, _audio_stream, audio_open) = task.await.unwrap();

        assert_eq!(hub.connection_count(), 2);
        assert_eq!(
            audio_open.session.unwrap().capabilities.as_deref(),
            Some("audio/1")
        );

        hub.close().await;
    }

    #[tokio::test]
    async fn test_last_owner_out_closes_the_connection() {
        let (listener, addr) = bind().await;
        let hub = test_hub(addr);
        let owner_a = SessionOwner::new("owner-a");
        let owner_b = SessionOwner::new("owner-b");

        let task = tokio::spawn(serve_one(listener, "x"));
        let mut session_a = hub.open_for(&owner_a).await.unwrap();
        let (listener, mut stream, _) = task.await.unwrap();
        hub.open_for(&owner_b).await.unwrap();

        // One owner leaving keeps the connection up.
        hub.deregister(&owner_a).await;
        assert_eq!(hub.connection_count(), 1);
        assert!(
            with_deadline(Duration::from_millis(150), frame::read_frame(&mut stream))
                .await
                .is_err(),
            "connection must stay open while an owner remains"
        );
        // The departed owner's inbox ends.
        assert!(session_a.inbox.recv().await.is_none());

        // The last owner leaving closes it.
        hub.deregister(&owner_b).await;
        let eof = with_deadline(Duration::from_secs(5), frame::read_frame(&mut stream))
            .await
            .unwrap();
        assert!(eof.is_err(), "server must observe the close");
        assert_eq!(hub.connection_count(), 0);

        // A later registration opens a fresh connection.
        let task = tokio::spawn(serve_one(listener, "x"));
        hub.open_for(&owner_a).await.unwrap();
        task.await.unwrap();
        assert_eq!(hub.connection_count(), 1);

        hub.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_departures_close_the_connection_once() {
        let (listener, addr) = bind().await;
        let hub = test_hub(addr);
        let owner_a = SessionOwner::new("owner-a");
        let owner_b = SessionOwner::new("owner-b");

        let task = tokio::spawn(serve_one(listener, "x"));
        hub.open_for(&owner_a).await.unwrap();
        let (_listener, mut stream, _) = task.await.unwrap();
        hub.open_for(&owner_b).await.unwrap();

        tokio::join!(hub.deregister(&owner_a), hub.deregister(&owner_b));

        assert_eq!(hub.connection_count(), 0);
        let eof = with_deadline(Duration::from_secs(5), frame::read_frame(&mut stream))
            .await
            .unwrap();
        assert!(eof.is_err(), "server must observe the close");
    }

    #[tokio::test]
    async fn test_failed_open_is_shared_and_leaves_no_slot() {
        let hub = test_hub("127.0.0.1:1".to_string());
        let owner_a = SessionOwner::new("owner-a");
        let owner_b = SessionOwner::new("owner-b");

        let (left, right) = tokio::join!(hub.open_for(&owner_a), hub.open_for(&owner_b));
        assert!(left.is_err());
        assert!(right.is_err());
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_resolver_backed_pool_caches_the_lookup() {
        let (listener, addr) = bind().await;
        let calls = Arc::new(AtomicUsize::new(0));

        let resolver_calls = calls.clone();
        let hub = Realtime::builder("pool-app")
            .region("eu-1")
            .resolver(move |query| {
                let calls = resolver_calls.clone();
                let addr = addr.clone();
                async move {
                    assert_eq!(query.app_id, "pool-app");
                    assert_eq!(query.region, "eu-1");
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(RouterResponse {
                        servers: vec![addr],
                        ttl: Duration::from_secs(60),
                    })
                }
            })
            .connection(
                ConnectionConfig::builder()
                    .heartbeat_interval(Duration::ZERO)
                    .build(),
            )
            .build();
        let owner = SessionOwner::new("owner-a");

        let task = tokio::spawn(serve_one(listener, "x"));
        hub.open_for(&owner).await.unwrap();
        let (listener, _stream, _) = task.await.unwrap();
        hub.deregister(&owner).await;

        // The second open reuses the cached resolution.
        let task = tokio::spawn(serve_one(listener, "x"));
        hub.open_for(&owner).await.unwrap();
        task.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        hub.close().await;
    }

    #[tokio::test]
    async fn test_unsolicited_commands_reach_the_right_session() {
        let (listener, addr) = bind().await;
        let hub = test_hub(addr);
        let owner_a = SessionOwner::new("owner-a");
        let owner_b = SessionOwner::new("owner-b");

        let task = tokio::spawn(serve_one(listener, "x"));
        let _session_a = hub.open_for(&owner_a).await.unwrap();
        let (_listener, mut stream, _) = task.await.unwrap();
        let mut session_b = hub.open_for(&owner_b).await.unwrap();

        write_command(
            &mut stream,
            &Command::direct(Some("owner-b".into()), json!({ "note": "for b" })),
        )
        .await;
        let delivered = with_deadline(Duration::from_secs(5), session_b.inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.payload.unwrap(), json!({ "note": "for b" }));

        hub.close().await;
    }

    #[tokio::test]
    async fn test_retry_needs_a_connection_waiting_to_reconnect() {
        let (listener, addr) = bind().await;
        // A backoff far longer than the test keeps the socket parked in
        // the waiting state once the connection drops.
        let hub = Realtime::builder("pool-app")
            .region("test")
            .servers([addr])
            .socket(
                SocketConfig::builder()
                    .retry(RetryPolicy::new(
                        Duration::from_secs(60),
                        Duration::from_secs(60),
                    ))
                    .build(),
            )
            .connection(
                ConnectionConfig::builder()
                    .heartbeat_interval(Duration::ZERO)
                    .build(),
            )
            .build();

        // Nothing pooled yet.
        assert!(matches!(
            hub.retry().await,
            Err(TetherError::InvalidState(_))
        ));

        let task = tokio::spawn(serve_one(listener, "x"));
        hub.open_for(&SessionOwner::new("owner-a")).await.unwrap();
        let (listener, stream, _) = task.await.unwrap();

        // A live connection refuses the nudge.
        assert!(matches!(
            hub.retry().await,
            Err(TetherError::InvalidState(_))
        ));

        // Once the connection is lost and waiting out its backoff, the
        // nudge goes through. The first reconnect attempt is immediate and
        // still in flight when its schedule is announced, so wait for the
        // second schedule, which parks the socket for the full backoff.
        drop(stream);
        drop(listener);
        let mut events = hub.subscribe();
        loop {
            let event = with_deadline(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, TetherEvent::Schedule { attempt: 1, .. }) {
                break;
            }
        }
        hub.retry().await.unwrap();

        hub.close().await;
    }

    #[tokio::test]
    async fn test_hub_events_mirror_pooled_connections() {
        let (listener, addr) = bind().await;
        let hub = test_hub(addr);
        let mut events = hub.subscribe();

        let task = tokio::spawn(serve_one(listener, "x"));
        let session = hub.open_for(&SessionOwner::new("owner-a")).await.unwrap();
        task.await.unwrap();

        assert_eq!(session.connection.state(), ConnectionState::Connected);
        let first = with_deadline(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, TetherEvent::Open);

        hub.close().await;
    }
}
