//! Server address resolution.
//!
//! A [`Router`] answers "which servers should this application connect
//! to". Statically configured servers are returned verbatim and never
//! expire. Resolver-backed lookups are cached under the response's TTL,
//! and concurrent lookups for the same key share one in-flight call.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, warn};

use crate::core::{ROUTE_TTL_FALLBACK, TetherError, TetherResult};

use super::cache::TtlCache;

/// What a resolver is asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterQuery {
    /// Application the lookup is on behalf of.
    pub app_id: String,

    /// Region the application is homed in.
    pub region: String,
}

/// A resolver's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterResponse {
    /// Endpoint candidates, best first.
    pub servers: Vec<String>,

    /// How long the answer may be cached; zero selects a fallback TTL.
    pub ttl: Duration,
}

/// Future returned by a [`ResolverFn`].
pub type ResolverFuture = Pin<Box<dyn Future<Output = TetherResult<RouterResponse>> + Send>>;

/// Async server lookup callback.
pub type ResolverFn = dyn Fn(RouterQuery) -> ResolverFuture + Send + Sync;

type SharedLookup = Shared<BoxFuture<'static, TetherResult<Vec<String>>>>;

struct RouterState {
    cache: TtlCache<Vec<String>>,
    inflight: HashMap<String, SharedLookup>,
}

/// Cached, deduplicating server address resolution.
pub struct Router {
    static_servers: Option<Vec<String>>,
    resolver: Option<Arc<ResolverFn>>,
    state: Arc<Mutex<RouterState>>,
}

impl Router {
    /// A router that always answers with the given servers.
    pub fn fixed(servers: Vec<String>) -> Self {
        Self::new(Some(servers), None)
    }

    /// A router backed by an async lookup.
    pub fn resolving<F, Fut>(resolver: F) -> Self
    where
        F: Fn(RouterQuery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TetherResult<RouterResponse>> + Send + 'static,
    {
        let resolver: Arc<ResolverFn> =
            Arc::new(move |query| Box::pin(resolver(query)) as ResolverFuture);
        Self::new(None, Some(resolver))
    }

    /// A router with no way to answer; every lookup fails.
    pub fn unconfigured() -> Self {
        Self::new(None, None)
    }

    fn new(static_servers: Option<Vec<String>>, resolver: Option<Arc<ResolverFn>>) -> Self {
        Self {
            static_servers,
            resolver,
            state: Arc::new(Mutex::new(RouterState {
                cache: TtlCache::new(),
                inflight: HashMap::new(),
            })),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve the servers for a query.
    ///
    /// Static servers win outright. Otherwise the cache is consulted, and
    /// on a miss one resolver call is started; every concurrent caller for
    /// the same key awaits that single call and shares its outcome.
    /// Failures are shared but never cached.
    pub async fn resolve(&self, query: RouterQuery) -> TetherResult<Vec<String>> {
        if let Some(servers) = &self.static_servers {
            return Ok(servers.clone());
        }
        let Some(resolver) = self.resolver.clone() else {
            return Err(TetherError::ResolutionFailed(
                "no servers or resolver configured".into(),
            ));
        };

        let key = format!("{}/{}", query.app_id, query.region);
        let lookup = {
            let mut state = self.lock_state();
            if let Some(servers) = state.cache.get(&key) {
                return Ok(servers.clone());
            }
            match state.inflight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let lookup = start_lookup(resolver, self.state.clone(), key.clone(), query);
                    state.inflight.insert(key, lookup.clone());
                    lookup
                }
            }
        };
        lookup.await
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("static_servers", &self.static_servers)
            .field("resolver", &self.resolver.as_ref().map(|_| ".."))
            .finish_non_exhaustive()
    }
}

fn start_lookup(
    resolver: Arc<ResolverFn>,
    state: Arc<Mutex<RouterState>>,
    key: String,
    query: RouterQuery,
) -> SharedLookup {
    async move {
        debug!(key = %key, "resolving servers");
        let result = resolver(query).await;

        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        state.inflight.remove(&key);
        match result {
            Ok(response) => {
                if response.servers.is_empty() {
                    warn!(key = %key, "resolver returned no servers");
                    return Err(TetherError::ResolutionFailed(
                        "resolver returned no servers".into(),
                    ));
                }
                let ttl = if response.ttl.is_zero() {
                    ROUTE_TTL_FALLBACK
                } else {
                    response.ttl
                };
                state
                    .cache
                    .insert(key, response.servers.clone(), Some(ttl));
                Ok(response.servers)
            }
            Err(err) => {
                warn!(key = %key, error = %err, "server resolution failed");
                Err(err)
            }
        }
    }
    .boxed()
    .shared()
}
