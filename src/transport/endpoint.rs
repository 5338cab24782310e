//! Candidate endpoint sources for connect cycles.
//!
//! A connect cycle consumes its [`EndpointSource`] exactly once to obtain an
//! ordered candidate list, then tries candidates strictly in that order. The
//! source is consulted again at the start of every later cycle, so a dynamic
//! source can steer reconnects toward fresh servers.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::core::{TetherError, TetherResult};

/// Future returned by a dynamic endpoint source.
pub type EndpointFuture = Pin<Box<dyn Future<Output = TetherResult<Vec<String>>> + Send>>;

/// Async closure producing an ordered candidate list.
pub type EndpointFn = dyn Fn() -> EndpointFuture + Send + Sync;

/// Where a connect cycle gets its candidate endpoints.
#[derive(Clone)]
pub enum EndpointSource {
    /// A fixed, ordered list of `host:port` candidates.
    Fixed(Vec<String>),
    /// An async resolver consulted at the start of every cycle.
    Dynamic(Arc<EndpointFn>),
}

impl EndpointSource {
    /// Build a fixed source from anything yielding endpoint strings.
    pub fn fixed<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EndpointSource::Fixed(endpoints.into_iter().map(Into::into).collect())
    }

    /// Build a dynamic source from an async closure.
    pub fn resolver<F, Fut>(resolve: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TetherResult<Vec<String>>> + Send + 'static,
    {
        EndpointSource::Dynamic(Arc::new(move || Box::pin(resolve()) as EndpointFuture))
    }

    /// Produce the candidate list for one connect cycle.
    ///
    /// An empty list fails the cycle with [`TetherError::ResolutionFailed`].
    pub async fn resolve(&self) -> TetherResult<Vec<String>> {
        let candidates = match self {
            EndpointSource::Fixed(list) => list.clone(),
            EndpointSource::Dynamic(resolve) => resolve().await?,
        };
        if candidates.is_empty() {
            return Err(TetherError::ResolutionFailed(
                "endpoint list is empty".into(),
            ));
        }
        Ok(candidates)
    }
}

impl fmt::Debug for EndpointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointSource::Fixed(list) => f.debug_tuple("Fixed").field(list).finish(),
            EndpointSource::Dynamic(_) => f.debug_tuple("Dynamic").field(&"..").finish(),
        }
    }
}

impl<S: Into<String>> From<Vec<S>> for EndpointSource {
    fn from(endpoints: Vec<S>) -> Self {
        EndpointSource::fixed(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_fixed_source_preserves_order() {
        let source = EndpointSource::fixed(["a:1", "b:2", "c:3"]);
        let list = source.resolve().await.unwrap();
        assert_eq!(list, vec!["a:1", "b:2", "c:3"]);
    }

    #[tokio::test]
    async fn test_empty_list_fails_resolution() {
        let source = EndpointSource::fixed(Vec::<String>::new());
        let err = source.resolve().await.unwrap_err();
        assert!(matches!(err, TetherError::ResolutionFailed(_)));
    }

    #[tokio::test]
    async fn test_dynamic_source_is_consulted_per_cycle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let source = EndpointSource::resolver(move || {
            let seen = seen.clone();
            async move {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                Ok(vec![format!("server-{n}:9443")])
            }
        });

        assert_eq!(source.resolve().await.unwrap(), vec!["server-0:9443"]);
        assert_eq!(source.resolve().await.unwrap(), vec!["server-1:9443"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dynamic_source_propagates_failure() {
        let source = EndpointSource::resolver(|| async {
            Err(TetherError::ResolutionFailed("router unreachable".into()))
        });
        assert!(source.resolve().await.is_err());
    }
}
