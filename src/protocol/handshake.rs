//! Session handshake configuration.
//!
//! A session is opened on every fresh connection, including each
//! reconnect. When the application supplies a signature factory, its
//! output is validated and embedded in the session-open command; the
//! server's reply assigns (or confirms) the session identity.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::core::{CLIENT_TAG, TetherError, TetherResult};

/// Authentication material produced by a [`SignatureFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// The signature itself.
    pub signature: String,

    /// Millisecond timestamp the signature was produced at.
    pub timestamp: i64,

    /// Nonce the signature covers.
    pub nonce: String,
}

/// Future returned by a [`SignatureFactory`].
pub type SignatureFuture = Pin<Box<dyn Future<Output = Result<Signature, String>> + Send>>;

/// Async callback producing handshake signatures.
///
/// Invoked with the current session identity, when one is already known.
/// Runs before every session open, so reconnects pick up fresh material.
pub type SignatureFactory = dyn Fn(Option<String>) -> SignatureFuture + Send + Sync;

/// Session handshake settings.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Identity to claim on open; `None` lets the server assign one.
    pub identity: Option<String>,

    /// Capability string advertised to the server; `None` advertises the
    /// client tag of this build.
    pub capabilities: Option<String>,

    /// Optional signature factory.
    pub signature_factory: Option<Arc<SignatureFactory>>,
}

impl SessionConfig {
    /// Settings with no identity, default capabilities, and no signature.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a specific identity on open.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Advertise a custom capability string.
    pub fn with_capabilities(mut self, capabilities: impl Into<String>) -> Self {
        self.capabilities = Some(capabilities.into());
        self
    }

    /// Attach a signature factory.
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

    /// The capability string that goes on the wire.
    pub fn capability_string(&self) -> String {
        self.capabilities.clone().unwrap_or_else(|| CLIENT_TAG.to_string())
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("identity", &self.identity)
            .field("capabilities", &self.capabilities)
            .field("signature_factory", &self.signature_factory.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Reject signatures that could never pass verification server-side.
pub(super) fn validate_signature(signature: &Signature) -> TetherResult<()> {
    if signature.signature.is_empty() {
        return Err(TetherError::HandshakeFailed(
            "signature callback returned an empty signature".into(),
        ));
    }
    if signature.nonce.is_empty() {
        return Err(TetherError::HandshakeFailed(
            "signature callback returned an empty nonce".into(),
        ));
    }
    if signature.timestamp <= 0 {
        return Err(TetherError::HandshakeFailed(format!(
            "signature timestamp {} is not a positive epoch millisecond",
            signature.timestamp
        )));
    }
    Ok(())
}
