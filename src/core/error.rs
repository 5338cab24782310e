//! Error types for the TETHER protocol stack.

use thiserror::Error;

/// Convenience alias for results carrying [`TetherError`].
pub type TetherResult<T> = Result<T, TetherError>;

/// Unified error type across the transport, protocol, and realtime layers.
///
/// The enum is `Clone` because a failure may be fanned out to every waiter of
/// a shared in-flight operation (pooled opens, route resolutions). I/O and
/// codec causes are carried as rendered strings for that reason.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TetherError {
    /// The operation requires a live connection and the socket is not connected.
    #[error("connection unavailable")]
    ConnectionUnavailable,

    /// The per-request timer elapsed before a matching reply arrived.
    #[error("request timed out")]
    Timeout,

    /// The connection was closed while the operation was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// Session-open handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The server answered with an application-level error payload.
    #[error("application error {code}: {reason}")]
    ApplicationError {
        /// Numeric code from the error payload.
        code: i32,
        /// Human-readable reason from the error payload.
        reason: String,
    },

    /// The operation is not valid in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Endpoint resolution failed or produced no candidates.
    #[error("endpoint resolution failed: {0}")]
    ResolutionFailed(String),

    /// Transport-level socket failure.
    #[error("socket error: {0}")]
    Socket(String),

    /// A wire payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<std::io::Error> for TetherError {
    fn from(err: std::io::Error) -> Self {
        TetherError::Socket(err.to_string())
    }
}

#[cfg(feature = "protocol")]
impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        TetherError::Codec(err.to_string())
    }
}
