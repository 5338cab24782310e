//! Resilient transport layer.
//!
//! Keeps a single logical connection alive across endpoint failures,
//! network loss, and application-driven pauses. It provides:
//!
//! - **Reconnecting socket**: [`TetherSocket`], an actor-owned TCP stream
//!   with an explicit lifecycle
//! - **Connection state machine**: [`ConnectionState`] with terminal close
//! - **Endpoint selection**: [`EndpointSource`] for fixed or async-resolved
//!   candidate lists, tried strictly in order
//! - **Retry schedule**: [`RetryPolicy`] capped-exponential backoff
//! - **Lifecycle events**: [`TetherEvent`] fan-out through an [`EventHub`]
//! - **Wire framing**: length-prefixed payload framing in [`frame`]
//!
//! # Architecture
//!
//! The transport layer sits below the protocol layer. It moves opaque
//! payloads and keeps the link alive while remaining agnostic to their
//! contents.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Session Pooling               │
//! ├─────────────────────────────────────────┤
//! │           Protocol Layer                │
//! ├─────────────────────────────────────────┤
//! │           Transport Layer               │  ← This module
//! │   reconnect, failover, backoff, frames  │
//! ├─────────────────────────────────────────┤
//! │               TCP                       │
//! └─────────────────────────────────────────┘
//! ```

mod backoff;
mod connection;
mod endpoint;
mod events;
pub mod frame;
mod socket;

pub use backoff::*;
pub use connection::*;
pub use endpoint::*;
pub use events::*;
pub use socket::*;
