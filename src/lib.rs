//! # TETHER Protocol
//!
//! **T**enacious **E**ndpoint **T**ransport with **H**eartbeats and **E**ager
//! **R**econnection
//!
//! TETHER is the client-side transport layer for a persistent, bidirectional
//! real-time messaging protocol. It keeps one logical session alive across
//! flaky networks and server failover. It provides:
//!
//! - **Resilience**: Multi-endpoint failover with capped exponential backoff
//! - **Liveness**: Heartbeat probing that turns silent links into reconnects
//! - **Correlation**: Request/response matching with per-request timeouts
//! - **Sessions**: Transparent session re-negotiation after every reconnect
//! - **Sharing**: One physical connection multiplexed across many owners
//!
//! ## Feature Flags
//!
//! - `transport` (default): Connection lifecycle, failover, backoff, framing
//! - `protocol` (default): Commands, correlation, handshake, heartbeat
//! - `realtime` (default): Session multiplexer and routing cache
//!
//! ## Modules
//!
//! - [`core`](crate::core): Constants and error types (always included)
//! - [`transport`]: Resilient socket layer (requires `transport` feature)
//! - [`protocol`]: Command protocol layer (requires `protocol` feature)
//! - [`realtime`]: Session multiplexer (requires `realtime` feature)
//!
//! ## Example Usage
//!
//! ```no_run
//! use tether_protocol::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> TetherResult<()> {
//!     let realtime = Realtime::builder("my-app")
//!         .region("us-east-1")
//!         .servers(["rtm-a.example.com:9443", "rtm-b.example.com:9443"])
//!         .build();
//!
//!     // Register an owner; the connection and session handshake are shared
//!     // with every other owner of the same (app, region, capability) key.
//!     let owner = SessionOwner::new("client-1");
//!     let mut session = realtime.open_for(&owner).await?;
//!
//!     while let Some(command) = session.inbox.recv().await {
//!         println!("inbound: {command:?}");
//!     }
//!
//!     realtime.deregister(&owner).await;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Protocol layer (feature-gated)
#[cfg(feature = "protocol")]
#[cfg_attr(docsrs, doc(cfg(feature = "protocol")))]
pub mod protocol;

// Realtime layer (feature-gated)
#[cfg(feature = "realtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "realtime")))]
pub mod realtime;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core error types
    pub use crate::core::{TetherError, TetherResult};

    // Transport types (when enabled)
    #[cfg(feature = "transport")]
    pub use crate::transport::{
        ConnectionState, EndpointSource, EventHub, RetryPolicy, SocketConfig,
        SocketConfigBuilder, TetherEvent, TetherSocket,
    };

    // Protocol types (when enabled)
    #[cfg(feature = "protocol")]
    pub use crate::protocol::{
        Command, CommandKind, ConnectionConfig, ConnectionConfigBuilder, OpKind, SessionConfig,
        Signature, TetherConnection,
    };

    // Realtime types (when enabled)
    #[cfg(feature = "realtime")]
    pub use crate::realtime::{
        ClientSession, Realtime, RealtimeBuilder, RealtimeConfig, RouterQuery, RouterResponse,
        SessionOwner, TtlCache,
    };
}

// Re-export commonly used items at crate root
pub use crate::core::{TetherError, TetherResult};

#[cfg(feature = "transport")]
pub use crate::transport::{ConnectionState, SocketConfig, TetherEvent, TetherSocket};

#[cfg(feature = "protocol")]
pub use crate::protocol::{Command, SessionConfig, TetherConnection};

#[cfg(feature = "realtime")]
pub use crate::realtime::{Realtime, SessionOwner};
