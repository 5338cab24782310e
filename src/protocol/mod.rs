//! Protocol layer.
//!
//! Correlated request/reply semantics over the resilient transport.
//! It provides:
//!
//! - **Wire commands**: [`Command`] and its kinds, JSON-framed
//! - **Request correlation**: serial-matched replies with per-request
//!   deadlines
//! - **Session handshake**: [`SessionConfig`] with optional async
//!   signature factories, re-run after every reconnect
//! - **Liveness probing**: heartbeat echoes with a hard deadline
//! - **Dispatch**: unsolicited commands routed to registered sessions by
//!   destination identity
//!
//! The entry point is [`TetherConnection`], a cloneable handle over one
//! driven connection.

mod command;
mod connection;
mod handshake;
mod pending;

pub use command::*;
pub use connection::*;
pub use handshake::*;
