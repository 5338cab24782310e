//! Session pooling layer.
//!
//! Shares one protocol connection between every session owner with the
//! same (application, region, capability) key. It provides:
//!
//! - **Connection pool**: [`Realtime`], refcounted connection sharing
//!   with close-on-last-owner
//! - **Per-owner sessions**: [`ClientSession`], a handle pairing the
//!   shared connection with a private inbox
//! - **Server resolution**: [`Router`], async lookups with TTL caching
//!   and in-flight deduplication
//! - **Expiring storage**: [`TtlCache`], the lazy-expiry map behind the
//!   router
//!
//! # Architecture
//!
//! The pooling layer sits on top of the protocol layer. It decides how
//! many physical connections exist and who shares them.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Session Pooling               │  ← This module
//! │   one connection per (app, region, cap) │
//! ├─────────────────────────────────────────┤
//! │           Protocol Layer                │
//! ├─────────────────────────────────────────┤
//! │           Transport Layer               │
//! ├─────────────────────────────────────────┤
//! │               TCP                       │
//! └─────────────────────────────────────────┘
//! ```

mod cache;
mod hub;
mod router;

pub use cache::*;
pub use hub::*;
pub use router::*;
