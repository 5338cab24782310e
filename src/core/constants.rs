//! Protocol constants and tunable defaults.
//!
//! Unlike wire-format sizes, the timing values here are defaults consumed by
//! the configuration builders; deployments override them per environment.

use std::time::Duration;

// =============================================================================
// TIMING DEFAULTS - PROTOCOL
// =============================================================================

/// Interval between liveness probes on an established connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Probe reply deadline; a silent link is declared dead after this long.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for a correlated request to receive its reply.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// TIMING DEFAULTS - TRANSPORT
// =============================================================================

/// Deadline for a single candidate endpoint to accept the connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// First reconnect delay (attempt ordinal zero).
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Ceiling for the exponential reconnect schedule.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

// =============================================================================
// FRAME LIMITS
// =============================================================================

/// Length-prefix size preceding every wire payload.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest payload accepted from the wire.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

// =============================================================================
// ROUTING
// =============================================================================

/// Cache lifetime applied when a route response carries no usable TTL.
pub const ROUTE_TTL_FALLBACK: Duration = Duration::from_secs(3600);

// =============================================================================
// IDENTIFICATION
// =============================================================================

/// Capability/version tag announced during the session handshake.
pub const CLIENT_TAG: &str = concat!("tether-rs/", env!("CARGO_PKG_VERSION"));

/// Region used when a deployment does not pin one.
pub const DEFAULT_REGION: &str = "global";
