//! Canonical identifier types and protocol constants shared across the workspace.

use std::time::Duration;

/// Opaque stream identifier used by the connection table.
///
/// The reactor allocates one handle per accepted socket or fifo and uses the same value as its
/// poll token, so lookups in either direction are a plain cast.
pub type Handle = u64;

/// Upper bound of a request packet, newline included.
pub const PACKET_SIZE: usize = 256;

/// Per-command timeout expressed in heartbeat ticks.
pub const COMMAND_TIMEOUT_TICKS: i32 = 20;

/// Length of one heartbeat tick.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);
