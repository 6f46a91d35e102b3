//! WebSocket connection management.
//!
//! This module contains:
//! - [`websocket`]: Low-level WebSocket helpers (URL resolution, timeout-guarded
//!   open, envelope encoding and frame decoding)
//! - [`heartbeat`]: envelope-level ping/pong liveness monitor
//! - [`reconnect`]: exponential backoff with jitter and the retry budget
//! - [`shared`]: the connection task that owns the socket and everything
//!   layered on it

pub(crate) mod heartbeat;
pub mod reconnect;
pub(crate) mod shared;
pub(crate) mod websocket;

pub use reconnect::BackoffPolicy;
pub(crate) use shared::{spawn_connection_task, ConnCmd};

/// Maximum inbound message size (64 MiB).
pub(crate) const MAX_WS_MESSAGE_BYTES: usize = 64 << 20;

/// Upper bound on the close handshake of a caller-initiated disconnect.
pub(crate) const CLOSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);
