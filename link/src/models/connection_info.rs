use serde::{Deserialize, Serialize};

use super::connection_state::ConnectionState;

/// Snapshot of the connection, as returned by
/// [`FundLinkClient::connection_info()`](crate::FundLinkClient::connection_info).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub is_connected: bool,
    pub state: ConnectionState,
    /// Most recent transport error or exhaustion message.
    pub last_error: Option<String>,
    /// Retries fired since the last successful open.
    pub reconnect_attempts: u32,
    /// Millis since Unix epoch.
    pub last_connected_at: Option<u64>,
    /// Millis since Unix epoch.
    pub last_disconnected_at: Option<u64>,
}
