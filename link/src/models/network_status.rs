use serde::{Deserialize, Serialize};

/// Host connectivity signal fed to
/// [`FundLinkClient::set_network_status()`](crate::FundLinkClient::set_network_status).
///
/// Going offline tears the socket down as an unplanned close and holds
/// retries; coming back online fires the pending retry immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Online,
    Offline,
}
