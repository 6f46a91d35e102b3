//! Data models for the fund-link client.
//!
//! Defines the wire envelope and the snapshots the client exposes about its
//! connection and subscriptions.

pub mod connection_info;
pub mod connection_state;
pub mod envelope;
pub mod network_status;
pub mod subscription_info;
pub(crate) mod utils;

pub use connection_info::ConnectionInfo;
pub use connection_state::ConnectionState;
pub use envelope::{Envelope, EnvelopeKind};
pub use network_status::NetworkStatus;
pub use subscription_info::SubscriptionInfo;
