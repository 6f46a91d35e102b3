//! Topic subscriptions.
//!
//! The registry lives inside the connection task; callers interact with it
//! through [`FundLinkClient::subscribe`](crate::FundLinkClient::subscribe) and
//! friends and identify entries by [`SubscriptionId`].

mod registry;

pub use registry::{SubscriptionHandler, SubscriptionId};
pub(crate) use registry::SubscriptionRegistry;
