//! # fund-link
//!
//! Real-time update client for the fund-management platform.
//!
//! One persistent WebSocket carries every logical topic. The client keeps it
//! alive with envelope-level heartbeats, reconnects with exponential backoff
//! and jitter after unplanned closes, re-authenticates and resubscribes every
//! active topic after each open, and correlates request/response traffic by
//! id alongside plain fire-and-forget sends.
//!
//! ```rust,no_run
//! use fund_link::{ClientConfig, Envelope, EventHandlers, FundLinkClient, TokenProvider};
//!
//! # async fn example() -> fund_link::Result<()> {
//! let client = FundLinkClient::builder()
//!     .url("wss://realtime.example.com/ws")
//!     .config(ClientConfig::load("fund-link.toml".as_ref())?)
//!     .token_provider(TokenProvider::token("abc123"))
//!     .event_handlers(
//!         EventHandlers::new()
//!             .on_open(|| log::info!("realtime connected"))
//!             .on_close(|reason| log::info!("realtime closed: {}", reason)),
//!     )
//!     .build()?;
//!
//! client.subscribe("risk:alerts", |env: &Envelope| log::warn!("alert: {}", env.payload), None)?;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub(crate) mod correlator;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod subscription;

pub use auth::{TokenFn, TokenProvider};
pub use client::{FundLinkClient, FundLinkClientBuilder};
pub use config::ClientConfig;
pub use connection::BackoffPolicy;
pub use error::{FundLinkError, Result};
pub use event_handlers::{
    ConnectionError, DisconnectReason, EventHandlers, ListenerId, OnCloseCallback,
    OnErrorCallback, OnMessageCallback, OnOpenCallback,
};
pub use models::{
    ConnectionInfo, ConnectionState, Envelope, EnvelopeKind, NetworkStatus, SubscriptionInfo,
};
pub use subscription::{SubscriptionHandler, SubscriptionId};
