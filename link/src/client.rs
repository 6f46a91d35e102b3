//! Main fund-link client with builder pattern.
//!
//! Provides the primary interface for connecting to a real-time endpoint,
//! subscribing to topics and exchanging envelopes.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    auth::TokenProvider,
    config::ClientConfig,
    connection::{spawn_connection_task, websocket::resolve_ws_url, ConnCmd},
    correlator::next_correlation_id,
    error::{FundLinkError, Result},
    event_handlers::{ConnectionError, DisconnectReason, EventHandlers, Listener, ListenerId},
    models::{ConnectionInfo, Envelope, NetworkStatus, SubscriptionInfo},
    subscription::SubscriptionId,
};

/// Real-time update client.
///
/// A cheap, cloneable handle onto one background connection task. The task
/// stops when [`destroy`](Self::destroy) is called or when the last handle is
/// dropped. Must be created inside a Tokio runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use fund_link::{ClientConfig, Envelope, FundLinkClient, TokenProvider};
///
/// # async fn example() -> fund_link::Result<()> {
/// let client = FundLinkClient::builder()
///     .url("wss://realtime.example.com/ws")
///     .config(ClientConfig::default().with_max_reconnect_attempts(10))
///     .token_provider(TokenProvider::token("abc123"))
///     .build()?;
///
/// client.subscribe("fund:nav", |env: &Envelope| println!("NAV: {}", env.payload), None)?;
/// client.connect().await?;
///
/// let reply = client
///     .send_with_response(Envelope::new("get_balance"), None)
///     .await?;
/// println!("Balance: {}", reply.payload);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FundLinkClient {
    url: Arc<str>,
    config: Arc<ClientConfig>,
    cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    info_rx: watch::Receiver<ConnectionInfo>,
}

impl std::fmt::Debug for FundLinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundLinkClient")
            .field("url", &self.url)
            .field("state", &self.info_rx.borrow().state)
            .finish()
    }
}

impl FundLinkClient {
    /// Create a new builder for configuring the client
    pub fn builder() -> FundLinkClientBuilder {
        FundLinkClientBuilder::new()
    }

    /// Create a client without authentication or up-front listeners.
    pub fn new(url: impl Into<String>, config: ClientConfig) -> Result<Self> {
        Self::builder().url(url).config(config).build()
    }

    /// The resolved `ws://` / `wss://` endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn command(&self, cmd: ConnCmd) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| FundLinkError::ClientDestroyed)
    }

    async fn call<T>(&self, cmd: ConnCmd, rx: oneshot::Receiver<T>) -> Result<T> {
        self.command(cmd)?;
        rx.await.map_err(|_| FundLinkError::ClientDestroyed)
    }

    /// Open the connection.
    ///
    /// Resolves once the socket is open and the auth and resubscribe
    /// envelopes have been sent. Returns immediately when already connected
    /// and joins the in-flight attempt while connecting.
    pub async fn connect(&self) -> Result<()> {
        let (result_tx, result_rx) = oneshot::channel();
        self.call(ConnCmd::Connect { result_tx }, result_rx).await?
    }

    /// Close the connection with code 1000 and stop reconnecting.
    ///
    /// Pending requests are rejected with
    /// [`FundLinkError::ConnectionClosed`]. Subscriptions and listeners are
    /// kept and become active again on the next [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.call(ConnCmd::Disconnect { done_tx }, done_rx).await.is_err() {
            log::debug!("[fund-link] disconnect() on a destroyed client");
        }
    }

    /// Disconnect, drop every subscription and listener, and stop the
    /// connection task. Every later call fails with
    /// [`FundLinkError::ClientDestroyed`].
    pub async fn destroy(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.call(ConnCmd::Destroy { done_tx }, done_rx).await.is_err() {
            log::debug!("[fund-link] destroy() on a destroyed client");
        }
    }

    /// Fire-and-forget send. Fails with [`FundLinkError::NotConnected`] when
    /// no socket is open; nothing is queued.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        let (result_tx, result_rx) = oneshot::channel();
        self.call(ConnCmd::Send { envelope, result_tx }, result_rx).await?
    }

    /// Send a request and wait for the reply carrying the same correlation id.
    ///
    /// The envelope gets a fresh correlation id. `timeout` defaults to the
    /// configured `request_timeout_ms`. The returned future settles exactly
    /// once: with the reply, [`FundLinkError::ServerError`] for an `error`
    /// reply, [`FundLinkError::TimeoutError`], or
    /// [`FundLinkError::ConnectionClosed`] if the socket closes first.
    pub async fn send_with_response(
        &self,
        mut envelope: Envelope,
        timeout: Option<Duration>,
    ) -> Result<Envelope> {
        let id = next_correlation_id();
        envelope.id = Some(id.clone());
        let limit = timeout.unwrap_or_else(|| self.config.request_timeout());

        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(ConnCmd::Request { envelope, reply_tx })?;

        match tokio::time::timeout(limit, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(FundLinkError::ClientDestroyed),
            Err(_) => {
                let message = format!("No reply to request {} within {:?}", id, limit);
                let _ = self.cmd_tx.send(ConnCmd::CancelRequest { id });
                Err(FundLinkError::TimeoutError(message))
            },
        }
    }

    /// Register interest in `topic`.
    ///
    /// The subscription is recorded immediately and the `subscribe` envelope
    /// goes out now if connected, otherwise on the next open. It is reissued
    /// after every reconnect until removed.
    pub fn subscribe<F>(
        &self,
        topic: impl Into<String>,
        handler: F,
        params: Option<JsonValue>,
    ) -> Result<SubscriptionId>
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(FundLinkError::ConfigurationError(
                "topic must not be empty".to_string(),
            ));
        }
        let id = SubscriptionId::generate();
        self.command(ConnCmd::Subscribe {
            id: id.clone(),
            topic,
            params,
            handler: Arc::new(handler),
        })?;
        Ok(id)
    }

    /// Remove one subscription. Returns `false` if the id is unknown.
    ///
    /// The peer only receives `unsubscribe` once no other local
    /// subscription shares the topic.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<bool> {
        let (result_tx, result_rx) = oneshot::channel();
        self.call(
            ConnCmd::Unsubscribe {
                id: id.clone(),
                result_tx,
            },
            result_rx,
        )
        .await
    }

    /// Remove every subscription on `topic`. Returns how many were removed.
    pub async fn unsubscribe_topic(&self, topic: impl Into<String>) -> Result<usize> {
        let (result_tx, result_rx) = oneshot::channel();
        self.call(
            ConnCmd::UnsubscribeTopic {
                topic: topic.into(),
                result_tx,
            },
            result_rx,
        )
        .await
    }

    /// Snapshot of the active subscriptions, in registration order.
    pub async fn subscriptions(&self) -> Result<Vec<SubscriptionInfo>> {
        let (result_tx, result_rx) = oneshot::channel();
        self.call(ConnCmd::ListSubscriptions { result_tx }, result_rx).await
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = ListenerId::next();
        if self.command(ConnCmd::AddListener { id, listener }).is_err() {
            log::debug!("[fund-link] Listener registered on a destroyed client is never called");
        }
        id
    }

    pub fn on_open(&self, f: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.add_listener(Listener::Open(Arc::new(f)))
    }

    pub fn on_close(&self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> ListenerId {
        self.add_listener(Listener::Close(Arc::new(f)))
    }

    pub fn on_error(&self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> ListenerId {
        self.add_listener(Listener::Error(Arc::new(f)))
    }

    /// Every inbound envelope not consumed by a pending request or the
    /// heartbeat, after topic subscriptions have seen it.
    pub fn on_message(&self, f: impl Fn(&Envelope) + Send + Sync + 'static) -> ListenerId {
        self.add_listener(Listener::Message(Arc::new(f)))
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let _ = self.command(ConnCmd::RemoveListener { id });
    }

    /// Current connection snapshot.
    pub fn connection_info(&self) -> ConnectionInfo {
        self.info_rx.borrow().clone()
    }

    /// Receiver notified on every published connection change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionInfo> {
        self.info_rx.clone()
    }

    /// Report host connectivity. `Offline` drops the socket and holds
    /// retries; `Online` fires a held retry immediately.
    pub fn set_network_status(&self, status: NetworkStatus) -> Result<()> {
        self.command(ConnCmd::Network { status })
    }
}

/// Builder for configuring [`FundLinkClient`] instances.
pub struct FundLinkClientBuilder {
    url: Option<String>,
    config: ClientConfig,
    token_provider: TokenProvider,
    event_handlers: EventHandlers,
}

impl FundLinkClientBuilder {
    fn new() -> Self {
        Self {
            url: None,
            config: ClientConfig::default(),
            token_provider: TokenProvider::none(),
            event_handlers: EventHandlers::new(),
        }
    }

    /// Set the endpoint (`ws(s)://` or `http(s)://`).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bearer token source used for the `auth` envelope.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use fund_link::{FundLinkClient, TokenProvider};
    ///
    /// # async fn example() -> fund_link::Result<()> {
    /// let client = FundLinkClient::builder()
    ///     .url("ws://localhost:8080/ws")
    ///     .token_provider(TokenProvider::dynamic(|| std::env::var("FUND_TOKEN").ok()))
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn token_provider(mut self, provider: TokenProvider) -> Self {
        self.token_provider = provider;
        self
    }

    /// Listeners registered before the first connect.
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Build the client and start its connection task. Does not connect.
    pub fn build(self) -> Result<FundLinkClient> {
        let url = self
            .url
            .ok_or_else(|| FundLinkError::ConfigurationError("url is required".into()))?;
        let url = resolve_ws_url(&url)?;
        self.config.validate()?;

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(FundLinkError::ConfigurationError(
                "FundLinkClient must be built inside a Tokio runtime".to_string(),
            ));
        }

        log::debug!("[fund-link] Creating client for {}", url);
        let config = Arc::new(self.config);
        let (cmd_tx, info_rx) = spawn_connection_task(
            url.clone(),
            config.clone(),
            self.token_provider,
            self.event_handlers,
        );

        Ok(FundLinkClient {
            url: Arc::from(url),
            config,
            cmd_tx,
            info_rx,
        })
    }
}
