//! Connection task for the real-time client.
//!
//! A single tokio task owns the WebSocket and everything layered on it:
//!
//! - Connection state machine and the published [`ConnectionInfo`]
//! - Auth envelope on every open, with a freshly resolved token
//! - Topic subscription registry and the resubscribe burst after every open
//! - Pending request table for request/response correlation
//! - Heartbeat pings and the pong deadline
//! - Reconnection with exponential backoff after unplanned closes
//! - Lifecycle listeners (`on_open`, `on_close`, `on_error`, `on_message`)
//!
//! Public API calls arrive as [`ConnCmd`] messages, so inbound frames, timer
//! expiries and commands are handled strictly one at a time without locks.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;

use super::heartbeat::Heartbeat;
use super::reconnect::{BackoffPolicy, ReconnectController, Schedule};
use super::websocket::{
    close_normally, decode_frame, open_socket, send_envelope, Inbound, WebSocketStream,
};
use crate::auth::TokenProvider;
use crate::config::ClientConfig;
use crate::correlator::{PendingRequests, ReplySender};
use crate::error::{FundLinkError, Result};
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers, Listener, ListenerId};
use crate::models::utils::now_ms;
use crate::models::{
    ConnectionInfo, ConnectionState, Envelope, EnvelopeKind, NetworkStatus, SubscriptionInfo,
};
use crate::subscription::{SubscriptionHandler, SubscriptionId, SubscriptionRegistry};

const CLIENT_CLOSE_REASON: &str = "Client disconnected";

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the connection task.
pub(crate) enum ConnCmd {
    Connect {
        result_tx: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        done_tx: oneshot::Sender<()>,
    },
    Destroy {
        done_tx: oneshot::Sender<()>,
    },
    Send {
        envelope: Envelope,
        result_tx: oneshot::Sender<Result<()>>,
    },
    Request {
        envelope: Envelope,
        reply_tx: ReplySender,
    },
    CancelRequest {
        id: String,
    },
    Subscribe {
        id: SubscriptionId,
        topic: String,
        params: Option<serde_json::Value>,
        handler: SubscriptionHandler,
    },
    Unsubscribe {
        id: SubscriptionId,
        result_tx: oneshot::Sender<bool>,
    },
    UnsubscribeTopic {
        topic: String,
        result_tx: oneshot::Sender<usize>,
    },
    ListSubscriptions {
        result_tx: oneshot::Sender<Vec<SubscriptionInfo>>,
    },
    AddListener {
        id: ListenerId,
        listener: Listener,
    },
    RemoveListener {
        id: ListenerId,
    },
    Network {
        status: NetworkStatus,
    },
}

/// Start the connection task for `url`.
///
/// Returns the command sender and a receiver for connection info. The task
/// stops after `Destroy` or once every command sender is dropped.
pub(crate) fn spawn_connection_task(
    url: String,
    config: Arc<ClientConfig>,
    token_provider: TokenProvider,
    handlers: EventHandlers,
) -> (mpsc::UnboundedSender<ConnCmd>, watch::Receiver<ConnectionInfo>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (info_tx, info_rx) = watch::channel(ConnectionInfo::default());
    let task = ConnectionTask::new(url, config, token_provider, handlers, cmd_rx, info_tx);
    tokio::spawn(task.run());
    (cmd_tx, info_rx)
}

// ── Loop plumbing ───────────────────────────────────────────────────────────

type PendingOpen = BoxFuture<'static, Result<WebSocketStream>>;

enum LoopEvent {
    Command(ConnCmd),
    HandlesDropped,
    Frame(Option<std::result::Result<Message, WsError>>),
    Opened(Result<WebSocketStream>),
    PingDue,
    AckTimeout,
    RetryDue,
}

async fn next_frame(
    ws: &mut Option<WebSocketStream>,
) -> Option<std::result::Result<Message, WsError>> {
    match ws.as_mut() {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn poll_opening(opening: &mut Option<PendingOpen>) -> Result<WebSocketStream> {
    let result = match opening.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    };
    *opening = None;
    result
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Connection task ─────────────────────────────────────────────────────────

struct ConnectionTask {
    url: String,
    config: Arc<ClientConfig>,
    token_provider: TokenProvider,
    handlers: EventHandlers,
    cmd_rx: mpsc::UnboundedReceiver<ConnCmd>,
    info_tx: watch::Sender<ConnectionInfo>,
    info: ConnectionInfo,

    ws: Option<WebSocketStream>,
    opening: Option<PendingOpen>,
    /// Whether the in-flight open was fired by the reconnection controller.
    opening_is_retry: bool,
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,

    registry: SubscriptionRegistry,
    pending: PendingRequests,
    heartbeat: Heartbeat,
    reconnect: ReconnectController,
    network: NetworkStatus,
}

impl ConnectionTask {
    fn new(
        url: String,
        config: Arc<ClientConfig>,
        token_provider: TokenProvider,
        handlers: EventHandlers,
        cmd_rx: mpsc::UnboundedReceiver<ConnCmd>,
        info_tx: watch::Sender<ConnectionInfo>,
    ) -> Self {
        let heartbeat = Heartbeat::new(config.heartbeat_interval(), config.heartbeat_timeout());
        let reconnect = ReconnectController::new(BackoffPolicy::from_config(&config));
        Self {
            url,
            config,
            token_provider,
            handlers,
            cmd_rx,
            info_tx,
            info: ConnectionInfo::default(),
            ws: None,
            opening: None,
            opening_is_retry: false,
            connect_waiters: Vec::new(),
            registry: SubscriptionRegistry::new(),
            pending: PendingRequests::new(),
            heartbeat,
            reconnect,
            network: NetworkStatus::Online,
        }
    }

    async fn run(mut self) {
        loop {
            let ping_at = self.heartbeat.next_ping_at();
            let ack_deadline = self.heartbeat.ack_deadline();
            let retry_at = self.reconnect.retry_at();

            let event = tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => LoopEvent::Command(cmd),
                    None => LoopEvent::HandlesDropped,
                },
                frame = next_frame(&mut self.ws) => LoopEvent::Frame(frame),
                opened = poll_opening(&mut self.opening) => LoopEvent::Opened(opened),
                _ = sleep_until_opt(ack_deadline) => LoopEvent::AckTimeout,
                _ = sleep_until_opt(ping_at) => LoopEvent::PingDue,
                _ = sleep_until_opt(retry_at) => LoopEvent::RetryDue,
            };

            match event {
                LoopEvent::Command(cmd) => {
                    if self.handle_command(cmd).await.is_break() {
                        return;
                    }
                },
                LoopEvent::HandlesDropped => {
                    log::debug!("[fund-link] All client handles dropped; shutting down");
                    self.teardown().await;
                    return;
                },
                LoopEvent::Frame(frame) => self.handle_frame(frame).await,
                LoopEvent::Opened(Ok(ws)) => self.on_opened(ws).await,
                LoopEvent::Opened(Err(e)) => self.on_open_failed(e),
                LoopEvent::PingDue => self.send_heartbeat().await,
                LoopEvent::AckTimeout => {
                    let message = format!(
                        "Heartbeat timeout: no pong within {:?}",
                        self.heartbeat.ack_timeout()
                    );
                    log::warn!("[fund-link] {}", message);
                    self.transport_failure(message);
                },
                LoopEvent::RetryDue => {
                    let attempt = self.reconnect.fire();
                    log::info!(
                        "[fund-link] Reconnection attempt {}/{}",
                        attempt,
                        self.reconnect.max_attempts()
                    );
                    self.begin_open(true);
                },
            }
        }
    }

    async fn handle_command(&mut self, cmd: ConnCmd) -> ControlFlow<()> {
        match cmd {
            ConnCmd::Connect { result_tx } => self.connect(result_tx),
            ConnCmd::Disconnect { done_tx } => {
                self.disconnect().await;
                let _ = done_tx.send(());
            },
            ConnCmd::Destroy { done_tx } => {
                self.cmd_rx.close();
                self.teardown().await;
                let _ = done_tx.send(());
                return ControlFlow::Break(());
            },
            ConnCmd::Send { envelope, result_tx } => {
                let result = self.send_now(&envelope).await;
                let _ = result_tx.send(result);
            },
            ConnCmd::Request { envelope, reply_tx } => self.start_request(envelope, reply_tx).await,
            ConnCmd::CancelRequest { id } => {
                if self.pending.cancel(&id) {
                    log::debug!("[fund-link] Request {} abandoned by caller", id);
                }
            },
            ConnCmd::Subscribe {
                id,
                topic,
                params,
                handler,
            } => {
                log::debug!("[fund-link] Registering subscription {} on '{}'", id, topic);
                let envelope = self.registry.insert(id, topic, params, handler);
                if self.ws.is_some() {
                    self.send_or_warn(&envelope).await;
                }
            },
            ConnCmd::Unsubscribe { id, result_tx } => {
                let found = match self.registry.remove(&id) {
                    Some(removed) => {
                        if removed.topic_now_unused && self.ws.is_some() {
                            let envelope = Envelope::unsubscribe(removed.topic, removed.params);
                            self.send_or_warn(&envelope).await;
                        }
                        true
                    },
                    None => false,
                };
                let _ = result_tx.send(found);
            },
            ConnCmd::UnsubscribeTopic { topic, result_tx } => {
                let removal = self.registry.remove_topic(&topic);
                if self.ws.is_some() {
                    for params in removal.params {
                        self.send_or_warn(&Envelope::unsubscribe(topic.clone(), params))
                            .await;
                    }
                }
                let _ = result_tx.send(removal.removed);
            },
            ConnCmd::ListSubscriptions { result_tx } => {
                let _ = result_tx.send(self.registry.snapshot());
            },
            ConnCmd::AddListener { id, listener } => self.handlers.insert(id, listener),
            ConnCmd::RemoveListener { id } => {
                if !self.handlers.remove(id) {
                    log::debug!("[fund-link] remove_listener: unknown listener {:?}", id);
                }
            },
            ConnCmd::Network { status } => self.set_network(status),
        }
        ControlFlow::Continue(())
    }

    // ── State machine ───────────────────────────────────────────────────────

    fn set_state(&mut self, state: ConnectionState) {
        if self.info.state != state {
            log::debug!("[fund-link] State {} -> {}", self.info.state, state);
        }
        self.info.state = state;
        self.info.is_connected = state == ConnectionState::Connected;
        self.info.reconnect_attempts = self.reconnect.attempts();
        self.info_tx.send_replace(self.info.clone());
    }

    fn connect(&mut self, result_tx: oneshot::Sender<Result<()>>) {
        match self.info.state {
            ConnectionState::Connected => {
                let _ = result_tx.send(Ok(()));
            },
            ConnectionState::Connecting => self.connect_waiters.push(result_tx),
            ConnectionState::Disconnected
            | ConnectionState::Reconnecting
            | ConnectionState::Error => {
                self.reconnect.reset();
                self.connect_waiters.push(result_tx);
                self.begin_open(false);
            },
        }
    }

    fn begin_open(&mut self, is_retry: bool) {
        log::debug!("[fund-link] Opening connection to {}", self.url);
        self.opening_is_retry = is_retry;
        self.opening = Some(Box::pin(open_socket(self.url.clone(), self.config.connect_timeout())));
        self.set_state(ConnectionState::Connecting);
    }

    async fn on_opened(&mut self, ws: WebSocketStream) {
        self.ws = Some(ws);
        self.reconnect.reset();
        self.info.last_error = None;
        self.info.last_connected_at = Some(now_ms());
        self.heartbeat.start(Instant::now());
        log::info!("[fund-link] Connected to {}", self.url);

        if let Some(token) = self.token_provider.resolve() {
            self.send_or_warn(&Envelope::auth(&token)).await;
        }
        self.resubscribe_all().await;

        self.set_state(ConnectionState::Connected);
        self.handlers.emit_open();
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn on_open_failed(&mut self, error: FundLinkError) {
        self.info.last_error = Some(error.to_string());
        if self.opening_is_retry {
            log::warn!(
                "[fund-link] Reconnection attempt {} failed: {}",
                self.reconnect.attempts(),
                error
            );
            self.handlers.emit_error(ConnectionError::new(error.to_string(), true));
            self.fail_waiters(&error);
            self.schedule_reconnect();
        } else {
            log::warn!("[fund-link] Connection to {} failed: {}", self.url, error);
            self.set_state(ConnectionState::Error);
            self.handlers.emit_error(ConnectionError::new(error.to_string(), false));
            self.fail_waiters(&error);
        }
    }

    fn fail_waiters(&mut self, error: &FundLinkError) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    async fn resubscribe_all(&mut self) {
        let envelopes = self.registry.resubscribe_envelopes();
        if envelopes.is_empty() {
            return;
        }
        log::info!(
            "[fund-link] Re-subscribing {} active subscription(s)",
            envelopes.len()
        );
        for envelope in envelopes {
            if let Err(e) = self.send_now(&envelope).await {
                let topic = envelope.topic.as_deref().unwrap_or_default();
                log::warn!("[fund-link] Failed to re-subscribe '{}': {}", topic, e);
                self.handlers.emit_error(ConnectionError::new(
                    format!("Failed to re-subscribe '{}': {}", topic, e),
                    true,
                ));
            }
        }
    }

    /// Transport failure: surface through `on_error`, then treat as an
    /// unplanned close.
    fn transport_failure(&mut self, message: String) {
        self.info.last_error = Some(message.clone());
        self.handlers
            .emit_error(ConnectionError::new(message.clone(), self.config.auto_reconnect));
        self.connection_lost(DisconnectReason::new(message));
    }

    /// Any close the caller did not ask for.
    fn connection_lost(&mut self, reason: DisconnectReason) {
        self.ws = None;
        self.heartbeat.suspend();
        self.info.last_disconnected_at = Some(now_ms());
        log::warn!("[fund-link] Connection lost: {}", reason);

        let rejected = self
            .pending
            .reject_all(&FundLinkError::ConnectionClosed(reason.message.clone()));
        if rejected > 0 {
            log::debug!("[fund-link] Rejected {} pending request(s)", rejected);
        }
        self.handlers.emit_close(reason);

        if !self.config.auto_reconnect {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.network == NetworkStatus::Offline {
            log::info!("[fund-link] Network offline; holding reconnection until it returns");
            self.set_state(ConnectionState::Reconnecting);
            return;
        }

        match self.reconnect.schedule(Instant::now()) {
            Schedule::Scheduled(delay) => {
                log::info!(
                    "[fund-link] Attempting reconnection in {}ms (attempt {}/{})",
                    delay.as_millis(),
                    self.reconnect.attempts() + 1,
                    self.reconnect.max_attempts()
                );
                self.set_state(ConnectionState::Reconnecting);
            },
            Schedule::AlreadyPending => {},
            Schedule::Exhausted => {
                let error = FundLinkError::ReconnectExhausted(self.reconnect.max_attempts());
                log::warn!("[fund-link] {}", error);
                self.info.last_error = Some(error.to_string());
                self.set_state(ConnectionState::Error);
                self.handlers.emit_error(ConnectionError::new(error.to_string(), false));
            },
        }
    }

    async fn disconnect(&mut self) {
        if self.info.state == ConnectionState::Disconnected
            && self.ws.is_none()
            && self.opening.is_none()
        {
            log::debug!("[fund-link] Already disconnected");
            return;
        }

        self.reconnect.cancel();
        self.opening = None;
        self.heartbeat.suspend();

        let was_open = match self.ws.take() {
            Some(mut ws) => {
                close_normally(&mut ws, CLIENT_CLOSE_REASON).await;
                true
            },
            None => false,
        };

        let closed = FundLinkError::ConnectionClosed(CLIENT_CLOSE_REASON.to_string());
        self.pending.reject_all(&closed);
        self.fail_waiters(&closed);

        if was_open {
            self.info.last_disconnected_at = Some(now_ms());
        }
        self.set_state(ConnectionState::Disconnected);
        if was_open {
            self.handlers
                .emit_close(DisconnectReason::client_initiated(CLIENT_CLOSE_REASON));
        }
        log::info!("[fund-link] Disconnected from {}", self.url);
    }

    async fn teardown(&mut self) {
        self.disconnect().await;
        self.registry.clear();
        self.handlers.clear();
        log::debug!("[fund-link] Connection task stopped");
    }

    fn set_network(&mut self, status: NetworkStatus) {
        if self.network == status {
            return;
        }
        self.network = status;
        log::info!("[fund-link] Network status changed to {:?}", status);

        match status {
            NetworkStatus::Offline => {
                self.reconnect.cancel();
                if self.ws.is_some() {
                    self.info.last_error = Some("Network offline".to_string());
                    self.connection_lost(DisconnectReason::new("Network offline"));
                } else if self.opening.take().is_some() {
                    if self.opening_is_retry {
                        self.reconnect.refund();
                    }
                    self.fail_waiters(&FundLinkError::ConnectionClosed(
                        "Network offline".to_string(),
                    ));
                    if self.config.auto_reconnect {
                        self.schedule_reconnect();
                    } else {
                        self.set_state(ConnectionState::Disconnected);
                    }
                }
            },
            NetworkStatus::Online => {
                if self.info.state == ConnectionState::Reconnecting {
                    self.reconnect.cancel();
                    self.schedule_reconnect();
                    self.reconnect.expedite(Instant::now());
                }
            },
        }
    }

    // ── Inbound traffic ─────────────────────────────────────────────────────

    async fn handle_frame(&mut self, frame: Option<std::result::Result<Message, WsError>>) {
        match frame {
            Some(Ok(message)) => self.handle_message(message).await,
            Some(Err(e)) => self.transport_failure(format!("WebSocket error: {}", e)),
            None => self.connection_lost(DisconnectReason::new("WebSocket stream ended")),
        }
    }

    async fn handle_message(&mut self, message: Message) {
        match decode_frame(message) {
            Inbound::Envelope(envelope, raw) => {
                if self.config.debug {
                    log::debug!("[fund-link] <- {}", raw);
                }
                self.route_envelope(envelope).await;
            },
            Inbound::Ping(payload) => {
                if let Some(ws) = self.ws.as_mut() {
                    if let Err(e) = ws.send(Message::Pong(payload)).await {
                        log::debug!("[fund-link] Failed to answer protocol ping: {}", e);
                    }
                }
            },
            Inbound::Closed { code, reason } => {
                let reason = match code {
                    Some(code) => DisconnectReason::with_code(reason, code),
                    None => DisconnectReason::new(reason),
                };
                self.connection_lost(reason);
            },
            Inbound::Malformed(e) => log::warn!("[fund-link] Dropping malformed frame: {}", e),
            Inbound::Ignore => {},
        }
    }

    /// Heartbeat traffic first, then pending requests, then topic
    /// subscriptions, then generic listeners.
    async fn route_envelope(&mut self, envelope: Envelope) {
        match envelope.kind {
            EnvelopeKind::Pong => {
                if !self.heartbeat.pong_received(envelope.id.as_deref()) {
                    log::debug!("[fund-link] Ignoring unexpected pong {:?}", envelope.id);
                }
                return;
            },
            EnvelopeKind::Ping => {
                self.send_or_warn(&Envelope::pong(envelope.id)).await;
                return;
            },
            _ => {},
        }

        let envelope = match self.pending.resolve(envelope) {
            Some(envelope) => envelope,
            None => return,
        };

        if envelope.kind == EnvelopeKind::Error {
            log::warn!(
                "[fund-link] Peer reported error{}: {}",
                envelope
                    .topic
                    .as_deref()
                    .map(|t| format!(" on '{}'", t))
                    .unwrap_or_default(),
                envelope.error.as_deref().unwrap_or("<no message>")
            );
            return;
        }

        if let Some(topic) = envelope.topic.as_deref() {
            if self.registry.dispatch(&envelope) == 0 {
                log::debug!("[fund-link] No subscription for topic '{}'", topic);
            }
        }
        self.handlers.emit_message(&envelope);
    }

    // ── Outbound traffic ────────────────────────────────────────────────────

    async fn send_now(&mut self, envelope: &Envelope) -> Result<()> {
        let ws = self.ws.as_mut().ok_or(FundLinkError::NotConnected)?;
        let raw = send_envelope(ws, envelope).await?;
        if self.config.debug {
            log::debug!("[fund-link] -> {}", raw);
        }
        Ok(())
    }

    async fn send_or_warn(&mut self, envelope: &Envelope) {
        if let Err(e) = self.send_now(envelope).await {
            log::warn!("[fund-link] Failed to send {}: {}", envelope.kind, e);
        }
    }

    async fn start_request(&mut self, envelope: Envelope, reply_tx: ReplySender) {
        let id = match envelope.id.clone() {
            Some(id) => id,
            None => {
                let _ = reply_tx.send(Err(FundLinkError::InternalError(
                    "request envelope has no correlation id".to_string(),
                )));
                return;
            },
        };
        if self.ws.is_none() {
            let _ = reply_tx.send(Err(FundLinkError::NotConnected));
            return;
        }
        if let Err(reply_tx) = self.pending.register(id.clone(), reply_tx) {
            let _ = reply_tx.send(Err(FundLinkError::DuplicateRequest(id)));
            return;
        }
        if let Err(e) = self.send_now(&envelope).await {
            self.pending.reject(&id, e);
        }
    }

    async fn send_heartbeat(&mut self) {
        let id = self.heartbeat.next_ping_id();
        match self.send_now(&Envelope::ping(id.clone())).await {
            Ok(()) => self.heartbeat.ping_sent(id, Instant::now()),
            Err(e) => self.transport_failure(format!("Heartbeat ping failed: {}", e)),
        }
    }
}
