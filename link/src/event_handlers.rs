//! Connection lifecycle event handlers.
//!
//! Callback hooks for monitoring the real-time connection:
//!
//! - [`on_open`](EventHandlers::on_open): socket opened (after auth and resubscription were sent)
//! - [`on_close`](EventHandlers::on_close): socket closed, planned or not
//! - [`on_error`](EventHandlers::on_error): transport errors, heartbeat timeouts, exhaustion
//! - [`on_message`](EventHandlers::on_message): every inbound envelope not consumed by a pending request
//!
//! Any number of listeners may be registered per event. Each one is invoked
//! in isolation: a panicking listener is logged and skipped, the remaining
//! listeners still run and the connection is unaffected.
//!
//! # Example
//!
//! ```rust
//! use fund_link::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_open(|| println!("Connected"))
//!     .on_close(|reason| println!("Disconnected: {}", reason))
//!     .on_error(|error| eprintln!("Connection error: {}", error));
//! assert!(handlers.has_any());
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::models::Envelope;

/// Reason for a close event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// WebSocket close code, if available (e.g. 1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
    /// `true` when the close came from `disconnect()` / `destroy()`.
    pub initiated_by_client: bool,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            initiated_by_client: false,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            initiated_by_client: false,
        }
    }

    pub(crate) fn client_initiated(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(1000),
            initiated_by_client: true,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to `on_error` listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionError {
    /// Human-readable error message.
    pub message: String,
    /// Whether the reconnection controller may still recover from this.
    pub recoverable: bool,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Handle returned when registering a listener; pass it to
/// [`FundLinkClient::remove_listener`](crate::FundLinkClient::remove_listener).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub type OnOpenCallback = Arc<dyn Fn() + Send + Sync>;
pub type OnCloseCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;
pub type OnMessageCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// One listener of any event kind, as shipped to the connection task.
#[derive(Clone)]
pub(crate) enum Listener {
    Open(OnOpenCallback),
    Close(OnCloseCallback),
    Error(OnErrorCallback),
    Message(OnMessageCallback),
}

/// Connection lifecycle listener lists.
///
/// Built up front with the builder methods and handed to the client builder;
/// more listeners can be added later through the client.
#[derive(Clone, Default)]
pub struct EventHandlers {
    on_open: Vec<(ListenerId, OnOpenCallback)>,
    on_close: Vec<(ListenerId, OnCloseCallback)>,
    on_error: Vec<(ListenerId, OnErrorCallback)>,
    on_message: Vec<(ListenerId, OnMessageCallback)>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_open", &self.on_open.len())
            .field("on_close", &self.on_close.len())
            .field("on_error", &self.on_error.len())
            .field("on_message", &self.on_message.len())
            .finish()
    }
}

impl EventHandlers {
    /// Create an empty set of handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when the connection opens.
    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.add(Listener::Open(Arc::new(f)));
        self
    }

    /// Register a callback invoked when the connection closes.
    pub fn on_close(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.add(Listener::Close(Arc::new(f)));
        self
    }

    /// Register a callback invoked on connection errors.
    ///
    /// [`ConnectionError::recoverable`] is `false` once the retry budget is
    /// spent; the client then stays in `error` until `connect()` is called.
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.add(Listener::Error(Arc::new(f)));
        self
    }

    /// Register a callback invoked for inbound envelopes.
    pub fn on_message(mut self, f: impl Fn(&Envelope) + Send + Sync + 'static) -> Self {
        self.add(Listener::Message(Arc::new(f)));
        self
    }

    /// Returns `true` if any handler is registered.
    pub fn has_any(&self) -> bool {
        !(self.on_open.is_empty()
            && self.on_close.is_empty()
            && self.on_error.is_empty()
            && self.on_message.is_empty())
    }

    pub(crate) fn add(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId::next();
        self.insert(id, listener);
        id
    }

    pub(crate) fn insert(&mut self, id: ListenerId, listener: Listener) {
        match listener {
            Listener::Open(cb) => self.on_open.push((id, cb)),
            Listener::Close(cb) => self.on_close.push((id, cb)),
            Listener::Error(cb) => self.on_error.push((id, cb)),
            Listener::Message(cb) => self.on_message.push((id, cb)),
        }
    }

    /// Remove a listener. Returns `false` if the id is unknown.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.len();
        self.on_open.retain(|(lid, _)| *lid != id);
        self.on_close.retain(|(lid, _)| *lid != id);
        self.on_error.retain(|(lid, _)| *lid != id);
        self.on_message.retain(|(lid, _)| *lid != id);
        self.len() != before
    }

    pub(crate) fn clear(&mut self) {
        self.on_open.clear();
        self.on_close.clear();
        self.on_error.clear();
        self.on_message.clear();
    }

    fn len(&self) -> usize {
        self.on_open.len() + self.on_close.len() + self.on_error.len() + self.on_message.len()
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_open(&self) {
        for (_, cb) in &self.on_open {
            guarded("on_open", || cb());
        }
    }

    pub(crate) fn emit_close(&self, reason: DisconnectReason) {
        for (_, cb) in &self.on_close {
            guarded("on_close", || cb(reason.clone()));
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        for (_, cb) in &self.on_error {
            guarded("on_error", || cb(error.clone()));
        }
    }

    pub(crate) fn emit_message(&self, envelope: &Envelope) {
        for (_, cb) in &self.on_message {
            guarded("on_message", || cb(envelope));
        }
    }
}

/// Run a user callback, logging instead of propagating a panic.
///
/// Returns `false` if the callback panicked.
pub(crate) fn guarded(what: &str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            log::warn!("[fund-link] {} handler panicked: {}", what, panic_message(&*payload));
            false
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
