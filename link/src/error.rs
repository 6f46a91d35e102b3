//! Error types for fund-link.

use thiserror::Error;

/// Errors surfaced by the real-time client.
///
/// Transport failures never bubble out of the connection task as `Err`; they
/// are reported through `on_error` and the connection info. Values of this
/// type are returned to the caller of a specific operation (a request that
/// timed out, a `send` with no open socket, a failed `connect()`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FundLinkError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Max reconnection attempts ({0}) reached")]
    ReconnectExhausted(u32),

    #[error("Duplicate correlation id: {0}")]
    DuplicateRequest(String),

    #[error("Client destroyed")]
    ClientDestroyed,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl FundLinkError {
    /// Whether retrying the connection may clear this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FundLinkError::WebSocketError(_)
                | FundLinkError::TimeoutError(_)
                | FundLinkError::ConnectionClosed(_)
                | FundLinkError::NotConnected
        )
    }
}

impl From<serde_json::Error> for FundLinkError {
    fn from(err: serde_json::Error) -> Self {
        FundLinkError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for FundLinkError {
    fn from(err: toml::de::Error) -> Self {
        FundLinkError::ConfigurationError(format!("Invalid TOML: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FundLinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FundLinkError::WebSocketError(err.to_string())
    }
}

/// Result type for fund-link operations.
pub type Result<T> = std::result::Result<T, FundLinkError>;
