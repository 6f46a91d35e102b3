//! Bearer token supply for the WebSocket `auth` handshake.
//!
//! The client never stores credentials. A [`TokenProvider`] is asked for the
//! current token on every connect and reconnect, so a session store that
//! rotates its token is picked up on the very next open.
//!
//! ```rust
//! use fund_link::TokenProvider;
//! use std::sync::{Arc, RwLock};
//!
//! let session = Arc::new(RwLock::new(Some("abc123".to_string())));
//! let store = session.clone();
//! let provider = TokenProvider::dynamic(move || store.read().ok().and_then(|t| t.clone()));
//!
//! assert_eq!(provider.resolve().as_deref(), Some("abc123"));
//! *session.write().unwrap() = Some("rotated".to_string());
//! assert_eq!(provider.resolve().as_deref(), Some("rotated"));
//! ```

use std::fmt;
use std::sync::Arc;

/// Zero-argument token supplier.
pub type TokenFn = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Resolves the bearer token sent in the `auth` envelope.
#[derive(Clone, Default)]
pub enum TokenProvider {
    /// No authentication; no `auth` envelope is sent.
    #[default]
    None,
    /// Fixed token set at construction time.
    Static(String),
    /// Supplier called on every connect.
    Dynamic(TokenFn),
}

impl TokenProvider {
    pub fn none() -> Self {
        Self::None
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self::Static(token.into())
    }

    pub fn dynamic(f: impl Fn() -> Option<String> + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(f))
    }

    /// Obtain the token for this connect attempt.
    ///
    /// Empty tokens are treated as absent. A panicking supplier is logged and
    /// treated as "no token" so it cannot take the connection task down.
    pub fn resolve(&self) -> Option<String> {
        let token = match self {
            Self::None => None,
            Self::Static(token) => Some(token.clone()),
            Self::Dynamic(f) => {
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f())) {
                    Ok(token) => token,
                    Err(_) => {
                        log::warn!("[fund-link] Token provider panicked; connecting without auth");
                        None
                    },
                }
            },
        };
        token.filter(|t| !t.trim().is_empty())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "TokenProvider::None"),
            Self::Static(_) => write!(f, "TokenProvider::Static(<redacted>)"),
            Self::Dynamic(_) => write!(f, "TokenProvider::Dynamic(<fn>)"),
        }
    }
}

impl From<String> for TokenProvider {
    fn from(token: String) -> Self {
        Self::Static(token)
    }
}

impl From<TokenFn> for TokenProvider {
    fn from(f: TokenFn) -> Self {
        Self::Dynamic(f)
    }
}
