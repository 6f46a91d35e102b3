//! Request/response correlation.
//!
//! Outstanding requests are keyed by correlation id. Each one is settled
//! exactly once: by a reply carrying the same id, by the caller's timeout
//! (which cancels the entry), or by the connection closing.

use std::collections::HashMap;
use tokio::sync::oneshot;

use crate::error::{FundLinkError, Result};
use crate::models::{Envelope, EnvelopeKind};

pub(crate) type ReplySender = oneshot::Sender<Result<Envelope>>;

/// Fresh correlation id for an outgoing request.
pub(crate) fn next_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Default)]
pub(crate) struct PendingRequests {
    pending: HashMap<String, ReplySender>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request. Fails if the id is already waiting for a reply.
    pub fn register(&mut self, id: String, reply_tx: ReplySender) -> std::result::Result<(), ReplySender> {
        if self.pending.contains_key(&id) {
            return Err(reply_tx);
        }
        self.pending.insert(id, reply_tx);
        Ok(())
    }

    /// Settle the request answered by `envelope`, if there is one.
    ///
    /// Returns the envelope back when it does not answer a pending request
    /// so the caller can route it elsewhere.
    pub fn resolve(&mut self, envelope: Envelope) -> Option<Envelope> {
        let reply_tx = match envelope.id.as_deref().and_then(|id| self.pending.remove(id)) {
            Some(tx) => tx,
            None => return Some(envelope),
        };

        let outcome = if envelope.kind == EnvelopeKind::Error {
            let message = envelope
                .error
                .clone()
                .or_else(|| envelope.payload.as_str().map(str::to_string))
                .unwrap_or_else(|| "request failed".to_string());
            Err(FundLinkError::ServerError(message))
        } else {
            Ok(envelope)
        };

        if reply_tx.send(outcome).is_err() {
            log::debug!("[fund-link] Reply arrived after the caller stopped waiting");
        }
        None
    }

    /// Forget a request whose caller gave up (timeout or dropped future).
    pub fn cancel(&mut self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Fail one request without removing any other.
    pub fn reject(&mut self, id: &str, error: FundLinkError) -> bool {
        match self.pending.remove(id) {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            },
            None => false,
        }
    }

    /// Fail every outstanding request, e.g. because the connection closed.
    pub fn reject_all(&mut self, error: &FundLinkError) -> usize {
        let count = self.pending.len();
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
