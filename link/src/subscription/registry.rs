//! Topic subscription registry.
//!
//! Maps topic names to local handlers. Entries belong to the client, not to a
//! connection: they survive reconnects and are only removed by
//! `unsubscribe` / `unsubscribe_topic` / `destroy`. After every open the
//! registry yields one `subscribe` envelope per active entry.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::event_handlers::guarded;
use crate::models::utils::now_ms;
use crate::models::{Envelope, SubscriptionInfo};

/// Handler invoked for every push on a subscribed topic.
pub type SubscriptionHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Locally generated subscription identifier. Never sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub(crate) fn generate() -> Self {
        Self(format!("sub_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Per-subscription state ──────────────────────────────────────────────────

struct SubEntry {
    topic: String,
    params: Option<JsonValue>,
    handler: SubscriptionHandler,
    created_at_ms: u64,
    last_event_time_ms: Option<u64>,
    delivered: u64,
    /// Registration order, so resubscribe bursts are deterministic.
    seq: u64,
}

/// A subscription removed from the registry.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Removed {
    pub topic: String,
    pub params: Option<JsonValue>,
    /// No other active subscription shares the topic.
    pub topic_now_unused: bool,
}

/// Result of dropping a whole topic.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TopicRemoval {
    pub removed: usize,
    /// Distinct subscribe params among the removed entries, in registration
    /// order. The peer gets one `unsubscribe` per value.
    pub params: Vec<Option<JsonValue>>,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    subs: HashMap<SubscriptionId, SubEntry>,
    next_seq: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription and return the `subscribe` envelope to send
    /// if the connection is open.
    pub fn insert(
        &mut self,
        id: SubscriptionId,
        topic: String,
        params: Option<JsonValue>,
        handler: SubscriptionHandler,
    ) -> Envelope {
        let envelope = Envelope::subscribe(topic.clone(), params.clone());
        let seq = self.next_seq;
        self.next_seq += 1;
        self.subs.insert(
            id,
            SubEntry {
                topic,
                params,
                handler,
                created_at_ms: now_ms(),
                last_event_time_ms: None,
                delivered: 0,
                seq,
            },
        );
        envelope
    }

    pub fn remove(&mut self, id: &SubscriptionId) -> Option<Removed> {
        let entry = self.subs.remove(id)?;
        let topic_now_unused = !self.has_topic(&entry.topic);
        Some(Removed {
            topic: entry.topic,
            params: entry.params,
            topic_now_unused,
        })
    }

    /// Remove every subscription on `topic`.
    pub fn remove_topic(&mut self, topic: &str) -> TopicRemoval {
        let mut removed: Vec<SubEntry> = Vec::new();
        let ids: Vec<SubscriptionId> = self
            .subs
            .iter()
            .filter(|(_, entry)| entry.topic == topic)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(entry) = self.subs.remove(&id) {
                removed.push(entry);
            }
        }
        removed.sort_by_key(|entry| entry.seq);

        let mut params: Vec<Option<JsonValue>> = Vec::new();
        for entry in &removed {
            if !params.contains(&entry.params) {
                params.push(entry.params.clone());
            }
        }
        TopicRemoval {
            removed: removed.len(),
            params,
        }
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.subs.values().any(|entry| entry.topic == topic)
    }

    /// One `subscribe` envelope per active subscription, in registration order.
    pub fn resubscribe_envelopes(&self) -> Vec<Envelope> {
        let mut entries: Vec<&SubEntry> = self.subs.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
            .into_iter()
            .map(|entry| Envelope::subscribe(entry.topic.clone(), entry.params.clone()))
            .collect()
    }

    /// Fan a topic push out to every subscription on that topic.
    ///
    /// Handlers run one after another; a panicking handler is logged and
    /// does not prevent delivery to its siblings. Returns the number of
    /// handlers invoked.
    pub fn dispatch(&mut self, envelope: &Envelope) -> usize {
        let topic = match envelope.topic.as_deref() {
            Some(topic) => topic,
            None => return 0,
        };

        let mut matched: Vec<(&SubscriptionId, &mut SubEntry)> = self
            .subs
            .iter_mut()
            .filter(|(_, entry)| entry.topic == topic)
            .collect();
        matched.sort_by_key(|(_, entry)| entry.seq);

        let now = now_ms();
        for (id, entry) in matched.iter_mut() {
            entry.last_event_time_ms = Some(now);
            entry.delivered += 1;
            let handler = entry.handler.clone();
            if !guarded("subscription", || handler(envelope)) {
                log::warn!("[fund-link] Handler for subscription {} on '{}' failed", id, topic);
            }
        }
        matched.len()
    }

    pub fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let mut entries: Vec<(&SubscriptionId, &SubEntry)> = self.subs.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        entries
            .into_iter()
            .map(|(id, entry)| SubscriptionInfo {
                id: id.to_string(),
                topic: entry.topic.clone(),
                params: entry.params.clone(),
                last_event_time_ms: entry.last_event_time_ms,
                created_at_ms: entry.created_at_ms,
                delivered: entry.delivered,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.subs.len()
    }


    pub fn clear(&mut self) {
        self.subs.clear();
    }
}
