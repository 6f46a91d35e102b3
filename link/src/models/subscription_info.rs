//! Subscription metadata exposed to callers.
//!
//! [`SubscriptionInfo`] provides a read-only snapshot of a registered
//! subscription's state, useful for debugging, tests, and dashboards.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Read-only snapshot of a registered subscription.
///
/// Returned by [`FundLinkClient::subscriptions()`](crate::FundLinkClient::subscriptions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Identifier assigned locally when subscribing.
    pub id: String,
    /// Topic this subscription listens on.
    pub topic: String,
    /// Parameters sent with every `subscribe` for this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
    /// Timestamp (millis since Unix epoch) of the last delivered push,
    /// or `None` if nothing has been delivered yet.
    pub last_event_time_ms: Option<u64>,
    /// Timestamp (millis since Unix epoch) when the subscription was created.
    pub created_at_ms: u64,
    /// Number of pushes delivered to the handler.
    pub delivered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_info_serialize_roundtrip() {
        let info = SubscriptionInfo {
            id: "sub-1".to_string(),
            topic: "fund:nav".to_string(),
            params: Some(serde_json::json!({"fund_id": 7})),
            last_event_time_ms: Some(1700000000000),
            created_at_ms: 1700000000000,
            delivered: 3,
        };
        let json = serde_json::to_string(&info).unwrap();
        let deserialized: SubscriptionInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, info);
    }

    #[test]
    fn test_subscription_info_omits_missing_params() {
        let info = SubscriptionInfo {
            id: "sub-2".to_string(),
            topic: "risk:alerts".to_string(),
            params: None,
            last_event_time_ms: None,
            created_at_ms: 1700000000000,
            delivered: 0,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("params"));
        let deserialized: SubscriptionInfo = serde_json::from_str(&json).unwrap();
        assert!(deserialized.params.is_none());
        assert!(deserialized.last_event_time_ms.is_none());
    }
}
