//! # Notification Envelopes
//!
//! Everything needed to describe a notification before it goes on the wire:
//! the report bundle sent for entity changes, the signing context echoed to
//! connectors, the delivery plan derived from subscriber manifests, and the
//! notification body itself.
//!
//! This module only builds values. Sending them is the application's job.

use crate::diff::Changes;
use crate::types::{MANIFEST_FIELD, Record, URL_FIELD, record_id};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// TOPICS
// =============================================================================

/// Subscriber (connector) installed or settings changed.
pub const TOPIC_SUBSCRIBER_UPDATE: &str = "ship:update";

/// Entity attributes or group membership changed.
pub const TOPIC_ENTITY_UPDATE: &str = "user_report:update";

/// Group definition renamed.
pub const TOPIC_GROUP_UPDATE: &str = "segment:update";

/// Header marking an outbound call as a platform notification.
pub const NOTIFICATION_HEADER: &str = "x-amz-sns-message-type";

/// Value sent with [`NOTIFICATION_HEADER`].
pub const NOTIFICATION_HEADER_VALUE: &str = "dummy";

// =============================================================================
// REPORT
// =============================================================================

/// One entity bundle inside an entity notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Entity state after the change.
    #[serde(rename = "user")]
    pub entity: Record,
    /// Groups the entity belongs to after the change.
    #[serde(rename = "segments")]
    pub groups: Vec<Record>,
    /// Field-level changes, `field -> [old, new]`.
    pub changes: Changes,
    /// Events attached to the change. Always empty for simulated updates.
    pub events: Vec<Value>,
}

impl Report {
    /// Bundle with no changes and no events.
    #[must_use]
    pub fn new(entity: Record, groups: Vec<Record>) -> Self {
        Self {
            entity,
            groups,
            changes: Changes::new(),
            events: Vec::new(),
        }
    }

    /// Attach a change set.
    #[must_use]
    pub fn with_changes(mut self, changes: Changes) -> Self {
        self.changes = changes;
        self
    }
}

// =============================================================================
// SIGNING CONTEXT
// =============================================================================

/// Credentials echoed to a connector on every platform-originated call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningContext {
    /// Public address of the organization (`host:port`).
    pub organization: String,
    /// Id of the subscriber being called.
    #[serde(rename = "ship")]
    pub subscriber_id: String,
    /// Shared secret.
    pub secret: String,
}

impl SigningContext {
    /// Query parameters in wire order.
    #[must_use]
    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("organization", self.organization.clone()),
            ("ship", self.subscriber_id.clone()),
            ("secret", self.secret.clone()),
        ]
    }
}

// =============================================================================
// MANIFEST SUBSCRIPTIONS
// =============================================================================

/// One entry of `manifest.subscriptions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Path relative to the subscriber's url.
    pub url: String,
    /// Topics this entry listens to. `None` means every topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
}

impl Subscription {
    /// Whether this entry receives `topic`.
    #[must_use]
    pub fn accepts(&self, topic: &str) -> bool {
        self.channels
            .as_ref()
            .is_none_or(|channels| channels.iter().any(|c| c == topic))
    }
}

/// Subscription entries declared by a subscriber's manifest.
///
/// Entries that do not parse are skipped.
#[must_use]
pub fn subscriptions(subscriber: &Record) -> Vec<Subscription> {
    subscriber
        .get(MANIFEST_FIELD)
        .and_then(|m| m.get("subscriptions"))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| serde_json::from_value(e.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Base url of a subscriber, without a trailing slash.
#[must_use]
pub fn subscriber_url(subscriber: &Record) -> Option<&str> {
    subscriber
        .get(URL_FIELD)
        .and_then(Value::as_str)
        .map(|u| u.trim_end_matches('/'))
}

// =============================================================================
// DELIVERY PLANNING
// =============================================================================

/// One outbound notification call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    /// Subscriber receiving the call.
    pub subscriber_id: String,
    /// Absolute target url (subscriber url + subscription path).
    pub url: String,
}

/// Every (subscriber × matching subscription) pair for a topic, in store
/// order then manifest order.
///
/// Subscribers without an id or url are skipped.
#[must_use]
pub fn plan_deliveries(subscribers: &[Record], topic: &str) -> Vec<DeliveryTarget> {
    let mut targets = Vec::new();
    for subscriber in subscribers {
        let (Some(id), Some(base)) = (record_id(subscriber), subscriber_url(subscriber)) else {
            continue;
        };
        for subscription in subscriptions(subscriber) {
            if subscription.accepts(topic) {
                targets.push(DeliveryTarget {
                    subscriber_id: id.to_string(),
                    url: join_url(base, &subscription.url),
                });
            }
        }
    }
    targets
}

/// Join a base url and a relative path with exactly one slash.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

// =============================================================================
// NOTIFICATION BODY
// =============================================================================

/// Body of a notification call.
///
/// The payload travels JSON-encoded inside `Message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationBody {
    #[serde(rename = "Type")]
    pub kind: String,
    pub message_id: String,
    pub timestamp: String,
    pub subject: String,
    pub message: String,
}

impl NotificationBody {
    /// Build a body for `topic` carrying `payload`.
    pub fn new(
        notification_id: impl Into<String>,
        timestamp: impl Into<String>,
        topic: impl Into<String>,
        payload: &Value,
    ) -> Self {
        Self {
            kind: "Notification".to_string(),
            message_id: notification_id.into(),
            timestamp: timestamp.into(),
            subject: topic.into(),
            message: payload.to_string(),
        }
    }

    /// Decode the payload back out of `Message`.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.message)
    }
}
