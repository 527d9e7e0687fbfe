//! # Notification Dispatcher
//!
//! Fans one notification out to every subscriber whose manifest listens to
//! its topic.
//!
//! Each delivery is captured in the ledger synchronously, in plan order,
//! and then sent on its own task. The dispatch settles once every task has
//! finished; a failed delivery is recorded in the report and never affects
//! its siblings. Nothing is retried.

use crate::outbound::{ClientError, OutboundClient, OutboundRequest};
use futures::future::join_all;
use minihull_core::envelope::{NOTIFICATION_HEADER, NOTIFICATION_HEADER_VALUE};
use minihull_core::{NotificationBody, Record, SigningContext, plan_deliveries, random_id};
use serde::Serialize;
use serde_json::Value;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub subscriber_id: String,
    pub url: String,
    /// HTTP status when the target answered.
    pub status: Option<u16>,
    /// Failure description when the delivery did not succeed.
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub topic: String,
    pub notification_id: String,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DispatchReport {
    /// Deliveries that did not succeed.
    pub fn failures(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Whether every delivery succeeded. True for an empty fan-out.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Sends notifications through the capturing client.
#[derive(Clone)]
pub struct Dispatcher {
    client: OutboundClient,
}

impl Dispatcher {
    pub fn new(client: OutboundClient) -> Self {
        Self { client }
    }

    /// Deliver `payload` on `topic` to every interested subscriber.
    ///
    /// `subscribers` is a snapshot taken by the caller after its mutation
    /// committed. The organization address and secret are echoed on every
    /// call.
    pub async fn dispatch(
        &self,
        topic: &str,
        payload: &Value,
        subscribers: &[Record],
        organization: &str,
        secret: &str,
    ) -> DispatchReport {
        let notification_id = random_id();
        let timestamp = chrono::Utc::now().to_rfc3339();
        let body = NotificationBody::new(notification_id.as_str(), timestamp, topic, payload);
        let body = match serde_json::to_value(&body) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(topic, "Failed to encode notification: {}", e);
                return DispatchReport {
                    topic: topic.to_string(),
                    notification_id,
                    outcomes: Vec::new(),
                };
            }
        };

        let plan = plan_deliveries(subscribers, topic);
        let mut tasks = Vec::with_capacity(plan.len());
        for target in &plan {
            let signing = SigningContext {
                organization: organization.to_string(),
                subscriber_id: target.subscriber_id.clone(),
                secret: secret.to_string(),
            };
            let request = OutboundRequest::post(target.url.as_str())
                .query(signing.query())
                .header(NOTIFICATION_HEADER, NOTIFICATION_HEADER_VALUE)
                .json(body.clone());

            let task = match self.client.prepare(request) {
                Ok(call) => tokio::spawn(call.send_status()),
                Err(e) => tokio::spawn(async move { Err(e) }),
            };
            tasks.push(task);
        }

        let outcomes: Vec<DeliveryOutcome> = plan
            .into_iter()
            .zip(join_all(tasks).await)
            .map(|(target, joined)| {
                let (status, error) = match joined {
                    Ok(Ok(status)) => (Some(status), None),
                    Ok(Err(ClientError::Status(status, body))) => (
                        Some(status),
                        Some(ClientError::Status(status, body).to_string()),
                    ),
                    Ok(Err(e)) => (None, Some(e.to_string())),
                    Err(e) => (None, Some(format!("Delivery task failed: {e}"))),
                };
                DeliveryOutcome {
                    subscriber_id: target.subscriber_id,
                    url: target.url,
                    status,
                    error,
                }
            })
            .collect();

        let report = DispatchReport {
            topic: topic.to_string(),
            notification_id,
            outcomes,
        };
        let failures = report.failures().count();
        for failure in report.failures() {
            tracing::warn!(
                topic,
                subscriber = %failure.subscriber_id,
                url = %failure.url,
                "Delivery failed: {}",
                failure.error.as_deref().unwrap_or_default()
            );
        }
        tracing::info!(
            topic,
            deliveries = report.outcomes.len(),
            failures,
            "Notification dispatched"
        );
        report
    }
}
