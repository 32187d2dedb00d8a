// Workflow Triggers - Events that start workflow executions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known event names emitted by the platform
pub mod events {
    pub const LEAD_CREATED: &str = "lead_created";
    pub const JOB_COMPLETED: &str = "job_completed";
    pub const INVOICE_OVERDUE: &str = "invoice_overdue";
    pub const WEBHOOK_RECEIVED: &str = "webhook_received";
}

/// Payload for trigger events
pub type EventPayload = serde_json::Value;

/// An event that can start every active workflow listening for its name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: EventPayload,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

/// Source of the trigger event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EventSource {
    System,
    User(Uuid),
    Api,
    Webhook,
    Scheduler,
    Rule(Uuid),
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::User(id) => write!(f, "user:{}", id),
            Self::Api => f.write_str("api"),
            Self::Webhook => f.write_str("webhook"),
            Self::Scheduler => f.write_str("scheduler"),
            Self::Rule(id) => write!(f, "rule:{}", id),
        }
    }
}

impl TriggerEvent {
    pub fn new(event_type: &str, payload: EventPayload, source: EventSource) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            payload,
            source,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn lead_created(lead_id: Uuid, name: &str, score: i64, lead_source: &str) -> Self {
        Self::new(
            events::LEAD_CREATED,
            serde_json::json!({
                "lead_id": lead_id,
                "name": name,
                "score": score,
                "source": lead_source
            }),
            EventSource::System,
        )
    }

    pub fn job_completed(job_id: Uuid, customer_id: Uuid, technician: Option<&str>) -> Self {
        Self::new(
            events::JOB_COMPLETED,
            serde_json::json!({
                "job_id": job_id,
                "customer_id": customer_id,
                "technician": technician
            }),
            EventSource::System,
        )
    }

    pub fn invoice_overdue(invoice_id: Uuid, customer_id: Uuid, amount: f64, days_overdue: i32) -> Self {
        Self::new(
            events::INVOICE_OVERDUE,
            serde_json::json!({
                "invoice_id": invoice_id,
                "customer_id": customer_id,
                "amount": amount,
                "days_overdue": days_overdue
            }),
            EventSource::Scheduler,
        )
    }

    pub fn webhook_received(webhook_id: &str, payload: serde_json::Value) -> Self {
        Self::new(
            events::WEBHOOK_RECEIVED,
            serde_json::json!({
                "webhook_id": webhook_id,
                "payload": payload
            }),
            EventSource::Webhook,
        )
    }

    /// Add correlation ID for tracking related events
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_created_event() {
        let event = TriggerEvent::lead_created(Uuid::new_v4(), "Ada", 80, "web");
        assert_eq!(event.event_type, events::LEAD_CREATED);
        assert_eq!(event.payload["score"], 80);
        assert_eq!(event.source.to_string(), "system");
    }

    #[test]
    fn test_source_labels() {
        let id = Uuid::nil();
        assert_eq!(EventSource::User(id).to_string(), format!("user:{}", id));
        assert_eq!(EventSource::Rule(id).to_string(), format!("rule:{}", id));
    }
}
