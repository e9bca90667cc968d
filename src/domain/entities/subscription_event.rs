use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::subscription::SubscriptionStatus;

/// Audit row written on every lifecycle transition. Subscriptions are
/// never hard-deleted, and this is the rest of the paper trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub previous_status: Option<SubscriptionStatus>,
    pub new_status: Option<SubscriptionStatus>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionEvent {
    pub fn new(
        subscription_id: Uuid,
        event_type: impl Into<String>,
        previous_status: Option<SubscriptionStatus>,
        new_status: Option<SubscriptionStatus>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            event_type: event_type.into(),
            previous_status,
            new_status,
            metadata: serde_json::Value::Null,
            created_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
