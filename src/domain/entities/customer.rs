use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billable entity. Created on the first billing interaction;
/// `external_id` is the host application's user id and never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub external_id: String,
    pub email: String,
    /// Set once a payment method exists at the provider.
    pub provider_customer_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(external_id: impl Into<String>, email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: external_id.into(),
            email: email.into(),
            provider_customer_id: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the provider holds a reusable payment method for this
    /// customer (required for off-session charges).
    pub fn has_saved_payment_method(&self) -> bool {
        self.provider_customer_id.is_some()
    }
}
