use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::app_error::{AppError, AppResult};
use crate::domain::entities::plan::BillingInterval;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SubscriptionStatus {
    PendingPayment,
    Trialing,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    /// Statuses that occupy the customer's single "active subscription"
    /// slot. Activating a new subscription cancels rows in any of these.
    pub fn counts_as_active(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active
                | SubscriptionStatus::Trialing
                | SubscriptionStatus::PastDue
                | SubscriptionStatus::PendingPayment
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled)
    }

    /// Legal targets from this status.
    pub fn valid_transitions(&self) -> &'static [SubscriptionStatus] {
        match self {
            SubscriptionStatus::PendingPayment => &[
                SubscriptionStatus::Active,
                SubscriptionStatus::Trialing,
                SubscriptionStatus::Canceled,
            ],
            SubscriptionStatus::Trialing => {
                &[SubscriptionStatus::Active, SubscriptionStatus::Canceled]
            }
            SubscriptionStatus::Active => {
                &[SubscriptionStatus::PastDue, SubscriptionStatus::Canceled]
            }
            SubscriptionStatus::PastDue => {
                &[SubscriptionStatus::Active, SubscriptionStatus::Canceled]
            }
            SubscriptionStatus::Canceled => &[],
        }
    }

    pub fn can_transition_to(&self, to: SubscriptionStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

/// When a cancellation takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAt {
    Immediately,
    PeriodEnd,
}

/// The central mutable entity binding a customer to a plan + interval.
/// Never hard-deleted; cancellation is a status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan_code: String,
    pub interval: BillingInterval,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    /// A downgrade queued for the next renewal run.
    pub scheduled_plan_code: Option<String>,
    pub scheduled_interval: Option<BillingInterval>,
    pub provider_session_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        customer_id: Uuid,
        plan_code: impl Into<String>,
        interval: BillingInterval,
        status: SubscriptionStatus,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            plan_code: plan_code.into(),
            interval,
            status,
            current_period_start: period_start,
            current_period_end: period_end,
            trial_start: None,
            trial_end: None,
            cancel_at: None,
            canceled_at: None,
            scheduled_plan_code: None,
            scheduled_interval: None,
            provider_session_id: None,
            provider_subscription_id: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status transition, enforcing the state machine. Returns
    /// the previous status for event logging.
    pub fn transition(
        &mut self,
        to: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionStatus> {
        if !self.status.can_transition_to(to) {
            return Err(AppError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        let previous = self.status;
        self.status = to;
        if to == SubscriptionStatus::Canceled {
            self.canceled_at = Some(now);
        }
        self.updated_at = now;
        Ok(previous)
    }

    /// Whether a scheduled downgrade is waiting for the next renewal.
    pub fn has_scheduled_change(&self) -> bool {
        self.scheduled_plan_code.is_some() || self.scheduled_interval.is_some()
    }

    /// Plan code and interval that the next renewal should bill,
    /// honoring any scheduled change.
    pub fn effective_plan(&self) -> (&str, BillingInterval) {
        (
            self.scheduled_plan_code.as_deref().unwrap_or(&self.plan_code),
            self.scheduled_interval.unwrap_or(self.interval),
        )
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        ) && self.current_period_end <= now
    }
}
