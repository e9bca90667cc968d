use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// What a ledger row represents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PaymentKind {
    Subscription,
    Renewal,
    Upgrade,
    Refund,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn is_successful(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded)
    }

    pub fn is_refunded(&self) -> bool {
        matches!(self, PaymentStatus::Refunded)
    }
}

/// Immutable-intent ledger row. A refund is a new negative-amount row;
/// the original row is only touched to bump `refunded_amount_cents`
/// and, once fully consumed, flip to `refunded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub kind: PaymentKind,
    pub status: PaymentStatus,
    /// Minor currency units; negative for refunds.
    pub amount_cents: i64,
    pub currency: String,
    pub provider_payment_id: Option<String>,
    /// Running total refunded off this row.
    pub refunded_amount_cents: i64,
    pub failure_message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        customer_id: Uuid,
        subscription_id: Option<Uuid>,
        kind: PaymentKind,
        status: PaymentStatus,
        amount_cents: i64,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            subscription_id,
            kind,
            status,
            amount_cents,
            currency: currency.into(),
            provider_payment_id: None,
            refunded_amount_cents: 0,
            failure_message: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount still available to refund off this row. Zero for anything
    /// that is not a succeeded positive charge.
    pub fn remaining_refundable(&self) -> i64 {
        if self.status != PaymentStatus::Succeeded || self.amount_cents <= 0 {
            return 0;
        }
        (self.amount_cents - self.refunded_amount_cents).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_remaining_refundable() {
        let mut p = Payment::new(
            Uuid::new_v4(),
            None,
            PaymentKind::Renewal,
            PaymentStatus::Succeeded,
            5000,
            "usd",
            now(),
        );
        assert_eq!(p.remaining_refundable(), 5000);
        p.refunded_amount_cents = 2000;
        assert_eq!(p.remaining_refundable(), 3000);
        p.status = PaymentStatus::Refunded;
        assert_eq!(p.remaining_refundable(), 0);
    }

    #[test]
    fn test_refund_rows_are_never_refundable() {
        let p = Payment::new(
            Uuid::new_v4(),
            None,
            PaymentKind::Refund,
            PaymentStatus::Succeeded,
            -1500,
            "usd",
            now(),
        );
        assert_eq!(p.remaining_refundable(), 0);
    }

    #[test]
    fn test_kind_round_trips() {
        assert_eq!(PaymentKind::Renewal.as_ref(), "renewal");
        assert_eq!("upgrade".parse::<PaymentKind>().unwrap(), PaymentKind::Upgrade);
    }
}
