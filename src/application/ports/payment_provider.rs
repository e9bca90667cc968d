use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    app_error::AppResult,
    domain::entities::{
        customer::Customer,
        plan::{Plan, Price},
        subscription::Subscription,
    },
};

// ============================================================================
// Port Types - Provider-agnostic domain types
// ============================================================================

/// URLs for hosted checkout redirects.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

/// Result of an initial subscription payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PaymentOutcome {
    /// Paid synchronously; the subscription can activate immediately.
    Active {
        provider_customer_id: String,
        provider_subscription_id: Option<String>,
        provider_payment_id: Option<String>,
    },
    /// The provider needs the customer to complete a hosted checkout
    /// session before anything is charged.
    Pending {
        session_id: String,
        redirect_url: String,
    },
    /// Declined by the provider.
    Failed { error: String },
}

/// Result of an off-session charge against a saved payment method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChargeOutcome {
    Succeeded { provider_payment_id: String },
    Failed { error: String },
}

/// Result of a refund request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RefundOutcome {
    Refunded { provider_refund_id: String },
    Failed { error: String },
}

// ============================================================================
// Payment Provider Port - capability-tagged interface
// ============================================================================

/// Payment provider port. The base trait covers initial subscription
/// payment, the one operation every provider must support. Renewal
/// charges, refunds, and checkout confirmation are optional
/// capabilities: an adapter advertises each by returning `Some` from
/// the matching accessor, and callers must check before use rather
/// than probe at call time.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Take the initial payment for a new subscription. May complete
    /// synchronously, hand back a checkout redirect, or fail.
    async fn process_payment(
        &self,
        customer: &Customer,
        plan: &Plan,
        price: &Price,
        subscription: &Subscription,
        urls: &CheckoutUrls,
        metadata: &Value,
    ) -> AppResult<PaymentOutcome>;

    /// Off-session charges (renewals, upgrade proration).
    fn charges(&self) -> Option<&dyn ChargeProvider> {
        None
    }

    /// Refunds against earlier charges.
    fn refunds(&self) -> Option<&dyn RefundProvider> {
        None
    }

    /// Polling a hosted checkout session for completion.
    fn confirmations(&self) -> Option<&dyn ConfirmationProvider> {
        None
    }
}

#[async_trait]
pub trait ChargeProvider: Send + Sync {
    /// Charge a saved payment method without the customer present.
    async fn charge(
        &self,
        customer: &Customer,
        amount_cents: i64,
        currency: &str,
        description: &str,
        metadata: &Value,
    ) -> AppResult<ChargeOutcome>;
}

#[async_trait]
pub trait RefundProvider: Send + Sync {
    /// Refund a prior charge, fully (`amount_cents: None`) or in part.
    async fn refund(
        &self,
        provider_payment_id: &str,
        amount_cents: Option<i64>,
        reason: Option<&str>,
    ) -> AppResult<RefundOutcome>;
}

#[async_trait]
pub trait ConfirmationProvider: Send + Sync {
    /// Look up a pending checkout session. `Ok(None)` means the session
    /// is still open; a terminal outcome resolves it either way.
    async fn confirm_payment(&self, session_id: &str) -> AppResult<Option<PaymentOutcome>>;
}
