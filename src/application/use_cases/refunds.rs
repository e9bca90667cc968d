//! Refunds.
//!
//! A refund never rewrites the original charge's amount: it appends a
//! negative ledger row and bumps the running `refunded_amount_cents` on
//! the charge, flipping its status to `refunded` once fully consumed.
//! All validation happens before the provider is contacted.

use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::behaviors::RefundParams,
    application::ports::payment_provider::RefundOutcome,
    application::use_cases::BillingEngine,
    domain::entities::payment::{Payment, PaymentKind, PaymentStatus},
};

impl BillingEngine {
    /// Refund a charge, fully (`amount_cents: None`) or partially.
    /// Returns the new refund ledger row. Dispatches through the refund
    /// behavior after the ledger is written.
    pub async fn create_refund(
        &self,
        payment_id: Uuid,
        amount_cents: Option<i64>,
        reason: Option<&str>,
    ) -> AppResult<Payment> {
        let cx = &self.cx;
        let refunds = cx
            .provider
            .refunds()
            .ok_or(AppError::UnsupportedCapability("refunds"))?;

        let original = cx
            .payments
            .get_by_id(payment_id)
            .await?
            .ok_or(AppError::NotFound("payment"))?;
        if original.status != PaymentStatus::Succeeded {
            return Err(AppError::InvalidInput(format!(
                "cannot refund a {} payment",
                original.status
            )));
        }
        let remaining = original.remaining_refundable();
        if remaining == 0 {
            return Err(AppError::InvalidInput(
                "payment has no refundable amount left".into(),
            ));
        }
        let requested = amount_cents.unwrap_or(remaining);
        if requested <= 0 {
            return Err(AppError::InvalidInput(
                "refund amount must be positive".into(),
            ));
        }
        if requested > remaining {
            return Err(AppError::InvalidInput(format!(
                "refund of {requested} exceeds remaining refundable amount {remaining}"
            )));
        }
        let provider_payment_id = original
            .provider_payment_id
            .as_deref()
            .ok_or(AppError::InvalidInput(
                "payment has no provider reference to refund against".into(),
            ))?;

        let provider_refund_id = match refunds
            .refund(provider_payment_id, Some(requested), reason)
            .await?
        {
            RefundOutcome::Refunded { provider_refund_id } => provider_refund_id,
            RefundOutcome::Failed { error } => return Err(AppError::ProviderFailure(error)),
        };

        let now = cx.clock.now(Some(original.customer_id));
        let is_full_refund = requested == remaining;

        let mut refund_row = Payment::new(
            original.customer_id,
            original.subscription_id,
            PaymentKind::Refund,
            PaymentStatus::Succeeded,
            -requested,
            &original.currency,
            now,
        );
        refund_row.provider_payment_id = Some(provider_refund_id);
        refund_row.metadata = serde_json::json!({
            "original_payment_id": original.id,
            "reason": reason,
        });
        cx.payments.create(&refund_row).await?;

        let mut updated = original.clone();
        updated.refunded_amount_cents += requested;
        if updated.refunded_amount_cents >= updated.amount_cents {
            updated.status = PaymentStatus::Refunded;
        }
        updated.updated_at = now;
        cx.payments.save(&updated).await?;

        tracing::debug!(
            payment_id = %original.id,
            refund_id = %refund_row.id,
            amount_cents = requested,
            is_full_refund,
            "Refund recorded"
        );

        self.behaviors
            .run_on_refund(
                self.cx.clone(),
                RefundParams {
                    payment: original,
                    refund_amount_cents: requested,
                    reason: reason.map(String::from),
                    is_full_refund,
                },
            )
            .await?;

        Ok(refund_row)
    }
}
