//! Batch renewal processing.
//!
//! A renewal run sweeps due subscriptions: lapsed trials convert,
//! elapsed period-end cancellations complete, scheduled downgrades
//! apply, and the period charge is taken. The billing period only
//! advances after a successful charge, so re-running the processor is
//! idempotent and past-due subscriptions are retried on every run.

use serde::Serialize;
use strum::{AsRefStr, Display};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::behaviors::{PaymentFailedParams, TrialEndParams},
    application::ports::payment_provider::ChargeOutcome,
    application::use_cases::BillingEngine,
    domain::entities::{
        payment::{Payment, PaymentKind, PaymentStatus},
        plan::BillingInterval,
        subscription::{Subscription, SubscriptionStatus},
        subscription_event::SubscriptionEvent,
    },
};

#[derive(Debug, Clone, Default)]
pub struct RenewalRequest {
    /// Narrow the run to one customer (diagnostics, simulated clocks).
    pub customer_id: Option<Uuid>,
    /// Report what would happen without charging or writing anything.
    pub dry_run: bool,
    /// Cap on subscriptions processed this run.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RenewalOutcome {
    Succeeded,
    Failed,
    /// Nothing was (or would be) charged: cancellation completed, trial
    /// not yet lapsed, or an override kept the subscription as-is.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenewalDetail {
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub outcome: RenewalOutcome,
    pub plan_code: String,
    pub interval: BillingInterval,
    pub amount_cents: i64,
    pub error: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenewalSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub dry_run: bool,
    pub details: Vec<RenewalDetail>,
}

impl BillingEngine {
    /// Process due subscriptions. Item failures are isolated and
    /// reported per subscription; a provider without the charge
    /// capability is a configuration fault and aborts the whole run.
    pub async fn run_renewals(&self, request: RenewalRequest) -> AppResult<RenewalSummary> {
        let cx = &self.cx;
        let now = cx.clock.now(request.customer_id);
        let due = cx
            .subscriptions
            .list_due(now, request.customer_id, request.limit)
            .await?;
        tracing::debug!(
            due = due.len(),
            dry_run = request.dry_run,
            "Renewal run started"
        );

        let mut details = Vec::with_capacity(due.len());
        for sub in due {
            let (id, customer_id) = (sub.id, sub.customer_id);
            let (plan_code, interval) = (sub.plan_code.clone(), sub.interval);
            match self.renew_one(sub, request.dry_run).await {
                Ok(detail) => details.push(detail),
                Err(err @ AppError::UnsupportedCapability(_)) => return Err(err),
                Err(err) => details.push(RenewalDetail {
                    subscription_id: id,
                    customer_id,
                    outcome: RenewalOutcome::Failed,
                    plan_code,
                    interval,
                    amount_cents: 0,
                    error: Some(err.to_string()),
                    note: None,
                }),
            }
        }

        let summary = RenewalSummary {
            processed: details.len(),
            succeeded: details
                .iter()
                .filter(|d| d.outcome == RenewalOutcome::Succeeded)
                .count(),
            failed: details
                .iter()
                .filter(|d| d.outcome == RenewalOutcome::Failed)
                .count(),
            skipped: details
                .iter()
                .filter(|d| d.outcome == RenewalOutcome::Skipped)
                .count(),
            dry_run: request.dry_run,
            details,
        };
        tracing::debug!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Renewal run finished"
        );
        Ok(summary)
    }

    async fn renew_one(&self, mut sub: Subscription, dry_run: bool) -> AppResult<RenewalDetail> {
        let cx = &self.cx;
        let now = cx.clock.now(Some(sub.customer_id));

        let detail = |sub: &Subscription, outcome, amount_cents, error, note: Option<&str>| {
            RenewalDetail {
                subscription_id: sub.id,
                customer_id: sub.customer_id,
                outcome,
                plan_code: sub.plan_code.clone(),
                interval: sub.interval,
                amount_cents,
                error,
                note: note.map(String::from),
            }
        };

        if sub.status == SubscriptionStatus::Trialing {
            if sub.trial_end.is_none_or(|t| t > now) {
                return Ok(detail(
                    &sub,
                    RenewalOutcome::Skipped,
                    0,
                    None,
                    Some("trial still running"),
                ));
            }
            if dry_run {
                return Ok(detail(
                    &sub,
                    RenewalOutcome::Skipped,
                    0,
                    None,
                    Some("would convert trial"),
                ));
            }
            self.behaviors
                .run_on_trial_end(
                    self.cx.clone(),
                    TrialEndParams {
                        subscription_id: sub.id,
                    },
                )
                .await?;
            sub = cx
                .subscriptions
                .get_by_id(sub.id)
                .await?
                .ok_or(AppError::NotFound("subscription"))?;
            if sub.status != SubscriptionStatus::Active {
                return Ok(detail(
                    &sub,
                    RenewalOutcome::Skipped,
                    0,
                    None,
                    Some("trial end handled by override"),
                ));
            }
        }

        if let Some(cancel_at) = sub.cancel_at {
            if cancel_at <= now {
                if dry_run {
                    return Ok(detail(
                        &sub,
                        RenewalOutcome::Skipped,
                        0,
                        None,
                        Some("would cancel at period end"),
                    ));
                }
                let previous = sub.transition(SubscriptionStatus::Canceled, now)?;
                cx.subscriptions.save(&sub).await?;
                cx.record_transition(&sub, "canceled_at_period_end", previous, now)
                    .await?;
                return Ok(detail(
                    &sub,
                    RenewalOutcome::Skipped,
                    0,
                    None,
                    Some("canceled at period end"),
                ));
            }
        }

        if !sub.is_due(now) {
            return Ok(detail(&sub, RenewalOutcome::Skipped, 0, None, Some("not due")));
        }

        let (code, interval) = {
            let (c, i) = sub.effective_plan();
            (c.to_string(), i)
        };
        let (_, price) = cx
            .catalog
            .price(&code, interval)
            .ok_or_else(|| AppError::InvalidInput(format!("no {interval} price for plan {code}")))?;
        let amount_cents = price.amount_cents;
        let currency = price.currency.clone();

        if dry_run {
            return Ok(detail(
                &sub,
                RenewalOutcome::Succeeded,
                amount_cents,
                None,
                Some("would renew"),
            ));
        }

        // A queued downgrade takes effect before the charge, so the new
        // period is billed at the new price.
        if sub.has_scheduled_change() {
            let previous_plan = sub.plan_code.clone();
            sub.plan_code = code.clone();
            sub.interval = interval;
            sub.scheduled_plan_code = None;
            sub.scheduled_interval = None;
            sub.updated_at = now;
            cx.subscriptions.save(&sub).await?;
            cx.events
                .create(
                    &SubscriptionEvent::new(
                        sub.id,
                        "downgrade_applied",
                        Some(sub.status),
                        Some(sub.status),
                        now,
                    )
                    .with_metadata(serde_json::json!({
                        "previous_plan_code": previous_plan,
                        "new_plan_code": code,
                    })),
                )
                .await?;
        }

        if amount_cents == 0 {
            self.advance_period(&mut sub, 0, now).await?;
            return Ok(detail(&sub, RenewalOutcome::Succeeded, 0, None, None));
        }

        let charges = cx
            .provider
            .charges()
            .ok_or(AppError::UnsupportedCapability("charges"))?;
        let customer = cx
            .customers
            .get_by_id(sub.customer_id)
            .await?
            .ok_or(AppError::NotFound("customer"))?;

        let failure = if customer.has_saved_payment_method() {
            let description = format!("Renewal: {} ({interval})", sub.plan_code);
            let metadata = serde_json::json!({ "subscription_id": sub.id, "kind": "renewal" });
            match charges
                .charge(&customer, amount_cents, &currency, &description, &metadata)
                .await?
            {
                ChargeOutcome::Succeeded {
                    provider_payment_id,
                } => {
                    let mut payment = Payment::new(
                        sub.customer_id,
                        Some(sub.id),
                        PaymentKind::Renewal,
                        PaymentStatus::Succeeded,
                        amount_cents,
                        &currency,
                        now,
                    );
                    payment.provider_payment_id = Some(provider_payment_id);
                    cx.payments.create(&payment).await?;
                    self.advance_period(&mut sub, amount_cents, now).await?;
                    return Ok(detail(
                        &sub,
                        RenewalOutcome::Succeeded,
                        amount_cents,
                        None,
                        None,
                    ));
                }
                ChargeOutcome::Failed { error } => error,
            }
        } else {
            "no saved payment method".to_string()
        };

        let mut payment = Payment::new(
            sub.customer_id,
            Some(sub.id),
            PaymentKind::Renewal,
            PaymentStatus::Failed,
            amount_cents,
            &currency,
            now,
        );
        payment.failure_message = Some(failure.clone());
        cx.payments.create(&payment).await?;
        self.behaviors
            .run_on_payment_failed(
                self.cx.clone(),
                PaymentFailedParams {
                    subscription_id: sub.id,
                    error: failure.clone(),
                },
            )
            .await?;
        let sub = cx
            .subscriptions
            .get_by_id(sub.id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;
        Ok(detail(
            &sub,
            RenewalOutcome::Failed,
            amount_cents,
            Some(failure),
            None,
        ))
    }

    /// Open the next billing period. Only called after the charge (or a
    /// free renewal) went through.
    async fn advance_period(
        &self,
        sub: &mut Subscription,
        amount_cents: i64,
        now: chrono::DateTime<chrono::Utc>,
    ) -> AppResult<()> {
        let previous = sub.status;
        if sub.status == SubscriptionStatus::PastDue {
            sub.transition(SubscriptionStatus::Active, now)?;
        }
        sub.current_period_start = now;
        sub.current_period_end = sub.interval.period_end_from(now);
        sub.updated_at = now;
        self.cx.subscriptions.save(sub).await?;
        self.cx
            .events
            .create(
                &SubscriptionEvent::new(sub.id, "renewed", Some(previous), Some(sub.status), now)
                    .with_metadata(serde_json::json!({ "amount_cents": amount_cents })),
            )
            .await?;
        tracing::debug!(
            subscription_id = %sub.id,
            amount_cents,
            period_end = %sub.current_period_end,
            "Subscription renewed"
        );
        Ok(())
    }
}
