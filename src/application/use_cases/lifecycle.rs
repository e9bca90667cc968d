//! Host-driven lifecycle events.
//!
//! Most lifecycle motion happens inside checkout and the renewal run,
//! but hosts integrating an external signal source (provider webhooks,
//! an ops console) can report trial ends and payment failures directly.
//! Both entry points dispatch through the behavior layer, so overrides
//! apply here exactly as they do in the batch paths.

use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::behaviors::{PaymentFailedParams, TrialEndParams},
    application::use_cases::BillingEngine,
    domain::entities::{
        payment::{Payment, PaymentKind, PaymentStatus},
        subscription::{Subscription, SubscriptionStatus},
        subscription_event::SubscriptionEvent,
    },
};

impl BillingEngine {
    /// End a trial now, regardless of its scheduled end. Runs the trial
    /// end behavior; with the default installed the subscription
    /// converts to active and the next renewal run takes the first
    /// charge.
    pub async fn process_trial_end(&self, subscription_id: Uuid) -> AppResult<Subscription> {
        let cx = &self.cx;
        let sub = cx
            .subscriptions
            .get_by_id(subscription_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;
        if sub.status != SubscriptionStatus::Trialing {
            return Err(AppError::InvalidInput(format!(
                "subscription is {}, not trialing",
                sub.status
            )));
        }

        self.behaviors
            .run_on_trial_end(self.cx.clone(), TrialEndParams { subscription_id })
            .await?;
        cx.subscriptions
            .get_by_id(subscription_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))
    }

    /// Record an externally-observed payment failure and run the
    /// payment failure behavior. Returns the subscription as it stands
    /// afterwards.
    pub async fn process_payment_failed(
        &self,
        subscription_id: Uuid,
        error: &str,
        provider_payment_id: Option<&str>,
    ) -> AppResult<Subscription> {
        let cx = &self.cx;
        let sub = cx
            .subscriptions
            .get_by_id(subscription_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;
        let now = cx.clock.now(Some(sub.customer_id));

        let (amount_cents, currency) = match cx.catalog.price(&sub.plan_code, sub.interval) {
            Some((_, price)) => (price.amount_cents, price.currency.clone()),
            None => (0, String::from("usd")),
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
        payment.failure_message = Some(error.to_string());
        payment.provider_payment_id = provider_payment_id.map(String::from);
        cx.payments.create(&payment).await?;

        self.behaviors
            .run_on_payment_failed(
                self.cx.clone(),
                PaymentFailedParams {
                    subscription_id,
                    error: error.to_string(),
                },
            )
            .await?;
        cx.subscriptions
            .get_by_id(subscription_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))
    }

    /// Audit trail for a subscription, oldest first.
    pub async fn subscription_events(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Vec<SubscriptionEvent>> {
        self.cx.events.list_by_subscription(subscription_id).await
    }
}
