//! Subscription lifecycle: checkout, confirmation, cancellation and
//! plan changes.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::behaviors::{CancelParams, DowngradeParams, PaymentFailedParams},
    application::ports::payment_provider::{ChargeOutcome, CheckoutUrls, PaymentOutcome},
    application::use_cases::BillingEngine,
    domain::entities::{
        customer::Customer,
        payment::{Payment, PaymentKind, PaymentStatus},
        plan::BillingInterval,
        subscription::{CancelAt, Subscription, SubscriptionStatus},
        subscription_event::SubscriptionEvent,
    },
    domain::proration::{classify_change, prorate, PlanChangeType, Proration},
};

pub struct CreateSubscriptionInput {
    pub customer_id: Uuid,
    pub plan_code: String,
    pub interval: BillingInterval,
    pub urls: CheckoutUrls,
    pub metadata: Value,
}

/// How a checkout attempt resolved.
#[derive(Debug, Clone)]
pub enum CreateSubscriptionOutcome {
    /// Paid synchronously (or free); entitlements are live.
    Active { subscription: Subscription },
    /// Trial started without a charge.
    Trialing { subscription: Subscription },
    /// The customer must complete a hosted checkout; poll
    /// `confirm_subscription` with the stored session afterwards.
    PendingRedirect {
        subscription: Subscription,
        redirect_url: String,
    },
}

impl CreateSubscriptionOutcome {
    pub fn subscription(&self) -> &Subscription {
        match self {
            CreateSubscriptionOutcome::Active { subscription }
            | CreateSubscriptionOutcome::Trialing { subscription }
            | CreateSubscriptionOutcome::PendingRedirect { subscription, .. } => subscription,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub subscription: Subscription,
    pub status: SubscriptionStatus,
    /// When paid access lapses.
    pub access_until: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PlanChangeResult {
    pub change_type: PlanChangeType,
    pub amount_charged_cents: i64,
    pub proration: Option<Proration>,
    pub effective_at: DateTime<Utc>,
    pub subscription: Subscription,
}

impl BillingEngine {
    /// Find or create the billing customer for a host-application user.
    /// Keeps the stored email current.
    pub async fn ensure_customer(&self, external_id: &str, email: &str) -> AppResult<Customer> {
        let cx = &self.cx;
        if let Some(mut existing) = cx.customers.get_by_external_id(external_id).await? {
            if existing.email != email {
                existing.email = email.to_string();
                existing.updated_at = cx.clock.now(Some(existing.id));
                cx.customers.save(&existing).await?;
            }
            return Ok(existing);
        }

        let customer = Customer::new(external_id, email, cx.clock.now(None));
        cx.customers.create(&customer).await?;
        tracing::debug!(customer_id = %customer.id, external_id = %external_id, "Customer created");
        Ok(customer)
    }

    pub async fn current_subscription(&self, customer_id: Uuid) -> AppResult<Option<Subscription>> {
        self.cx.subscriptions.get_counting_active(customer_id).await
    }

    pub async fn list_payments(&self, customer_id: Uuid) -> AppResult<Vec<Payment>> {
        self.cx.payments.list_by_customer(customer_id).await
    }

    /// A customer keeps at most one counting-as-active subscription.
    /// Activating a new one cancels every other live row as a side
    /// effect, never as a precondition failure.
    async fn cancel_siblings(
        &self,
        customer_id: Uuid,
        keep: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let cx = &self.cx;
        for mut sibling in cx.subscriptions.list_counting_active(customer_id).await? {
            if sibling.id == keep {
                continue;
            }
            let previous = sibling.transition(SubscriptionStatus::Canceled, now)?;
            cx.subscriptions.save(&sibling).await?;
            cx.record_transition(&sibling, "superseded", previous, now)
                .await?;
            tracing::debug!(
                subscription_id = %sibling.id,
                superseded_by = %keep,
                "Prior subscription canceled on new activation"
            );
        }
        Ok(())
    }

    /// Start a subscription. Trials begin without touching the payment
    /// provider; free prices activate directly; paid prices go through
    /// the provider and either activate synchronously or hand back a
    /// checkout redirect.
    pub async fn create_subscription(
        &self,
        input: CreateSubscriptionInput,
    ) -> AppResult<CreateSubscriptionOutcome> {
        let cx = &self.cx;
        let mut customer = cx
            .customers
            .get_by_id(input.customer_id)
            .await?
            .ok_or(AppError::NotFound("customer"))?;
        let now = cx.clock.now(Some(customer.id));
        let (plan, price) = cx
            .catalog
            .price(&input.plan_code, input.interval)
            .ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "no {} price for plan {}",
                    input.interval, input.plan_code
                ))
            })?;

        // An unfinished checkout gives way to the new attempt. Live
        // siblings stay untouched until the new subscription actually
        // activates; `cancel_siblings` retires them then.
        if let Some(mut existing) = cx.subscriptions.get_counting_active(customer.id).await? {
            if existing.status == SubscriptionStatus::PendingPayment {
                let previous = existing.transition(SubscriptionStatus::Canceled, now)?;
                cx.subscriptions.save(&existing).await?;
                cx.record_transition(&existing, "checkout_abandoned", previous, now)
                    .await?;
            }
        }

        if price.has_trial() {
            let trial_end = now + Duration::days(i64::from(price.trial_days.unwrap_or(0)));
            let mut sub = Subscription::new(
                customer.id,
                &plan.code,
                input.interval,
                SubscriptionStatus::Trialing,
                now,
                trial_end,
                now,
            );
            sub.trial_start = Some(now);
            sub.trial_end = Some(trial_end);
            sub.metadata = input.metadata;
            cx.subscriptions.create(&sub).await?;
            self.cancel_siblings(customer.id, sub.id, now).await?;
            cx.events
                .create(&SubscriptionEvent::new(
                    sub.id,
                    "trial_started",
                    None,
                    Some(sub.status),
                    now,
                ))
                .await?;
            tracing::debug!(
                subscription_id = %sub.id,
                plan = %plan.code,
                trial_end = %trial_end,
                "Trial started"
            );
            return Ok(CreateSubscriptionOutcome::Trialing { subscription: sub });
        }

        if price.is_free() {
            let mut sub = Subscription::new(
                customer.id,
                &plan.code,
                input.interval,
                SubscriptionStatus::Active,
                now,
                input.interval.period_end_from(now),
                now,
            );
            sub.metadata = input.metadata;
            cx.subscriptions.create(&sub).await?;
            self.cancel_siblings(customer.id, sub.id, now).await?;
            cx.events
                .create(&SubscriptionEvent::new(
                    sub.id,
                    "activated",
                    None,
                    Some(sub.status),
                    now,
                ))
                .await?;
            return Ok(CreateSubscriptionOutcome::Active { subscription: sub });
        }

        let mut sub = Subscription::new(
            customer.id,
            &plan.code,
            input.interval,
            SubscriptionStatus::PendingPayment,
            now,
            input.interval.period_end_from(now),
            now,
        );
        sub.metadata = input.metadata.clone();
        cx.subscriptions.create(&sub).await?;
        cx.events
            .create(&SubscriptionEvent::new(
                sub.id,
                "checkout_started",
                None,
                Some(sub.status),
                now,
            ))
            .await?;

        match cx
            .provider
            .process_payment(&customer, plan, price, &sub, &input.urls, &input.metadata)
            .await?
        {
            PaymentOutcome::Active {
                provider_customer_id,
                provider_subscription_id,
                provider_payment_id,
            } => {
                customer.provider_customer_id = Some(provider_customer_id);
                customer.updated_at = now;
                cx.customers.save(&customer).await?;

                self.cancel_siblings(customer.id, sub.id, now).await?;
                sub.provider_subscription_id = provider_subscription_id;
                let previous = sub.transition(SubscriptionStatus::Active, now)?;
                cx.subscriptions.save(&sub).await?;

                let mut payment = Payment::new(
                    customer.id,
                    Some(sub.id),
                    PaymentKind::Subscription,
                    PaymentStatus::Succeeded,
                    price.amount_cents,
                    &price.currency,
                    now,
                );
                payment.provider_payment_id = provider_payment_id;
                cx.payments.create(&payment).await?;
                cx.record_transition(&sub, "activated", previous, now).await?;

                tracing::debug!(
                    subscription_id = %sub.id,
                    plan = %plan.code,
                    amount_cents = price.amount_cents,
                    "Subscription activated"
                );
                Ok(CreateSubscriptionOutcome::Active { subscription: sub })
            }
            PaymentOutcome::Pending {
                session_id,
                redirect_url,
            } => {
                sub.provider_session_id = Some(session_id);
                sub.updated_at = now;
                cx.subscriptions.save(&sub).await?;
                Ok(CreateSubscriptionOutcome::PendingRedirect {
                    subscription: sub,
                    redirect_url,
                })
            }
            PaymentOutcome::Failed { error } => {
                let mut payment = Payment::new(
                    customer.id,
                    Some(sub.id),
                    PaymentKind::Subscription,
                    PaymentStatus::Failed,
                    price.amount_cents,
                    &price.currency,
                    now,
                );
                payment.failure_message = Some(error.clone());
                cx.payments.create(&payment).await?;

                self.behaviors
                    .run_on_payment_failed(
                        self.cx.clone(),
                        PaymentFailedParams {
                            subscription_id: sub.id,
                            error: error.clone(),
                        },
                    )
                    .await?;

                // A declined checkout is terminal; retrying starts a
                // fresh subscription.
                let mut sub = cx
                    .subscriptions
                    .get_by_id(sub.id)
                    .await?
                    .ok_or(AppError::NotFound("subscription"))?;
                if sub.status == SubscriptionStatus::PendingPayment {
                    let previous = sub.transition(SubscriptionStatus::Canceled, now)?;
                    cx.subscriptions.save(&sub).await?;
                    cx.record_transition(&sub, "checkout_failed", previous, now)
                        .await?;
                }
                Err(AppError::PaymentDeclined(error))
            }
        }
    }

    /// Resolve a pending hosted-checkout subscription. `Ok(None)` means
    /// the session is still open. Calling this on an already-resolved
    /// subscription just returns it.
    pub async fn confirm_subscription(&self, session_id: &str) -> AppResult<Option<Subscription>> {
        let cx = &self.cx;
        let mut sub = cx
            .subscriptions
            .get_by_session_id(session_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;
        if sub.status != SubscriptionStatus::PendingPayment {
            return Ok(Some(sub));
        }

        let confirmations = cx
            .provider
            .confirmations()
            .ok_or(AppError::UnsupportedCapability("confirmations"))?;
        let now = cx.clock.now(Some(sub.customer_id));

        match confirmations.confirm_payment(session_id).await? {
            None | Some(PaymentOutcome::Pending { .. }) => Ok(None),
            Some(PaymentOutcome::Active {
                provider_customer_id,
                provider_subscription_id,
                provider_payment_id,
            }) => {
                let mut customer = cx
                    .customers
                    .get_by_id(sub.customer_id)
                    .await?
                    .ok_or(AppError::NotFound("customer"))?;
                customer.provider_customer_id = Some(provider_customer_id);
                customer.updated_at = now;
                cx.customers.save(&customer).await?;

                let (_, price) = cx
                    .catalog
                    .price(&sub.plan_code, sub.interval)
                    .ok_or(AppError::NotFound("plan"))?;

                self.cancel_siblings(sub.customer_id, sub.id, now).await?;

                // The paid period starts when the checkout completes,
                // not when it was opened.
                sub.provider_subscription_id = provider_subscription_id;
                sub.current_period_start = now;
                sub.current_period_end = sub.interval.period_end_from(now);
                let previous = sub.transition(SubscriptionStatus::Active, now)?;
                cx.subscriptions.save(&sub).await?;

                let mut payment = Payment::new(
                    sub.customer_id,
                    Some(sub.id),
                    PaymentKind::Subscription,
                    PaymentStatus::Succeeded,
                    price.amount_cents,
                    &price.currency,
                    now,
                );
                payment.provider_payment_id = provider_payment_id;
                cx.payments.create(&payment).await?;
                cx.record_transition(&sub, "activated", previous, now).await?;
                Ok(Some(sub))
            }
            Some(PaymentOutcome::Failed { error }) => {
                let (_, price) = cx
                    .catalog
                    .price(&sub.plan_code, sub.interval)
                    .ok_or(AppError::NotFound("plan"))?;
                let mut payment = Payment::new(
                    sub.customer_id,
                    Some(sub.id),
                    PaymentKind::Subscription,
                    PaymentStatus::Failed,
                    price.amount_cents,
                    &price.currency,
                    now,
                );
                payment.failure_message = Some(error.clone());
                cx.payments.create(&payment).await?;

                let previous = sub.transition(SubscriptionStatus::Canceled, now)?;
                cx.subscriptions.save(&sub).await?;
                cx.record_transition(&sub, "checkout_failed", previous, now)
                    .await?;
                Err(AppError::PaymentDeclined(error))
            }
        }
    }

    /// Cancel the customer's subscription, immediately or at period
    /// end. Dispatches through the cancellation behavior.
    pub async fn cancel_subscription(
        &self,
        customer_id: Uuid,
        cancel_at: CancelAt,
    ) -> AppResult<CancelOutcome> {
        let cx = &self.cx;
        let sub = cx
            .subscriptions
            .get_counting_active(customer_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;

        self.behaviors
            .run_on_subscription_cancel(
                self.cx.clone(),
                CancelParams {
                    subscription_id: sub.id,
                    cancel_at,
                },
            )
            .await?;

        let sub = cx
            .subscriptions
            .get_by_id(sub.id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;
        let access_until = match sub.status {
            SubscriptionStatus::Canceled => sub.canceled_at.unwrap_or(sub.current_period_end),
            _ => sub.cancel_at.unwrap_or(sub.current_period_end),
        };
        Ok(CancelOutcome {
            status: sub.status,
            access_until,
            subscription: sub,
        })
    }

    /// Change plan or interval. Upgrades (longer interval, or same
    /// interval at a higher price) bill immediately, prorated by
    /// default, and reset the billing period. Downgrades are queued for
    /// the next renewal via the downgrade behavior.
    pub async fn change_subscription(
        &self,
        customer_id: Uuid,
        new_plan_code: &str,
        new_interval: Option<BillingInterval>,
        prorate_change: bool,
    ) -> AppResult<PlanChangeResult> {
        let cx = &self.cx;
        let mut sub = cx
            .subscriptions
            .get_counting_active(customer_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;
        if !matches!(
            sub.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        ) {
            return Err(AppError::InvalidInput(format!(
                "cannot change plan of a {} subscription",
                sub.status
            )));
        }

        let new_interval = new_interval.unwrap_or(sub.interval);
        if sub.plan_code == new_plan_code && sub.interval == new_interval {
            return Err(AppError::InvalidInput(
                "subscription is already on this plan and interval".into(),
            ));
        }
        let (_, old_price) = cx
            .catalog
            .price(&sub.plan_code, sub.interval)
            .ok_or(AppError::NotFound("plan"))?;
        let (new_plan, new_price) = cx
            .catalog
            .price(new_plan_code, new_interval)
            .ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "no {} price for plan {}",
                    new_interval, new_plan_code
                ))
            })?;

        if classify_change(old_price, new_price) == PlanChangeType::Downgrade {
            self.behaviors
                .run_on_downgrade(
                    self.cx.clone(),
                    DowngradeParams {
                        subscription_id: sub.id,
                        new_plan_code: new_plan_code.to_string(),
                        new_interval,
                    },
                )
                .await?;
            let sub = cx
                .subscriptions
                .get_by_id(sub.id)
                .await?
                .ok_or(AppError::NotFound("subscription"))?;
            return Ok(PlanChangeResult {
                change_type: PlanChangeType::Downgrade,
                amount_charged_cents: 0,
                proration: None,
                effective_at: sub.current_period_end,
                subscription: sub,
            });
        }

        let now = cx.clock.now(Some(customer_id));
        let trialing = sub.status == SubscriptionStatus::Trialing;

        // A trial has paid nothing, so there is nothing to credit; the
        // upgrade is billed at the full new price.
        let (charge_amount, proration) = if trialing || !prorate_change {
            (new_price.amount_cents, None)
        } else {
            let p = prorate(
                old_price.amount_cents,
                new_price.amount_cents,
                sub.current_period_start,
                sub.current_period_end,
                now,
            )?;
            (p.net_amount.max(0), Some(p))
        };
        let currency = new_price.currency.clone();

        let mut payment_id = None;
        if charge_amount > 0 {
            let charges = cx
                .provider
                .charges()
                .ok_or(AppError::UnsupportedCapability("charges"))?;
            let customer = cx
                .customers
                .get_by_id(customer_id)
                .await?
                .ok_or(AppError::NotFound("customer"))?;
            if !customer.has_saved_payment_method() {
                return Err(AppError::InvalidInput(
                    "customer has no saved payment method for the upgrade charge".into(),
                ));
            }

            let description = format!("Upgrade to {} ({})", new_plan.name, new_interval);
            let metadata = serde_json::json!({ "subscription_id": sub.id, "kind": "upgrade" });
            match charges
                .charge(&customer, charge_amount, &currency, &description, &metadata)
                .await?
            {
                ChargeOutcome::Succeeded {
                    provider_payment_id,
                } => {
                    let mut payment = Payment::new(
                        customer_id,
                        Some(sub.id),
                        PaymentKind::Upgrade,
                        PaymentStatus::Succeeded,
                        charge_amount,
                        &currency,
                        now,
                    );
                    payment.provider_payment_id = Some(provider_payment_id);
                    cx.payments.create(&payment).await?;
                    payment_id = Some(payment.id);
                }
                ChargeOutcome::Failed { error } => {
                    // Leave the subscription on its current plan.
                    let mut payment = Payment::new(
                        customer_id,
                        Some(sub.id),
                        PaymentKind::Upgrade,
                        PaymentStatus::Failed,
                        charge_amount,
                        &currency,
                        now,
                    );
                    payment.failure_message = Some(error.clone());
                    cx.payments.create(&payment).await?;
                    cx.events
                        .create(
                            &SubscriptionEvent::new(
                                sub.id,
                                "upgrade_payment_failed",
                                Some(sub.status),
                                Some(sub.status),
                                now,
                            )
                            .with_metadata(serde_json::json!({ "error": error })),
                        )
                        .await?;
                    return Err(AppError::PaymentDeclined(error));
                }
            }
        }

        let previous = sub.status;
        sub.plan_code = new_plan_code.to_string();
        sub.interval = new_interval;
        sub.scheduled_plan_code = None;
        sub.scheduled_interval = None;
        sub.current_period_start = now;
        sub.current_period_end = new_interval.period_end_from(now);
        if trialing {
            sub.transition(SubscriptionStatus::Active, now)?;
        }
        sub.updated_at = now;
        cx.subscriptions.save(&sub).await?;
        cx.events
            .create(
                &SubscriptionEvent::new(sub.id, "upgraded", Some(previous), Some(sub.status), now)
                    .with_metadata(serde_json::json!({
                        "new_plan_code": new_plan_code,
                        "new_interval": new_interval,
                        "amount_charged_cents": charge_amount,
                        "payment_id": payment_id,
                    })),
            )
            .await?;

        tracing::debug!(
            subscription_id = %sub.id,
            new_plan = %new_plan_code,
            amount_cents = charge_amount,
            "Subscription upgraded"
        );
        Ok(PlanChangeResult {
            change_type: PlanChangeType::Upgrade,
            amount_charged_cents: charge_amount,
            proration,
            effective_at: now,
            subscription: sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::repositories::SubscriptionRepo;
    use crate::domain::entities::payment_scenario::PaymentScenario;
    use crate::test_utils::{checkout_urls, test_engine, test_engine_with, TestEngine};
    use chrono::Duration;

    async fn subscribed(harness: &TestEngine, plan: &str, interval: BillingInterval) -> Subscription {
        let customer = harness
            .engine
            .ensure_customer("user-1", "user@example.com")
            .await
            .unwrap();
        let outcome = harness
            .engine
            .create_subscription(CreateSubscriptionInput {
                customer_id: customer.id,
                plan_code: plan.into(),
                interval,
                urls: checkout_urls(),
                metadata: serde_json::Value::Null,
            })
            .await
            .unwrap();
        outcome.subscription().clone()
    }

    #[tokio::test]
    async fn test_ensure_customer_is_idempotent() {
        let h = test_engine(PaymentScenario::Success);
        let a = h.engine.ensure_customer("u1", "a@example.com").await.unwrap();
        let b = h.engine.ensure_customer("u1", "b@example.com").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.email, "b@example.com");
    }

    #[tokio::test]
    async fn test_paid_checkout_activates_synchronously() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "basic", BillingInterval::Monthly).await;
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.provider_subscription_id.is_some());

        let payments = h.engine.list_payments(sub.customer_id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].kind, PaymentKind::Subscription);
        assert_eq!(payments[0].amount_cents, 2000);
        assert!(payments[0].status.is_successful());

        let customer = h.customers_by_external("user-1").await;
        assert!(customer.has_saved_payment_method());
    }

    #[tokio::test]
    async fn test_declined_checkout_cancels_and_errors() {
        let h = test_engine(PaymentScenario::Decline);
        let customer = h.engine.ensure_customer("u1", "u@example.com").await.unwrap();
        let err = h
            .engine
            .create_subscription(CreateSubscriptionInput {
                customer_id: customer.id,
                plan_code: "basic".into(),
                interval: BillingInterval::Monthly,
                urls: checkout_urls(),
                metadata: serde_json::Value::Null,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PaymentDeclined(_)));

        // The failed attempt is terminal; a retry starts fresh.
        assert!(h
            .engine
            .current_subscription(customer.id)
            .await
            .unwrap()
            .is_none());
        let payments = h.engine.list_payments(customer.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Failed);

        h.provider.set_scenario(PaymentScenario::Success);
        let outcome = h
            .engine
            .create_subscription(CreateSubscriptionInput {
                customer_id: customer.id,
                plan_code: "basic".into(),
                interval: BillingInterval::Monthly,
                urls: checkout_urls(),
                metadata: serde_json::Value::Null,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, CreateSubscriptionOutcome::Active { .. }));
    }

    #[tokio::test]
    async fn test_trial_plan_starts_without_provider_call() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "trial", BillingInterval::Monthly).await;
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
        assert_eq!(
            sub.trial_end.unwrap(),
            sub.trial_start.unwrap() + Duration::days(14)
        );
        assert_eq!(sub.current_period_end, sub.trial_end.unwrap());
        assert_eq!(h.provider.process_payment_calls(), 0);
        assert!(h.engine.list_payments(sub.customer_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_free_plan_activates_without_provider_call() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "free", BillingInterval::Monthly).await;
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(h.provider.process_payment_calls(), 0);
    }

    #[tokio::test]
    async fn test_activation_cancels_prior_active_sibling() {
        let h = test_engine(PaymentScenario::Success);
        let first = subscribed(&h, "basic", BillingInterval::Monthly).await;

        let second = subscribed(&h, "pro", BillingInterval::Monthly).await;
        assert_eq!(second.status, SubscriptionStatus::Active);
        assert_eq!(
            h.subscription(first.id).await.status,
            SubscriptionStatus::Canceled
        );
        let current = h
            .engine
            .current_subscription(first.customer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.id, second.id);
    }

    #[tokio::test]
    async fn test_activation_cancels_all_prior_active_rows() {
        let h = test_engine(PaymentScenario::Success);
        let first = subscribed(&h, "basic", BillingInterval::Monthly).await;
        // A raced activation left a second live row behind; the next
        // activation repairs it.
        let mut raced = first.clone();
        raced.id = Uuid::new_v4();
        h.subscriptions.create(&raced).await.unwrap();

        let third = subscribed(&h, "pro", BillingInterval::Monthly).await;
        assert_eq!(third.status, SubscriptionStatus::Active);
        assert_eq!(
            h.subscription(first.id).await.status,
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            h.subscription(raced.id).await.status,
            SubscriptionStatus::Canceled
        );
    }

    #[tokio::test]
    async fn test_trial_start_cancels_prior_active_sibling() {
        let h = test_engine(PaymentScenario::Success);
        let paid = subscribed(&h, "basic", BillingInterval::Monthly).await;

        let trial = subscribed(&h, "trial", BillingInterval::Monthly).await;
        assert_eq!(trial.status, SubscriptionStatus::Trialing);
        assert_eq!(
            h.subscription(paid.id).await.status,
            SubscriptionStatus::Canceled
        );
    }

    #[tokio::test]
    async fn test_new_checkout_replaces_abandoned_one() {
        let h = test_engine(PaymentScenario::Checkout);
        let first = subscribed(&h, "basic", BillingInterval::Monthly).await;
        assert_eq!(first.status, SubscriptionStatus::PendingPayment);

        let second = subscribed(&h, "pro", BillingInterval::Monthly).await;
        assert_eq!(second.status, SubscriptionStatus::PendingPayment);
        assert_ne!(first.id, second.id);

        let old = h.subscription(first.id).await;
        assert_eq!(old.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_checkout_confirmation_activates() {
        let h = test_engine(PaymentScenario::Checkout);
        let sub = subscribed(&h, "basic", BillingInterval::Monthly).await;
        assert_eq!(sub.status, SubscriptionStatus::PendingPayment);
        let session = sub.provider_session_id.clone().unwrap();

        // Session still open.
        assert!(h.engine.confirm_subscription(&session).await.unwrap().is_none());

        h.provider.complete_session(&session);
        let confirmed = h
            .engine
            .confirm_subscription(&session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(confirmed.status, SubscriptionStatus::Active);

        // Re-confirming is a no-op.
        let again = h
            .engine
            .confirm_subscription(&session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.status, SubscriptionStatus::Active);
        assert_eq!(
            h.engine.list_payments(sub.customer_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_checkout_confirmation_supersedes_live_subscription() {
        let h = test_engine(PaymentScenario::Checkout);
        let free = subscribed(&h, "free", BillingInterval::Monthly).await;
        assert_eq!(free.status, SubscriptionStatus::Active);

        let pending = subscribed(&h, "basic", BillingInterval::Monthly).await;
        let session = pending.provider_session_id.clone().unwrap();
        h.provider.complete_session(&session);
        let confirmed = h
            .engine
            .confirm_subscription(&session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(confirmed.status, SubscriptionStatus::Active);
        assert_eq!(
            h.subscription(free.id).await.status,
            SubscriptionStatus::Canceled
        );
    }

    #[tokio::test]
    async fn test_failed_checkout_confirmation_cancels() {
        let h = test_engine(PaymentScenario::Checkout);
        let sub = subscribed(&h, "basic", BillingInterval::Monthly).await;
        let session = sub.provider_session_id.clone().unwrap();

        h.provider.fail_session(&session, "card declined in checkout");
        let err = h.engine.confirm_subscription(&session).await.unwrap_err();
        assert!(matches!(err, AppError::PaymentDeclined(_)));
        assert_eq!(h.subscription(sub.id).await.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_immediately() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "basic", BillingInterval::Monthly).await;
        let outcome = h
            .engine
            .cancel_subscription(sub.customer_id, CancelAt::Immediately)
            .await
            .unwrap();
        assert_eq!(outcome.status, SubscriptionStatus::Canceled);
        assert!(h
            .engine
            .current_subscription(sub.customer_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cancel_at_period_end_keeps_access() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "basic", BillingInterval::Monthly).await;
        let outcome = h
            .engine
            .cancel_subscription(sub.customer_id, CancelAt::PeriodEnd)
            .await
            .unwrap();
        assert_eq!(outcome.status, SubscriptionStatus::Active);
        assert_eq!(outcome.access_until, sub.current_period_end);
        let stored = h.subscription(sub.id).await;
        assert_eq!(stored.cancel_at, Some(sub.current_period_end));
    }

    #[tokio::test]
    async fn test_upgrade_charges_prorated_and_resets_period() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "basic", BillingInterval::Monthly).await;

        // Half the period gone.
        let half = (sub.current_period_end - sub.current_period_start) / 2;
        h.clock.advance(half);

        let result = h
            .engine
            .change_subscription(sub.customer_id, "pro", None, true)
            .await
            .unwrap();
        assert_eq!(result.change_type, PlanChangeType::Upgrade);
        let proration = result.proration.unwrap();
        assert_eq!(result.amount_charged_cents, proration.net_amount);
        assert!(result.amount_charged_cents > 0);
        assert!(result.amount_charged_cents < 5000);

        let updated = result.subscription;
        assert_eq!(updated.plan_code, "pro");
        assert_eq!(updated.current_period_start, result.effective_at);

        let payments = h.engine.list_payments(sub.customer_id).await.unwrap();
        let upgrade_row = payments
            .iter()
            .find(|p| p.kind == PaymentKind::Upgrade)
            .unwrap();
        assert_eq!(upgrade_row.amount_cents, result.amount_charged_cents);
    }

    #[tokio::test]
    async fn test_upgrade_without_proration_charges_full_price() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "basic", BillingInterval::Monthly).await;
        h.clock.advance(Duration::days(10));
        let result = h
            .engine
            .change_subscription(sub.customer_id, "pro", None, false)
            .await
            .unwrap();
        assert_eq!(result.amount_charged_cents, 5000);
        assert!(result.proration.is_none());
    }

    #[tokio::test]
    async fn test_interval_change_to_yearly_is_upgrade() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "pro", BillingInterval::Monthly).await;
        let result = h
            .engine
            .change_subscription(
                sub.customer_id,
                "pro",
                Some(BillingInterval::Yearly),
                true,
            )
            .await
            .unwrap();
        assert_eq!(result.change_type, PlanChangeType::Upgrade);
        assert_eq!(result.subscription.interval, BillingInterval::Yearly);
    }

    #[tokio::test]
    async fn test_downgrade_is_scheduled_not_charged() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "pro", BillingInterval::Monthly).await;
        let result = h
            .engine
            .change_subscription(sub.customer_id, "basic", None, true)
            .await
            .unwrap();
        assert_eq!(result.change_type, PlanChangeType::Downgrade);
        assert_eq!(result.amount_charged_cents, 0);
        assert_eq!(result.effective_at, sub.current_period_end);

        let stored = result.subscription;
        // Still on the old plan until renewal.
        assert_eq!(stored.plan_code, "pro");
        assert_eq!(stored.scheduled_plan_code.as_deref(), Some("basic"));
        assert_eq!(h.provider.charge_calls(), 0);
    }

    #[tokio::test]
    async fn test_change_to_same_plan_rejected() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "basic", BillingInterval::Monthly).await;
        let err = h
            .engine
            .change_subscription(sub.customer_id, "basic", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_upgrade_fails_without_charge_capability() {
        let h = test_engine_with(PaymentScenario::Success, |provider| provider.without_charges());
        let sub = subscribed(&h, "basic", BillingInterval::Monthly).await;
        h.clock.advance(Duration::days(5));
        let err = h
            .engine
            .change_subscription(sub.customer_id, "pro", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedCapability("charges")));
        // Untouched.
        assert_eq!(h.subscription(sub.id).await.plan_code, "basic");
    }

    #[tokio::test]
    async fn test_failed_upgrade_charge_keeps_old_plan() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "basic", BillingInterval::Monthly).await;
        h.clock.advance(Duration::days(5));
        h.provider.set_scenario(PaymentScenario::InsufficientFunds);

        let err = h
            .engine
            .change_subscription(sub.customer_id, "pro", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PaymentDeclined(_)));

        let stored = h.subscription(sub.id).await;
        assert_eq!(stored.plan_code, "basic");
        assert_eq!(stored.status, SubscriptionStatus::Active);
        let payments = h.engine.list_payments(sub.customer_id).await.unwrap();
        assert!(payments
            .iter()
            .any(|p| p.kind == PaymentKind::Upgrade && p.status == PaymentStatus::Failed));
    }

    #[tokio::test]
    async fn test_trial_upgrade_charges_full_price_and_activates() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "trial", BillingInterval::Monthly).await;
        assert_eq!(sub.status, SubscriptionStatus::Trialing);

        // A trial never touched the provider, so simulate a saved card.
        h.set_saved_payment_method(sub.customer_id).await;

        let result = h
            .engine
            .change_subscription(sub.customer_id, "pro", None, true)
            .await
            .unwrap();
        assert_eq!(result.change_type, PlanChangeType::Upgrade);
        assert_eq!(result.amount_charged_cents, 5000);
        assert_eq!(result.subscription.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_upgrade_requires_saved_payment_method() {
        let h = test_engine(PaymentScenario::Success);
        let sub = subscribed(&h, "trial", BillingInterval::Monthly).await;
        let err = h
            .engine
            .change_subscription(sub.customer_id, "pro", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
