//! Overridable lifecycle behaviors.
//!
//! Five lifecycle moments dispatch through this module: refund,
//! payment failure, cancellation, trial end, and downgrade. Each has a
//! default that performs the standard state change. A host application
//! can replace any of them with a hook that receives the engine
//! context, the event parameters, and a `next` continuation invoking
//! the default. The hook decides whether to call `next`, wrap it, or
//! skip it entirely.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::EngineContext,
    domain::entities::{
        payment::Payment,
        plan::BillingInterval,
        subscription::{CancelAt, SubscriptionStatus},
        subscription_event::SubscriptionEvent,
    },
};

/// Continuation running the default behavior for the event.
pub type Next = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = AppResult<()>> + Send>> + Send>;

/// A behavior override. Implemented for any matching async closure, so
/// hosts rarely implement this by hand.
#[async_trait]
pub trait Hook<P>: Send + Sync {
    async fn run(&self, cx: Arc<EngineContext>, params: P, next: Next) -> AppResult<()>;
}

#[async_trait]
impl<P, F, Fut> Hook<P> for F
where
    P: Send + 'static,
    F: Fn(Arc<EngineContext>, P, Next) -> Fut + Send + Sync,
    Fut: Future<Output = AppResult<()>> + Send,
{
    async fn run(&self, cx: Arc<EngineContext>, params: P, next: Next) -> AppResult<()> {
        (self)(cx, params, next).await
    }
}

// ============================================================================
// Event Parameters
// ============================================================================

/// A refund was executed at the provider and recorded in the ledger.
/// Fired after the ledger write, before any lifecycle consequence.
#[derive(Clone)]
pub struct RefundParams {
    /// The original charge, as it was before this refund was applied.
    pub payment: Payment,
    pub refund_amount_cents: i64,
    pub reason: Option<String>,
    /// Whether this refund consumed the row's full remaining amount.
    pub is_full_refund: bool,
}

/// A charge attempt failed (initial payment, renewal, or upgrade).
#[derive(Clone)]
pub struct PaymentFailedParams {
    pub subscription_id: Uuid,
    pub error: String,
}

/// A cancellation was requested.
#[derive(Clone)]
pub struct CancelParams {
    pub subscription_id: Uuid,
    pub cancel_at: CancelAt,
}

/// A trial window has lapsed.
#[derive(Clone)]
pub struct TrialEndParams {
    pub subscription_id: Uuid,
}

/// A downgrade was requested.
#[derive(Clone)]
pub struct DowngradeParams {
    pub subscription_id: Uuid,
    pub new_plan_code: String,
    pub new_interval: BillingInterval,
}

// ============================================================================
// Behavior Registry
// ============================================================================

/// The set of installed overrides. An unset slot runs the default
/// directly.
#[derive(Default)]
pub struct Behaviors {
    pub on_refund: Option<Arc<dyn Hook<RefundParams>>>,
    pub on_payment_failed: Option<Arc<dyn Hook<PaymentFailedParams>>>,
    pub on_subscription_cancel: Option<Arc<dyn Hook<CancelParams>>>,
    pub on_trial_end: Option<Arc<dyn Hook<TrialEndParams>>>,
    pub on_downgrade: Option<Arc<dyn Hook<DowngradeParams>>>,
}

impl Behaviors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_refund(mut self, hook: impl Hook<RefundParams> + 'static) -> Self {
        self.on_refund = Some(Arc::new(hook));
        self
    }

    pub fn with_on_payment_failed(mut self, hook: impl Hook<PaymentFailedParams> + 'static) -> Self {
        self.on_payment_failed = Some(Arc::new(hook));
        self
    }

    pub fn with_on_subscription_cancel(mut self, hook: impl Hook<CancelParams> + 'static) -> Self {
        self.on_subscription_cancel = Some(Arc::new(hook));
        self
    }

    pub fn with_on_trial_end(mut self, hook: impl Hook<TrialEndParams> + 'static) -> Self {
        self.on_trial_end = Some(Arc::new(hook));
        self
    }

    pub fn with_on_downgrade(mut self, hook: impl Hook<DowngradeParams> + 'static) -> Self {
        self.on_downgrade = Some(Arc::new(hook));
        self
    }

    pub async fn run_on_refund(&self, cx: Arc<EngineContext>, params: RefundParams) -> AppResult<()> {
        dispatch(self.on_refund.clone(), cx, params, defaults::on_refund).await
    }

    pub async fn run_on_payment_failed(
        &self,
        cx: Arc<EngineContext>,
        params: PaymentFailedParams,
    ) -> AppResult<()> {
        dispatch(
            self.on_payment_failed.clone(),
            cx,
            params,
            defaults::on_payment_failed,
        )
        .await
    }

    pub async fn run_on_subscription_cancel(
        &self,
        cx: Arc<EngineContext>,
        params: CancelParams,
    ) -> AppResult<()> {
        dispatch(
            self.on_subscription_cancel.clone(),
            cx,
            params,
            defaults::on_subscription_cancel,
        )
        .await
    }

    pub async fn run_on_trial_end(
        &self,
        cx: Arc<EngineContext>,
        params: TrialEndParams,
    ) -> AppResult<()> {
        dispatch(self.on_trial_end.clone(), cx, params, defaults::on_trial_end).await
    }

    pub async fn run_on_downgrade(
        &self,
        cx: Arc<EngineContext>,
        params: DowngradeParams,
    ) -> AppResult<()> {
        dispatch(self.on_downgrade.clone(), cx, params, defaults::on_downgrade).await
    }
}

/// Run `hook` with a continuation over `default`, or `default` alone
/// when no hook is installed.
async fn dispatch<P, F, Fut>(
    hook: Option<Arc<dyn Hook<P>>>,
    cx: Arc<EngineContext>,
    params: P,
    default: F,
) -> AppResult<()>
where
    P: Clone + Send + 'static,
    F: Fn(Arc<EngineContext>, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    match hook {
        Some(hook) => {
            let next_cx = cx.clone();
            let next_params = params.clone();
            let next: Next = Box::new(move || Box::pin(default(next_cx, next_params)));
            hook.run(cx, params, next).await
        }
        None => default(cx, params).await,
    }
}

// ============================================================================
// Default Behaviors
// ============================================================================

pub mod defaults {
    use super::*;

    /// Any refund cancels the linked subscription immediately. Hosts
    /// that want partial refunds to keep the subscription running
    /// install an `on_refund` override.
    pub async fn on_refund(cx: Arc<EngineContext>, params: RefundParams) -> AppResult<()> {
        let Some(subscription_id) = params.payment.subscription_id else {
            return Ok(());
        };
        let Some(mut sub) = cx.subscriptions.get_by_id(subscription_id).await? else {
            return Ok(());
        };
        if sub.status.is_terminal() {
            return Ok(());
        }

        let now = cx.clock.now(Some(sub.customer_id));
        let previous = sub.transition(SubscriptionStatus::Canceled, now)?;
        cx.subscriptions.save(&sub).await?;
        cx.events
            .create(
                &SubscriptionEvent::new(
                    sub.id,
                    "canceled_after_refund",
                    Some(previous),
                    Some(sub.status),
                    now,
                )
                .with_metadata(serde_json::json!({
                    "payment_id": params.payment.id,
                    "refund_amount_cents": params.refund_amount_cents,
                })),
            )
            .await?;

        tracing::debug!(
            subscription_id = %sub.id,
            payment_id = %params.payment.id,
            "Subscription canceled after refund"
        );
        Ok(())
    }

    /// Active subscriptions drop to past-due on a failed charge; the
    /// renewal processor retries them on subsequent runs.
    pub async fn on_payment_failed(
        cx: Arc<EngineContext>,
        params: PaymentFailedParams,
    ) -> AppResult<()> {
        let mut sub = cx
            .subscriptions
            .get_by_id(params.subscription_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;

        // Already past-due (a retry failed again) or terminal: nothing
        // further to transition.
        if sub.status != SubscriptionStatus::Active {
            return Ok(());
        }

        let now = cx.clock.now(Some(sub.customer_id));
        let previous = sub.transition(SubscriptionStatus::PastDue, now)?;
        cx.subscriptions.save(&sub).await?;
        cx.events
            .create(
                &SubscriptionEvent::new(
                    sub.id,
                    "payment_failed",
                    Some(previous),
                    Some(sub.status),
                    now,
                )
                .with_metadata(serde_json::json!({ "error": params.error })),
            )
            .await?;

        tracing::debug!(
            subscription_id = %sub.id,
            error = %params.error,
            "Subscription marked past due"
        );
        Ok(())
    }

    /// Immediate cancellation transitions now; period-end cancellation
    /// stamps `cancel_at` and lets the renewal processor finish the job.
    pub async fn on_subscription_cancel(
        cx: Arc<EngineContext>,
        params: CancelParams,
    ) -> AppResult<()> {
        let mut sub = cx
            .subscriptions
            .get_by_id(params.subscription_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;
        let now = cx.clock.now(Some(sub.customer_id));

        match params.cancel_at {
            CancelAt::Immediately => {
                let previous = sub.transition(SubscriptionStatus::Canceled, now)?;
                cx.subscriptions.save(&sub).await?;
                cx.events
                    .create(&SubscriptionEvent::new(
                        sub.id,
                        "canceled",
                        Some(previous),
                        Some(sub.status),
                        now,
                    ))
                    .await?;
            }
            CancelAt::PeriodEnd => {
                sub.cancel_at = Some(sub.current_period_end);
                sub.updated_at = now;
                cx.subscriptions.save(&sub).await?;
                cx.events
                    .create(
                        &SubscriptionEvent::new(
                            sub.id,
                            "cancellation_scheduled",
                            Some(sub.status),
                            Some(sub.status),
                            now,
                        )
                        .with_metadata(serde_json::json!({
                            "cancel_at": sub.cancel_at,
                        })),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// A lapsed trial converts to active with the period left ending at
    /// the trial boundary, so the next renewal run takes the first real
    /// charge.
    pub async fn on_trial_end(cx: Arc<EngineContext>, params: TrialEndParams) -> AppResult<()> {
        let mut sub = cx
            .subscriptions
            .get_by_id(params.subscription_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;
        if sub.status != SubscriptionStatus::Trialing {
            return Ok(());
        }
        let trial_end = sub
            .trial_end
            .ok_or(AppError::Internal("trialing subscription without trial_end".into()))?;

        let now = cx.clock.now(Some(sub.customer_id));
        let previous = sub.transition(SubscriptionStatus::Active, now)?;
        sub.current_period_start = sub.trial_start.unwrap_or(trial_end);
        sub.current_period_end = trial_end;
        cx.subscriptions.save(&sub).await?;
        cx.events
            .create(&SubscriptionEvent::new(
                sub.id,
                "trial_ended",
                Some(previous),
                Some(sub.status),
                now,
            ))
            .await?;

        tracing::debug!(subscription_id = %sub.id, "Trial converted to active");
        Ok(())
    }

    /// Downgrades never bill immediately: stamp the scheduled change and
    /// let the next renewal apply it.
    pub async fn on_downgrade(cx: Arc<EngineContext>, params: DowngradeParams) -> AppResult<()> {
        let mut sub = cx
            .subscriptions
            .get_by_id(params.subscription_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;
        let now = cx.clock.now(Some(sub.customer_id));

        sub.scheduled_plan_code = Some(params.new_plan_code.clone());
        sub.scheduled_interval = Some(params.new_interval);
        sub.updated_at = now;
        cx.subscriptions.save(&sub).await?;
        cx.events
            .create(
                &SubscriptionEvent::new(
                    sub.id,
                    "downgrade_scheduled",
                    Some(sub.status),
                    Some(sub.status),
                    now,
                )
                .with_metadata(serde_json::json!({
                    "new_plan_code": params.new_plan_code,
                    "new_interval": params.new_interval,
                })),
            )
            .await?;

        tracing::debug!(
            subscription_id = %sub.id,
            new_plan_code = %params.new_plan_code,
            "Downgrade scheduled for next renewal"
        );
        Ok(())
    }
}
