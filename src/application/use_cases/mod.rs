pub mod lifecycle;
pub mod refunds;
pub mod renewals;
pub mod subscriptions;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    app_error::AppResult,
    application::behaviors::Behaviors,
    application::ports::{
        clock::Clock,
        payment_provider::PaymentProvider,
        repositories::{CustomerRepo, PaymentRepo, SubscriptionEventRepo, SubscriptionRepo},
    },
    config::PlanCatalog,
    domain::entities::{
        subscription::{Subscription, SubscriptionStatus},
        subscription_event::SubscriptionEvent,
    },
};

pub use renewals::{RenewalDetail, RenewalOutcome, RenewalRequest, RenewalSummary};
pub use subscriptions::{CancelOutcome, CreateSubscriptionOutcome, PlanChangeResult};

/// Shared dependencies handed to every use case and behavior hook.
pub struct EngineContext {
    pub customers: Arc<dyn CustomerRepo>,
    pub subscriptions: Arc<dyn SubscriptionRepo>,
    pub payments: Arc<dyn PaymentRepo>,
    pub events: Arc<dyn SubscriptionEventRepo>,
    pub provider: Arc<dyn PaymentProvider>,
    pub clock: Arc<dyn Clock>,
    pub catalog: Arc<PlanCatalog>,
}

impl EngineContext {
    /// Append an audit row for a status transition.
    pub(crate) async fn record_transition(
        &self,
        sub: &Subscription,
        event_type: &str,
        previous: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.events
            .create(&SubscriptionEvent::new(
                sub.id,
                event_type,
                Some(previous),
                Some(sub.status),
                now,
            ))
            .await
    }
}

/// The billing engine: all lifecycle operations hang off this.
pub struct BillingEngine {
    pub(crate) cx: Arc<EngineContext>,
    pub(crate) behaviors: Arc<Behaviors>,
}

impl BillingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        customers: Arc<dyn CustomerRepo>,
        subscriptions: Arc<dyn SubscriptionRepo>,
        payments: Arc<dyn PaymentRepo>,
        events: Arc<dyn SubscriptionEventRepo>,
        provider: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
        catalog: PlanCatalog,
        behaviors: Behaviors,
    ) -> Self {
        Self {
            cx: Arc::new(EngineContext {
                customers,
                subscriptions,
                payments,
                events,
                provider,
                clock,
                catalog: Arc::new(catalog),
            }),
            behaviors: Arc::new(behaviors),
        }
    }

    pub fn context(&self) -> Arc<EngineContext> {
        self.cx.clone()
    }
}
