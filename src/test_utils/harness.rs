use std::sync::Arc;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use crate::{
    adapters::persistence::memory::{
        InMemoryCustomerRepo, InMemoryPaymentRepo, InMemorySubscriptionEventRepo,
        InMemorySubscriptionRepo,
    },
    application::behaviors::Behaviors,
    application::ports::clock::SimulatedClock,
    application::ports::payment_provider::CheckoutUrls,
    application::use_cases::subscriptions::CreateSubscriptionInput,
    application::use_cases::BillingEngine,
    config::PlanCatalog,
    domain::entities::{
        payment_scenario::PaymentScenario,
        plan::{BillingInterval, Plan, Price},
        subscription::Subscription,
        Customer,
    },
    infra::dummy_payment_client::DummyPaymentClient,
};

/// A wired engine plus handles to every double behind it.
pub struct TestEngine {
    pub engine: BillingEngine,
    pub clock: Arc<SimulatedClock>,
    pub provider: Arc<DummyPaymentClient>,
    pub customers: Arc<InMemoryCustomerRepo>,
    pub subscriptions: Arc<InMemorySubscriptionRepo>,
    pub payments: Arc<InMemoryPaymentRepo>,
    pub events: Arc<InMemorySubscriptionEventRepo>,
}

impl TestEngine {
    pub async fn subscription(&self, id: Uuid) -> Subscription {
        self.subscriptions
            .get_by_id_sync(id)
            .expect("subscription should exist")
    }

    pub async fn customers_by_external(&self, external_id: &str) -> Customer {
        self.customers
            .customers
            .lock()
            .unwrap()
            .values()
            .find(|c| c.external_id == external_id)
            .cloned()
            .expect("customer should exist")
    }

    /// Pretend the provider already holds a card for this customer.
    pub async fn set_saved_payment_method(&self, customer_id: Uuid) {
        let mut customers = self.customers.customers.lock().unwrap();
        let customer = customers
            .get_mut(&customer_id)
            .expect("customer should exist");
        customer.provider_customer_id = Some(format!("dummy_cus_{customer_id}"));
    }
}

impl InMemorySubscriptionRepo {
    fn get_by_id_sync(&self, id: Uuid) -> Option<Subscription> {
        self.subscriptions.lock().unwrap().get(&id).cloned()
    }
}

fn price(amount_cents: i64, interval: BillingInterval, trial_days: Option<u32>) -> Price {
    Price {
        amount_cents,
        currency: "usd".into(),
        interval,
        trial_days,
    }
}

/// Catalog used across the test suite.
pub fn test_catalog() -> PlanCatalog {
    PlanCatalog::new(vec![
        Plan {
            code: "free".into(),
            name: "Free".into(),
            public: true,
            features: vec![],
            prices: vec![price(0, BillingInterval::Monthly, None)],
        },
        Plan {
            code: "basic".into(),
            name: "Basic".into(),
            public: true,
            features: vec!["api".into()],
            prices: vec![price(2000, BillingInterval::Monthly, None)],
        },
        Plan {
            code: "pro".into(),
            name: "Pro".into(),
            public: true,
            features: vec!["api".into(), "sso".into()],
            prices: vec![
                price(5000, BillingInterval::Monthly, None),
                price(13500, BillingInterval::Quarterly, None),
                price(50000, BillingInterval::Yearly, None),
            ],
        },
        Plan {
            code: "trial".into(),
            name: "Trial".into(),
            public: true,
            features: vec!["api".into()],
            prices: vec![price(1500, BillingInterval::Monthly, Some(14))],
        },
    ])
    .expect("test catalog should be valid")
}

pub fn checkout_urls() -> CheckoutUrls {
    CheckoutUrls {
        success_url: "https://app.example.test/billing/success".into(),
        cancel_url: "https://app.example.test/billing/cancel".into(),
    }
}

/// Install a log subscriber once; `RUST_LOG` controls test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn build(
    scenario: PaymentScenario,
    behaviors: Behaviors,
    customize: impl FnOnce(DummyPaymentClient) -> DummyPaymentClient,
) -> TestEngine {
    init_tracing();
    let clock = Arc::new(SimulatedClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    ));
    let provider = Arc::new(customize(DummyPaymentClient::new(scenario)));
    let customers = Arc::new(InMemoryCustomerRepo::new());
    let subscriptions = Arc::new(InMemorySubscriptionRepo::new());
    let payments = Arc::new(InMemoryPaymentRepo::new());
    let events = Arc::new(InMemorySubscriptionEventRepo::new());

    let engine = BillingEngine::new(
        customers.clone(),
        subscriptions.clone(),
        payments.clone(),
        events.clone(),
        provider.clone(),
        clock.clone(),
        test_catalog(),
        behaviors,
    );
    TestEngine {
        engine,
        clock,
        provider,
        customers,
        subscriptions,
        payments,
        events,
    }
}

pub fn test_engine(scenario: PaymentScenario) -> TestEngine {
    build(scenario, Behaviors::default(), |p| p)
}

pub fn test_engine_with(
    scenario: PaymentScenario,
    customize: impl FnOnce(DummyPaymentClient) -> DummyPaymentClient,
) -> TestEngine {
    build(scenario, Behaviors::default(), customize)
}

pub fn test_engine_full(scenario: PaymentScenario, behaviors: Behaviors) -> TestEngine {
    build(scenario, behaviors, |p| p)
}

/// Subscribe `user-1` to `plan` and return the stored subscription.
/// Panics if the plan does not activate synchronously.
pub async fn active_subscription(
    harness: &TestEngine,
    plan: &str,
    interval: BillingInterval,
) -> Subscription {
    let customer = harness
        .engine
        .ensure_customer("user-1", "user@example.com")
        .await
        .expect("customer");
    harness
        .engine
        .create_subscription(CreateSubscriptionInput {
            customer_id: customer.id,
            plan_code: plan.into(),
            interval,
            urls: checkout_urls(),
            metadata: serde_json::Value::Null,
        })
        .await
        .expect("subscription")
        .subscription()
        .clone()
}
