//! Dummy payment provider.
//!
//! Simulates every provider operation locally, driven by a
//! [`PaymentScenario`]. Used as the default provider for embedded and
//! staging setups and as the provider double in the test suite. Records
//! every call so tests can assert on provider traffic, and exposes
//! builder switches to drop individual capabilities.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    app_error::AppResult,
    application::ports::payment_provider::{
        ChargeOutcome, ChargeProvider, CheckoutUrls, ConfirmationProvider, PaymentOutcome,
        PaymentProvider, RefundOutcome, RefundProvider,
    },
    domain::entities::{
        customer::Customer,
        payment_scenario::PaymentScenario,
        plan::{Plan, Price},
        subscription::Subscription,
    },
};

enum SessionState {
    Open { customer_id: Uuid },
    Completed { customer_id: Uuid },
    Failed { error: String },
}

pub struct DummyPaymentClient {
    scenario: Mutex<PaymentScenario>,
    charges_enabled: bool,
    refunds_enabled: bool,
    confirmations_enabled: bool,
    sessions: Mutex<HashMap<String, SessionState>>,
    process_payment_log: Mutex<Vec<Uuid>>,
    charge_log: Mutex<Vec<i64>>,
    refund_log: Mutex<Vec<(String, i64)>>,
}

impl DummyPaymentClient {
    pub fn new(scenario: PaymentScenario) -> Self {
        Self {
            scenario: Mutex::new(scenario),
            charges_enabled: true,
            refunds_enabled: true,
            confirmations_enabled: true,
            sessions: Mutex::new(HashMap::new()),
            process_payment_log: Mutex::new(Vec::new()),
            charge_log: Mutex::new(Vec::new()),
            refund_log: Mutex::new(Vec::new()),
        }
    }

    pub fn without_charges(mut self) -> Self {
        self.charges_enabled = false;
        self
    }

    pub fn without_refunds(mut self) -> Self {
        self.refunds_enabled = false;
        self
    }

    pub fn without_confirmations(mut self) -> Self {
        self.confirmations_enabled = false;
        self
    }

    /// Switch the outcome of subsequent calls.
    pub fn set_scenario(&self, scenario: PaymentScenario) {
        *self.scenario.lock().unwrap() = scenario;
    }

    pub fn process_payment_calls(&self) -> usize {
        self.process_payment_log.lock().unwrap().len()
    }

    pub fn charge_calls(&self) -> usize {
        self.charge_log.lock().unwrap().len()
    }

    pub fn charged_amounts(&self) -> Vec<i64> {
        self.charge_log.lock().unwrap().clone()
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_log.lock().unwrap().len()
    }

    /// Mark a hosted checkout session as paid.
    pub fn complete_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(SessionState::Open { customer_id }) = sessions.get(session_id) {
            let customer_id = *customer_id;
            sessions.insert(session_id.to_string(), SessionState::Completed { customer_id });
        }
    }

    /// Mark a hosted checkout session as failed.
    pub fn fail_session(&self, session_id: &str, error: &str) {
        self.sessions.lock().unwrap().insert(
            session_id.to_string(),
            SessionState::Failed {
                error: error.to_string(),
            },
        );
    }

    fn provider_customer_id(customer_id: Uuid) -> String {
        format!("dummy_cus_{customer_id}")
    }
}

#[async_trait]
impl PaymentProvider for DummyPaymentClient {
    async fn process_payment(
        &self,
        customer: &Customer,
        _plan: &Plan,
        _price: &Price,
        _subscription: &Subscription,
        _urls: &CheckoutUrls,
        _metadata: &Value,
    ) -> AppResult<PaymentOutcome> {
        self.process_payment_log.lock().unwrap().push(customer.id);
        let scenario = *self.scenario.lock().unwrap();

        if scenario.requires_checkout() {
            let session_id = format!("dummy_cs_{}", Uuid::new_v4());
            self.sessions.lock().unwrap().insert(
                session_id.clone(),
                SessionState::Open {
                    customer_id: customer.id,
                },
            );
            let redirect_url = format!("https://pay.example.test/checkout/{session_id}");
            return Ok(PaymentOutcome::Pending {
                session_id,
                redirect_url,
            });
        }
        if let Some(message) = scenario.failure_message() {
            return Ok(PaymentOutcome::Failed {
                error: message.to_string(),
            });
        }
        Ok(PaymentOutcome::Active {
            provider_customer_id: Self::provider_customer_id(customer.id),
            provider_subscription_id: Some(format!("dummy_sub_{}", Uuid::new_v4())),
            provider_payment_id: Some(format!("dummy_pi_{}", Uuid::new_v4())),
        })
    }

    fn charges(&self) -> Option<&dyn ChargeProvider> {
        self.charges_enabled.then_some(self as &dyn ChargeProvider)
    }

    fn refunds(&self) -> Option<&dyn RefundProvider> {
        self.refunds_enabled.then_some(self as &dyn RefundProvider)
    }

    fn confirmations(&self) -> Option<&dyn ConfirmationProvider> {
        self.confirmations_enabled
            .then_some(self as &dyn ConfirmationProvider)
    }
}

#[async_trait]
impl ChargeProvider for DummyPaymentClient {
    async fn charge(
        &self,
        _customer: &Customer,
        amount_cents: i64,
        _currency: &str,
        _description: &str,
        _metadata: &Value,
    ) -> AppResult<ChargeOutcome> {
        self.charge_log.lock().unwrap().push(amount_cents);
        let scenario = *self.scenario.lock().unwrap();
        if scenario.requires_checkout() {
            return Ok(ChargeOutcome::Failed {
                error: "Off-session charge requires customer action.".to_string(),
            });
        }
        match scenario.failure_message() {
            Some(message) => Ok(ChargeOutcome::Failed {
                error: message.to_string(),
            }),
            None => Ok(ChargeOutcome::Succeeded {
                provider_payment_id: format!("dummy_pi_{}", Uuid::new_v4()),
            }),
        }
    }
}

#[async_trait]
impl RefundProvider for DummyPaymentClient {
    async fn refund(
        &self,
        provider_payment_id: &str,
        amount_cents: Option<i64>,
        _reason: Option<&str>,
    ) -> AppResult<RefundOutcome> {
        self.refund_log
            .lock()
            .unwrap()
            .push((provider_payment_id.to_string(), amount_cents.unwrap_or(0)));
        let scenario = *self.scenario.lock().unwrap();
        match scenario.failure_message() {
            Some(message) => Ok(RefundOutcome::Failed {
                error: message.to_string(),
            }),
            None => Ok(RefundOutcome::Refunded {
                provider_refund_id: format!("dummy_re_{}", Uuid::new_v4()),
            }),
        }
    }
}

#[async_trait]
impl ConfirmationProvider for DummyPaymentClient {
    async fn confirm_payment(&self, session_id: &str) -> AppResult<Option<PaymentOutcome>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(match sessions.get(session_id) {
            None | Some(SessionState::Open { .. }) => None,
            Some(SessionState::Completed { customer_id }) => Some(PaymentOutcome::Active {
                provider_customer_id: Self::provider_customer_id(*customer_id),
                provider_subscription_id: Some(format!("dummy_sub_{}", Uuid::new_v4())),
                provider_payment_id: Some(format!("dummy_pi_{}", Uuid::new_v4())),
            }),
            Some(SessionState::Failed { error }) => Some(PaymentOutcome::Failed {
                error: error.clone(),
            }),
        })
    }
}
