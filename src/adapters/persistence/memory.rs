//! In-memory implementations of the storage ports. The default storage
//! for embedded use and the backing store for the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::repositories::{
        CustomerRepo, PaymentRepo, SubscriptionEventRepo, SubscriptionRepo,
    },
    domain::entities::{
        subscription::{Subscription, SubscriptionStatus},
        Customer, Payment, SubscriptionEvent,
    },
};

// ============================================================================
// InMemoryCustomerRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryCustomerRepo {
    pub customers: Mutex<HashMap<Uuid, Customer>>,
}

impl InMemoryCustomerRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CustomerRepo for InMemoryCustomerRepo {
    async fn create(&self, customer: &Customer) -> AppResult<()> {
        let mut customers = self.customers.lock().unwrap();
        if customers
            .values()
            .any(|c| c.external_id == customer.external_id)
        {
            return Err(AppError::Storage(format!(
                "customer with external id {} already exists",
                customer.external_id
            )));
        }
        customers.insert(customer.id, customer.clone());
        Ok(())
    }

    async fn save(&self, customer: &Customer) -> AppResult<()> {
        let mut customers = self.customers.lock().unwrap();
        if !customers.contains_key(&customer.id) {
            return Err(AppError::NotFound("customer"));
        }
        customers.insert(customer.id, customer.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Customer>> {
        Ok(self.customers.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_external_id(&self, external_id: &str) -> AppResult<Option<Customer>> {
        Ok(self
            .customers
            .lock()
            .unwrap()
            .values()
            .find(|c| c.external_id == external_id)
            .cloned())
    }
}

// ============================================================================
// InMemorySubscriptionRepo
// ============================================================================

#[derive(Default)]
pub struct InMemorySubscriptionRepo {
    pub subscriptions: Mutex<HashMap<Uuid, Subscription>>,
}

impl InMemorySubscriptionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

fn due_at(sub: &Subscription, now: DateTime<Utc>) -> bool {
    match sub.status {
        SubscriptionStatus::Active | SubscriptionStatus::PastDue => {
            sub.current_period_end <= now || sub.cancel_at.is_some_and(|at| at <= now)
        }
        SubscriptionStatus::Trialing => sub.trial_end.is_some_and(|t| t <= now),
        _ => false,
    }
}

#[async_trait]
impl SubscriptionRepo for InMemorySubscriptionRepo {
    async fn create(&self, subscription: &Subscription) -> AppResult<()> {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn save(&self, subscription: &Subscription) -> AppResult<()> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if !subscriptions.contains_key(&subscription.id) {
            return Err(AppError::NotFound("subscription"));
        }
        subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Subscription>> {
        Ok(self.subscriptions.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_session_id(&self, session_id: &str) -> AppResult<Option<Subscription>> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.provider_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn list_by_customer(&self, customer_id: Uuid) -> AppResult<Vec<Subscription>> {
        let mut subs: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.customer_id == customer_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.created_at);
        Ok(subs)
    }

    async fn get_counting_active(&self, customer_id: Uuid) -> AppResult<Option<Subscription>> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.customer_id == customer_id && s.status.counts_as_active())
            .cloned())
    }

    async fn list_counting_active(&self, customer_id: Uuid) -> AppResult<Vec<Subscription>> {
        let mut subs: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.customer_id == customer_id && s.status.counts_as_active())
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.created_at);
        Ok(subs)
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        customer_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> AppResult<Vec<Subscription>> {
        let mut due: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| customer_id.is_none_or(|c| s.customer_id == c))
            .filter(|s| due_at(s, now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.current_period_end);
        if let Some(limit) = limit {
            due.truncate(limit);
        }
        Ok(due)
    }
}

// ============================================================================
// InMemoryPaymentRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryPaymentRepo {
    pub payments: Mutex<HashMap<Uuid, Payment>>,
}

impl InMemoryPaymentRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepo for InMemoryPaymentRepo {
    async fn create(&self, payment: &Payment) -> AppResult<()> {
        self.payments
            .lock()
            .unwrap()
            .insert(payment.id, payment.clone());
        Ok(())
    }

    async fn save(&self, payment: &Payment) -> AppResult<()> {
        let mut payments = self.payments.lock().unwrap();
        if !payments.contains_key(&payment.id) {
            return Err(AppError::NotFound("payment"));
        }
        payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Payment>> {
        Ok(self.payments.lock().unwrap().get(&id).cloned())
    }

    async fn list_by_customer(&self, customer_id: Uuid) -> AppResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .payments
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.customer_id == customer_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn list_by_subscription(&self, subscription_id: Uuid) -> AppResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .payments
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.subscription_id == Some(subscription_id))
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }
}

// ============================================================================
// InMemorySubscriptionEventRepo
// ============================================================================

#[derive(Default)]
pub struct InMemorySubscriptionEventRepo {
    pub events: Mutex<Vec<SubscriptionEvent>>,
}

impl InMemorySubscriptionEventRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionEventRepo for InMemorySubscriptionEventRepo {
    async fn create(&self, event: &SubscriptionEvent) -> AppResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn list_by_subscription(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Vec<SubscriptionEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.subscription_id == subscription_id)
            .cloned()
            .collect())
    }
}
