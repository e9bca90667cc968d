//! Storage ports. Implementations persist full entities; the engine
//! reads, mutates in memory, and writes the whole row back.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    app_error::AppResult,
    domain::entities::{Customer, Payment, Subscription, SubscriptionEvent},
};

#[async_trait]
pub trait CustomerRepo: Send + Sync {
    async fn create(&self, customer: &Customer) -> AppResult<()>;
    async fn save(&self, customer: &Customer) -> AppResult<()>;
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Customer>>;
    /// Lookup by the host application's user id.
    async fn get_by_external_id(&self, external_id: &str) -> AppResult<Option<Customer>>;
}

#[async_trait]
pub trait SubscriptionRepo: Send + Sync {
    async fn create(&self, subscription: &Subscription) -> AppResult<()>;
    async fn save(&self, subscription: &Subscription) -> AppResult<()>;
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Subscription>>;
    /// Lookup by the provider checkout session that created it.
    async fn get_by_session_id(&self, session_id: &str) -> AppResult<Option<Subscription>>;
    async fn list_by_customer(&self, customer_id: Uuid) -> AppResult<Vec<Subscription>>;
    /// The customer's current non-terminal subscription, if any.
    async fn get_counting_active(&self, customer_id: Uuid) -> AppResult<Option<Subscription>>;
    /// Every non-terminal subscription for the customer. Normally zero
    /// or one; more than one means a raced activation that the next
    /// activation repairs by canceling the extras.
    async fn list_counting_active(&self, customer_id: Uuid) -> AppResult<Vec<Subscription>>;
    /// Subscriptions whose period has lapsed as of `now`, oldest period
    /// end first. `customer_id` narrows the scan; `limit` caps it.
    async fn list_due(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        customer_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> AppResult<Vec<Subscription>>;
}

#[async_trait]
pub trait PaymentRepo: Send + Sync {
    async fn create(&self, payment: &Payment) -> AppResult<()>;
    async fn save(&self, payment: &Payment) -> AppResult<()>;
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Payment>>;
    async fn list_by_customer(&self, customer_id: Uuid) -> AppResult<Vec<Payment>>;
    async fn list_by_subscription(&self, subscription_id: Uuid) -> AppResult<Vec<Payment>>;
}

#[async_trait]
pub trait SubscriptionEventRepo: Send + Sync {
    async fn create(&self, event: &SubscriptionEvent) -> AppResult<()>;
    async fn list_by_subscription(&self, subscription_id: Uuid)
    -> AppResult<Vec<SubscriptionEvent>>;
}
