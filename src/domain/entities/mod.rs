pub mod customer;
pub mod payment;
pub mod payment_scenario;
pub mod plan;
pub mod subscription;
pub mod subscription_event;

pub use customer::Customer;
pub use payment::{Payment, PaymentKind, PaymentStatus};
pub use payment_scenario::PaymentScenario;
pub use plan::{BillingInterval, Plan, Price};
pub use subscription::{CancelAt, Subscription, SubscriptionStatus};
pub use subscription_event::SubscriptionEvent;
