//! Subscription billing engine.
//!
//! Customers, plans, subscriptions and a payment ledger, driven through
//! injected storage, payment provider and clock ports. Checkout,
//! renewal, proration, refunds and trial conversion are built in;
//! lifecycle behaviors can be overridden per deployment via
//! [`application::behaviors::Behaviors`].

pub mod adapters;
pub mod app_error;
pub mod application;
pub mod config;
pub mod domain;
pub mod infra;

#[cfg(test)]
pub mod test_utils;

// Re-exports for shorter use statements.
pub use app_error::{AppError, AppResult};
pub use application::behaviors::Behaviors;
pub use application::ports::*;
pub use application::use_cases::BillingEngine;
pub use config::PlanCatalog;
pub use domain::entities::*;
pub use domain::proration::{prorate, PlanChangeType, Proration};
