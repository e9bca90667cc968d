use thiserror::Error;

use crate::domain::entities::subscription::SubscriptionStatus;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Provider failure: {0}")]
    ProviderFailure(String),

    #[error("Payment adapter does not support {0}")]
    UnsupportedCapability(&'static str),

    #[error("Illegal subscription transition: {from} -> {to}")]
    InvalidTransition {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a retry on the next scheduled run can plausibly succeed.
    /// Provider failures are retried via the `past_due` path; everything
    /// else is a caller or configuration mistake.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::PaymentDeclined(_) | AppError::ProviderFailure(_)
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;
