use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Payment scenario for the dummy provider.
/// Simulates different payment outcomes for testing purposes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[derive(Default)]
pub enum PaymentScenario {
    /// Payment succeeds immediately.
    #[default]
    Success,
    /// Card is declined.
    Decline,
    /// Card has insufficient funds.
    InsufficientFunds,
    /// A hosted checkout session is required; the payment stays pending
    /// until the session is confirmed.
    Checkout,
    /// Card is expired.
    ExpiredCard,
    /// Generic processing error.
    ProcessingError,
}

impl PaymentScenario {
    /// Human-readable description of the scenario
    pub fn description(&self) -> &'static str {
        match self {
            PaymentScenario::Success => "Payment succeeds immediately",
            PaymentScenario::Decline => "Card is declined",
            PaymentScenario::InsufficientFunds => "Card has insufficient funds",
            PaymentScenario::Checkout => "Requires hosted checkout confirmation",
            PaymentScenario::ExpiredCard => "Card is expired",
            PaymentScenario::ProcessingError => "Payment processing error",
        }
    }

    /// Whether this scenario results in a successful payment
    pub fn succeeds(&self) -> bool {
        matches!(self, PaymentScenario::Success)
    }

    /// Whether this scenario leaves the payment pending on a checkout
    /// session
    pub fn requires_checkout(&self) -> bool {
        matches!(self, PaymentScenario::Checkout)
    }

    /// Decline message surfaced for failing scenarios
    pub fn failure_message(&self) -> Option<&'static str> {
        match self {
            PaymentScenario::Decline => Some("Your card was declined."),
            PaymentScenario::InsufficientFunds => Some("Your card has insufficient funds."),
            PaymentScenario::ExpiredCard => Some("Your card has expired."),
            PaymentScenario::ProcessingError => {
                Some("An error occurred while processing your card.")
            }
            PaymentScenario::Success | PaymentScenario::Checkout => None,
        }
    }
}
