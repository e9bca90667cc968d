pub mod clock;
pub mod payment_provider;
pub mod repositories;

pub use clock::{Clock, SimulatedClock, SystemClock};
pub use payment_provider::{
    ChargeOutcome, ChargeProvider, CheckoutUrls, ConfirmationProvider, PaymentOutcome,
    PaymentProvider, RefundOutcome, RefundProvider,
};
pub use repositories::{CustomerRepo, PaymentRepo, SubscriptionEventRepo, SubscriptionRepo};
