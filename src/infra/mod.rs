pub mod dummy_payment_client;

pub use dummy_payment_client::DummyPaymentClient;
