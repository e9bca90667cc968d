pub mod memory;

pub use memory::{
    InMemoryCustomerRepo, InMemoryPaymentRepo, InMemorySubscriptionEventRepo,
    InMemorySubscriptionRepo,
};
