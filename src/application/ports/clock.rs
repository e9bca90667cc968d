use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Time source for the engine. Every timestamp the engine writes or
/// compares goes through this port so renewals and trials can be
/// driven deterministically in tests and staging.
pub trait Clock: Send + Sync {
    /// Current time, optionally scoped to one customer. Per-customer
    /// offsets let a simulated clock fast-forward a single account
    /// without moving everyone else.
    fn now(&self, customer_id: Option<Uuid>) -> DateTime<Utc>;
}

/// Wall-clock time. Ignores the customer scope.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self, _customer_id: Option<Uuid>) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable clock with a global base time plus per-customer
/// overrides.
pub struct SimulatedClock {
    base: Mutex<DateTime<Utc>>,
    overrides: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl SimulatedClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base: Mutex::new(base),
            overrides: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.base.lock().unwrap() = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut base = self.base.lock().unwrap();
        *base += by;
    }

    pub fn set_for(&self, customer_id: Uuid, to: DateTime<Utc>) {
        self.overrides.lock().unwrap().insert(customer_id, to);
    }

    /// Advance one customer's clock from its current effective time.
    pub fn advance_for(&self, customer_id: Uuid, by: Duration) {
        let current = self.now(Some(customer_id));
        self.set_for(customer_id, current + by);
    }

    pub fn clear_override(&self, customer_id: Uuid) {
        self.overrides.lock().unwrap().remove(&customer_id);
    }
}

impl Clock for SimulatedClock {
    fn now(&self, customer_id: Option<Uuid>) -> DateTime<Utc> {
        if let Some(id) = customer_id {
            if let Some(t) = self.overrides.lock().unwrap().get(&id) {
                return *t;
            }
        }
        *self.base.lock().unwrap()
    }
}
