//! Plan catalog configuration.
//!
//! The catalog is loaded once at engine construction and treated as
//! immutable after that. Plans are matched by `code`; prices by
//! `(code, interval)`.

use std::collections::HashSet;

use crate::app_error::{AppError, AppResult};
use crate::domain::entities::plan::{BillingInterval, Plan, Price};

#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    /// Build a catalog, rejecting configurations that would make plan
    /// lookups ambiguous.
    pub fn new(plans: Vec<Plan>) -> AppResult<Self> {
        let mut codes = HashSet::new();
        for plan in &plans {
            if plan.code.trim().is_empty() {
                return Err(AppError::InvalidInput("plan code must not be empty".into()));
            }
            if !codes.insert(plan.code.clone()) {
                return Err(AppError::InvalidInput(format!(
                    "duplicate plan code: {}",
                    plan.code
                )));
            }
            if plan.prices.is_empty() {
                return Err(AppError::InvalidInput(format!(
                    "plan {} has no prices",
                    plan.code
                )));
            }
            let mut intervals = HashSet::new();
            for price in &plan.prices {
                if !intervals.insert(price.interval) {
                    return Err(AppError::InvalidInput(format!(
                        "plan {} has more than one {} price",
                        plan.code, price.interval
                    )));
                }
                if price.amount_cents < 0 {
                    return Err(AppError::InvalidInput(format!(
                        "plan {} has a negative {} price",
                        plan.code, price.interval
                    )));
                }
            }
        }
        Ok(Self { plans })
    }

    pub fn from_json_str(json: &str) -> AppResult<Self> {
        let plans: Vec<Plan> = serde_json::from_str(json)
            .map_err(|e| AppError::InvalidInput(format!("invalid plan catalog json: {e}")))?;
        Self::new(plans)
    }

    pub fn plan(&self, code: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.code == code)
    }

    /// Plan and price for `(code, interval)`, or `None` if either side
    /// is missing.
    pub fn price(&self, code: &str, interval: BillingInterval) -> Option<(&Plan, &Price)> {
        let plan = self.plan(code)?;
        let price = plan.price_for(interval)?;
        Some((plan, price))
    }

    /// Plans listable on a pricing page.
    pub fn public_plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans.iter().filter(|p| p.public)
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }
}
