//! Proration for mid-cycle plan changes.
//!
//! Computes the credit for unused time on the old plan, the charge for
//! the remainder of the period on the new plan, and the net amount due.
//! Rounding is applied per value, not on the net, so results are
//! reproducible independent of argument order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::app_error::{AppError, AppResult};
use crate::domain::entities::plan::Price;

/// Result of a proration calculation. All amounts in minor currency
/// units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proration {
    /// Unused value of the old plan.
    pub credit: i64,
    /// Prorated value of the new plan.
    pub charge: i64,
    /// `charge - credit`; positive means the customer owes money.
    pub net_amount: i64,
    pub days_remaining: i64,
    pub total_days: i64,
}

impl Proration {
    pub fn is_charge(&self) -> bool {
        self.net_amount > 0
    }

    pub fn is_credit(&self) -> bool {
        self.net_amount < 0
    }
}

/// Direction of a plan change. Interval rank is compared before price,
/// so a switch to a longer interval always classifies as an upgrade.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PlanChangeType {
    /// Billed immediately with proration; period resets to the change
    /// date.
    Upgrade,
    /// Scheduled for the next renewal; nothing is charged now.
    Downgrade,
}

/// Round-half-up division for non-negative operands.
fn round_div(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator / 2) / denominator
}

/// Prorate a plan change at `change_date` within `[period_start,
/// period_end)`.
pub fn prorate(
    old_amount_cents: i64,
    new_amount_cents: i64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    change_date: DateTime<Utc>,
) -> AppResult<Proration> {
    if period_end <= period_start {
        return Err(AppError::InvalidInput(
            "billing period end must be after its start".into(),
        ));
    }
    let total_days = (period_end - period_start).num_days();
    if total_days == 0 {
        return Err(AppError::InvalidInput(
            "billing period must span at least one day".into(),
        ));
    }
    let days_remaining = (period_end - change_date).num_days().clamp(0, total_days);

    let credit = round_div(old_amount_cents * days_remaining, total_days);
    let charge = round_div(new_amount_cents * days_remaining, total_days);

    Ok(Proration {
        credit,
        charge,
        net_amount: charge - credit,
        days_remaining,
        total_days,
    })
}

/// Classify a plan change. Interval rank wins; price breaks the tie.
/// Equal interval and equal price is treated as a downgrade (callers
/// reject identical prices before getting here).
pub fn classify_change(old: &Price, new: &Price) -> PlanChangeType {
    if new.interval.rank() != old.interval.rank() {
        return if new.interval.rank() > old.interval.rank() {
            PlanChangeType::Upgrade
        } else {
            PlanChangeType::Downgrade
        };
    }
    if new.amount_cents > old.amount_cents {
        PlanChangeType::Upgrade
    } else {
        PlanChangeType::Downgrade
    }
}
