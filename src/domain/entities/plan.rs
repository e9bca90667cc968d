use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use chrono::{DateTime, Duration, Months, Utc};

/// Billing interval for a price. Ordered by length: a switch to a
/// longer interval always counts as an upgrade regardless of price.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BillingInterval {
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingInterval {
    /// Number of calendar months covered by one period.
    pub fn months(&self) -> u32 {
        match self {
            BillingInterval::Monthly => 1,
            BillingInterval::Quarterly => 3,
            BillingInterval::Yearly => 12,
        }
    }

    /// Rank used for upgrade/downgrade classification
    /// (`monthly < quarterly < yearly`).
    pub fn rank(&self) -> u8 {
        match self {
            BillingInterval::Monthly => 0,
            BillingInterval::Quarterly => 1,
            BillingInterval::Yearly => 2,
        }
    }

    /// End of a billing period starting at `start`. Calendar arithmetic,
    /// clamped by chrono when the target day does not exist (Jan 31 + 1
    /// month = Feb 28/29).
    pub fn period_end_from(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_months(Months::new(self.months()))
            // Only reachable at the far end of representable time.
            .unwrap_or(start + Duration::days(30 * self.months() as i64))
    }
}

/// A concrete price point for a plan: amount, currency, interval and an
/// optional trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    pub amount_cents: i64,
    pub currency: String,
    pub interval: BillingInterval,
    #[serde(default)]
    pub trial_days: Option<u32>,
}

impl Price {
    pub fn is_free(&self) -> bool {
        self.amount_cents == 0
    }

    pub fn has_trial(&self) -> bool {
        self.trial_days.is_some_and(|d| d > 0)
    }
}

/// Static plan configuration. Loaded once at startup, looked up by code,
/// never mutated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub features: Vec<String>,
    pub prices: Vec<Price>,
}

impl Plan {
    pub fn price_for(&self, interval: BillingInterval) -> Option<&Price> {
        self.prices.iter().find(|p| p.interval == interval)
    }

    pub fn has_feature(&self, code: &str) -> bool {
        self.features.iter().any(|f| f == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_interval_rank_ordering() {
        assert!(BillingInterval::Monthly.rank() < BillingInterval::Quarterly.rank());
        assert!(BillingInterval::Quarterly.rank() < BillingInterval::Yearly.rank());
    }

    #[test]
    fn test_period_end_calendar_months() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(
            BillingInterval::Monthly.period_end_from(start),
            Utc.with_ymd_and_hms(2024, 2, 15, 12, 0, 0).unwrap()
        );
        assert_eq!(
            BillingInterval::Quarterly.period_end_from(start),
            Utc.with_ymd_and_hms(2024, 4, 15, 12, 0, 0).unwrap()
        );
        assert_eq!(
            BillingInterval::Yearly.period_end_from(start),
            Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_period_end_clamps_short_months() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            BillingInterval::Monthly.period_end_from(start),
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_from_str_case_insensitive() {
        assert_eq!(
            "MONTHLY".parse::<BillingInterval>().unwrap(),
            BillingInterval::Monthly
        );
        assert_eq!(
            "yearly".parse::<BillingInterval>().unwrap(),
            BillingInterval::Yearly
        );
        assert!("weekly".parse::<BillingInterval>().is_err());
    }

    #[test]
    fn test_price_for_interval() {
        let plan = Plan {
            code: "pro".into(),
            name: "Pro".into(),
            public: true,
            features: vec!["api".into()],
            prices: vec![
                Price {
                    amount_cents: 2000,
                    currency: "usd".into(),
                    interval: BillingInterval::Monthly,
                    trial_days: None,
                },
                Price {
                    amount_cents: 20000,
                    currency: "usd".into(),
                    interval: BillingInterval::Yearly,
                    trial_days: Some(14),
                },
            ],
        };
        assert_eq!(
            plan.price_for(BillingInterval::Monthly).unwrap().amount_cents,
            2000
        );
        assert!(plan.price_for(BillingInterval::Quarterly).is_none());
        assert!(plan.price_for(BillingInterval::Yearly).unwrap().has_trial());
        assert!(plan.has_feature("api"));
        assert!(!plan.has_feature("sso"));
    }
}
