//! Quota period rollover and remaining-balance calculation
//!
//! These are pure functions: nothing here touches `last_checked`. Refreshing that
//! timestamp after a real usage check belongs to the caller.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cadence at which a key's usage resets
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QuotaPeriod {
    Daily,
    Weekly,
    #[default]
    Monthly,
    Yearly,
    Unlimited,
    /// Unrecognised value, preserved verbatim; never resets
    Other(String),
}

impl QuotaPeriod {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Unlimited => "unlimited",
            Self::Other(raw) => raw,
        }
    }

    /// Parse a user-supplied period, rejecting anything unrecognised
    pub fn parse_strict(input: &str) -> Option<Self> {
        match Self::from(input.trim().to_string()) {
            Self::Other(_) => None,
            period => Some(period),
        }
    }
}

impl From<String> for QuotaPeriod {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            "yearly" => Self::Yearly,
            "unlimited" => Self::Unlimited,
            _ => Self::Other(raw),
        }
    }
}

impl From<QuotaPeriod> for String {
    fn from(period: QuotaPeriod) -> Self {
        period.as_str().to_string()
    }
}

impl fmt::Display for QuotaPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Whether the period containing `last_checked` has rolled over as of now
pub fn period_elapsed(period: &QuotaPeriod, last_checked: DateTime<Utc>) -> bool {
    period_elapsed_at(period, last_checked, Utc::now())
}

/// Same as [`period_elapsed`] with an explicit clock
pub fn period_elapsed_at(period: &QuotaPeriod, last_checked: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match period {
        QuotaPeriod::Daily => now.date_naive() != last_checked.date_naive(),
        QuotaPeriod::Weekly => now.iso_week() != last_checked.iso_week(),
        QuotaPeriod::Monthly => now.year() != last_checked.year() || now.month() != last_checked.month(),
        QuotaPeriod::Yearly => now.year() != last_checked.year(),
        QuotaPeriod::Unlimited | QuotaPeriod::Other(_) => false,
    }
}

/// Remaining balance; a rolled-over period resets to the full limit
pub fn remaining(limit: f64, used: f64, period: &QuotaPeriod, last_checked: DateTime<Utc>) -> f64 {
    remaining_at(limit, used, period, last_checked, Utc::now())
}

/// Same as [`remaining`] with an explicit clock
pub fn remaining_at(
    limit: f64,
    used: f64,
    period: &QuotaPeriod,
    last_checked: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    if period_elapsed_at(period, last_checked, now) {
        return limit;
    }
    (limit - used).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Months, TimeZone};

    #[test]
    fn test_monthly_resets_after_a_month() {
        let now = Utc::now();
        let last = now.checked_sub_months(Months::new(1)).unwrap();
        assert_eq!(remaining(100.0, 40.0, &QuotaPeriod::Monthly, last), 100.0);
    }

    #[test]
    fn test_daily_same_day_subtracts() {
        let now = Utc::now();
        assert_eq!(remaining_at(100.0, 70.0, &QuotaPeriod::Daily, now, now), 30.0);
    }

    #[test]
    fn test_yearly_resets_after_a_year() {
        let last = Utc::now().checked_sub_months(Months::new(12)).unwrap();
        assert_eq!(remaining(100.0, 10.0, &QuotaPeriod::Yearly, last), 100.0);
    }

    #[test]
    fn test_overspent_clamps_to_zero() {
        let now = Utc::now();
        assert_eq!(remaining_at(50.0, 80.0, &QuotaPeriod::Monthly, now, now), 0.0);
    }

    #[test]
    fn test_unlimited_and_unknown_never_reset() {
        let last = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        assert!(!period_elapsed(&QuotaPeriod::Unlimited, last));
        assert!(!period_elapsed(&QuotaPeriod::Other("hourly".into()), last));
        assert_eq!(remaining(10.0, 4.0, &QuotaPeriod::Unlimited, last), 6.0);
    }

    #[test]
    fn test_weekly_uses_iso_weeks() {
        // Sunday 2024-01-07 and Monday 2024-01-08 straddle an ISO week boundary
        let sunday = Utc.with_ymd_and_hms(2024, 1, 7, 23, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2024, 1, 8, 1, 0, 0).unwrap();
        let saturday = Utc.with_ymd_and_hms(2024, 1, 13, 12, 0, 0).unwrap();
        assert!(period_elapsed_at(&QuotaPeriod::Weekly, sunday, monday));
        assert!(!period_elapsed_at(&QuotaPeriod::Weekly, monday, saturday));
    }

    #[test]
    fn test_period_string_round_trip() {
        let json = serde_json::to_string(&QuotaPeriod::Weekly).unwrap();
        assert_eq!(json, "\"weekly\"");
        let parsed: QuotaPeriod = serde_json::from_str("\"fortnightly\"").unwrap();
        assert_eq!(parsed, QuotaPeriod::Other("fortnightly".to_string()));
        assert_eq!(QuotaPeriod::parse_strict(" Daily "), Some(QuotaPeriod::Daily));
        assert_eq!(QuotaPeriod::parse_strict("hourly"), None);
    }
}
