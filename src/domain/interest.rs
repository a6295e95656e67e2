use crate::domain::account::uuid_id;
use crate::domain::money::MinorUnits;
use crate::error::{LedgerError, Violation};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

uuid_id!(InterestRateId, "interest rate id");

/// Rates are stored in hundredths of a percent, so 10000 is 100%.
pub const RATE_SCALE: i128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        }
    }

    /// Five-field cron expression on which accrual runs.
    pub fn cron_expression(&self) -> &'static str {
        match self {
            Frequency::Hourly => "0 * * * *",
            Frequency::Daily => "0 0 * * *",
            Frequency::Weekly => "0 0 * * 0",
            Frequency::Monthly => "0 0 1 * *",
            Frequency::Yearly => "0 0 1 1 *",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Frequency::Hourly),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            other => Err(Violation::UnknownFrequency(other.to_string()).into()),
        }
    }
}

/// The single current interest rate of the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestRate {
    pub id: InterestRateId,
    /// Hundredths of a percent (500 = 5.00%).
    pub rate: i64,
    /// Kept as text so a bad persisted value surfaces when the scheduler starts.
    pub calculation_frequency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InterestRate {
    pub fn new(rate: i64, frequency: Frequency) -> Self {
        let now = Utc::now();
        Self {
            id: InterestRateId::new(),
            rate,
            calculation_frequency: frequency.as_str().to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Converts a percentage such as `5.25` into hundredths of a percent.
    pub fn scaled_from_percent(percent: Decimal) -> Result<i64, LedgerError> {
        percent
            .checked_mul(Decimal::ONE_HUNDRED)
            .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|v| v.to_i64())
            .ok_or_else(|| Violation::InvalidRate(percent).into())
    }

    pub fn frequency(&self) -> Result<Frequency, LedgerError> {
        self.calculation_frequency.parse()
    }

    /// Interest earned on `balance` for one period: `floor(balance * rate / 10000)`.
    pub fn accrual_on(&self, balance: MinorUnits) -> MinorUnits {
        let gain = (balance.value() as i128 * self.rate as i128).div_euclid(RATE_SCALE);
        MinorUnits(gain.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}
