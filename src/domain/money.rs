use crate::error::{LedgerError, Violation};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Neg;

/// Number of minor units in one major unit (pence per pound, cents per dollar).
pub const MINOR_PER_MAJOR: i64 = 100;

/// A signed amount in the smallest currency denomination.
///
/// All arithmetic and comparisons on money happen in this type. Decimal major
/// units only exist at the edges, see [`MinorUnits::from_major`] and
/// [`MinorUnits::to_major`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MinorUnits(pub i64);

impl MinorUnits {
    pub const ZERO: Self = Self(0);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Converts a decimal major-unit amount with `round(amount * 100)`.
    ///
    /// Midpoints round away from zero, so `0.005` becomes `1`.
    pub fn from_major(amount: Decimal) -> Result<Self, LedgerError> {
        let scaled = amount
            .checked_mul(Decimal::from(MINOR_PER_MAJOR))
            .ok_or(Violation::AmountOutOfRange)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        scaled
            .to_i64()
            .map(Self)
            .ok_or_else(|| Violation::AmountOutOfRange.into())
    }

    pub fn to_major(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// `None` on overflow.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// `None` on overflow.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_major())
    }
}

impl Neg for MinorUnits {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

/// A strictly positive amount that can be moved between accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(MinorUnits);

impl Amount {
    pub fn new(value: MinorUnits) -> Result<Self, LedgerError> {
        if value.is_positive() {
            Ok(Self(value))
        } else {
            Err(Violation::NonPositiveAmount.into())
        }
    }

    pub fn from_major(amount: Decimal) -> Result<Self, LedgerError> {
        Self::new(MinorUnits::from_major(amount)?)
    }

    pub fn minor(&self) -> MinorUnits {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(MinorUnits(value))
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0.0
    }
}

impl From<Amount> for MinorUnits {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}
