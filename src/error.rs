use crate::domain::account::Currency;
use thiserror::Error;

/// Message returned to callers in place of any internal failure detail.
pub const INTERNAL_ERROR_MESSAGE: &str = "failed to complete request. please try again later";

/// Business rule violations rejected by the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("cannot move funds between the same account")]
    SelfTransfer,
    #[error("cannot move {from} funds into a {to} account")]
    CurrencyMismatch { from: Currency, to: Currency },
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("account currency cannot change from {from} to {to}")]
    CurrencyChange { from: Currency, to: Currency },
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("amount is out of range")]
    AmountOutOfRange,
    #[error("unknown calculation frequency: {0}")]
    UnknownFrequency(String),
    #[error("interest rate {0} is not allowed")]
    InvalidRate(rust_decimal::Decimal),
}

impl Violation {
    /// Stable machine-readable code for the API layer.
    pub fn code(&self) -> &'static str {
        match self {
            Violation::SelfTransfer => "self_transfer",
            Violation::CurrencyMismatch { .. } => "currency_mismatch",
            Violation::InsufficientFunds => "insufficient_funds",
            Violation::CurrencyChange { .. } => "currency_change",
            Violation::NonPositiveAmount => "non_positive_amount",
            Violation::AmountOutOfRange => "amount_out_of_range",
            Violation::UnknownFrequency(_) => "unknown_frequency",
            Violation::InvalidRate(_) => "invalid_rate",
        }
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    InvalidOperation(#[from] Violation),
    #[error("{0}")]
    NotInitialized(String),
    #[error("internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl LedgerError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into().into())
    }

    /// Only store and queue failures are worth retrying; rule violations are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Internal(_))
    }

    /// Text that is safe to show to an end user.
    pub fn public_message(&self) -> String {
        match self {
            LedgerError::Internal(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(Box::new(err))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(Box::new(err))
    }
}

impl From<csv::Error> for LedgerError {
    fn from(err: csv::Error) -> Self {
        Self::Internal(Box::new(err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Internal(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
