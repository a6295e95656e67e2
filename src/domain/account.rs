use crate::domain::money::MinorUnits;
use crate::error::{LedgerError, Violation};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! uuid_id {
    ($t:ident, $name:literal) => {
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $t(pub ::uuid::Uuid);

        impl $t {
            /// Time-ordered (UUIDv7) identifier.
            pub fn new() -> Self {
                Self(::uuid::Uuid::now_v7())
            }

            pub fn nil() -> Self {
                Self(::uuid::Uuid::nil())
            }

            pub fn as_uuid(&self) -> &::uuid::Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::std::fmt::Display for $t {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<::uuid::Uuid> for $t {
            fn from(value: ::uuid::Uuid) -> Self {
                Self(value)
            }
        }

        impl ::std::str::FromStr for $t {
            type Err = $crate::error::LedgerError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                ::uuid::Uuid::parse_str(s).map(Self).map_err(|e| {
                    $crate::error::LedgerError::internal(format!("invalid {}: {}", $name, e))
                })
            }
        }
    };
}

pub(crate) use uuid_id;

uuid_id!(AccountId, "account id");
uuid_id!(UserId, "user id");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Gbp,
    Eur,
    Usd,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Gbp => "GBP",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Bank-owned book account (interest source, fees).
    Internal,
    /// Customer current account; the only interest-bearing type.
    Current,
    /// Mirror of an account held at another institution.
    External,
}

impl AccountType {
    /// Whether debits from this account type skip the sufficiency check on credit.
    pub fn is_unlimited_source(&self) -> bool {
        matches!(self, AccountType::External)
    }

    pub fn is_interest_bearing(&self) -> bool {
        matches!(self, AccountType::Current)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Admin,
    Customer,
}

/// An account as known to the ledger.
///
/// The balance is not part of the account; it is derived from transaction
/// history, see [`Balance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: UserId,
    pub owner_type: UserType,
    pub account_type: AccountType,
    pub currency: Currency,
    pub status: AccountStatus,
    pub number: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        owner: UserId,
        owner_type: UserType,
        account_type: AccountType,
        currency: Currency,
        number: impl Into<String>,
    ) -> Self {
        Self {
            id: AccountId::new(),
            owner,
            owner_type,
            account_type,
            currency,
            status: AccountStatus::Active,
            number: number.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: AccountId) -> Self {
        self.id = id;
        self
    }

    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether `next` may overwrite this stored account. The currency is fixed
    /// at creation.
    pub fn check_replacement(&self, next: &Account) -> Result<(), LedgerError> {
        if self.currency != next.currency {
            return Err(Violation::CurrencyChange {
                from: self.currency,
                to: next.currency,
            }
            .into());
        }
        Ok(())
    }

    /// Active, customer-owned, interest-bearing.
    pub fn accrues_interest(&self) -> bool {
        self.status == AccountStatus::Active
            && self.owner_type == UserType::Customer
            && self.account_type.is_interest_bearing()
    }
}

/// Read-only projection of an account's transaction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub account_id: AccountId,
    pub account_number: String,
    pub account_type: AccountType,
    pub currency: Currency,
    pub balance: MinorUnits,
}

impl Balance {
    pub fn of(account: &Account, balance: MinorUnits) -> Self {
        Self {
            account_id: account.id,
            account_number: account.number.clone(),
            account_type: account.account_type,
            currency: account.currency,
            balance,
        }
    }

    pub fn major(&self) -> Decimal {
        self.balance.to_major()
    }
}

/// Audit metadata for a status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub old_status: AccountStatus,
    pub new_status: AccountStatus,
}
