use crate::domain::account::{AccountId, Currency, UserId, uuid_id};
use crate::domain::money::{Amount, MinorUnits};
use crate::error::{Result, Violation};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

uuid_id!(TransactionId, "transaction id");

/// Lifecycle state of a posted transaction. Postings are final once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    #[default]
    Completed,
}

/// An immutable record of one money movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
    pub currency: Currency,
    pub narration: Option<String>,
    pub reference_number: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn major_amount(&self) -> Decimal {
        self.amount.minor().to_major()
    }

    /// Signed effect of this transaction on `account_id`.
    pub fn effect_on(&self, account_id: AccountId) -> MinorUnits {
        let amount = self.amount.minor();
        if account_id == self.from_account_id {
            -amount
        } else if account_id == self.to_account_id {
            amount
        } else {
            MinorUnits::ZERO
        }
    }

    pub fn touches(&self, account_id: AccountId) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }
}

/// Net effect of `transactions` on `account_id`; the balance derived from history.
pub fn net_effect<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
    account_id: AccountId,
) -> Result<MinorUnits> {
    transactions
        .into_iter()
        .try_fold(MinorUnits::ZERO, |acc, tx| acc.checked_add(tx.effect_on(account_id)))
        .ok_or_else(|| Violation::AmountOutOfRange.into())
}

/// A transaction that has been validated but not yet written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
    pub currency: Currency,
    pub narration: Option<String>,
    pub reference_number: String,
}

impl NewTransaction {
    /// Stamps an id, status and timestamps onto the posting.
    pub fn into_transaction(self, now: DateTime<Utc>) -> Transaction {
        Transaction {
            id: TransactionId::new(),
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
            currency: self.currency,
            narration: self.narration,
            reference_number: self.reference_number,
            status: TransactionStatus::Completed,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Whether the store must verify the source balance before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundsCheck {
    /// Reject unless `balance(from) >= amount` at the moment of writing.
    Required,
    /// The source is an unlimited account.
    Skip,
}

/// Result of a successful posting, with the per-account ledger positions it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedTransaction {
    pub transaction: Transaction,
    /// Posting sequence of the source account after this write.
    pub from_sequence: u64,
    /// Posting sequence of the destination account after this write.
    pub to_sequence: u64,
}

impl PostedTransaction {
    pub fn sequence_for(&self, account_id: AccountId) -> Option<u64> {
        if account_id == self.transaction.from_account_id {
            Some(self.from_sequence)
        } else if account_id == self.transaction.to_account_id {
            Some(self.to_sequence)
        } else {
            None
        }
    }
}

/// A money-movement request as received from the API layer, in major units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    #[serde(default)]
    pub narration: String,
    pub user_id: UserId,
}

impl TransferRequest {
    pub fn new(
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Decimal,
        narration: impl Into<String>,
        user_id: UserId,
    ) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            narration: narration.into(),
            user_id,
        }
    }

    /// The requested amount in minor units, rejected unless positive.
    pub fn amount_minor(&self) -> Result<Amount> {
        Amount::from_major(self.amount)
    }

    pub fn narration(&self) -> Option<String> {
        if self.narration.is_empty() {
            None
        } else {
            Some(self.narration.clone())
        }
    }
}

/// Source of transaction reference numbers.
pub trait ReferenceGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random, zero-padded eight digit reference numbers.
#[derive(Debug, Clone, Copy)]
pub struct RandomReference {
    upper: u32,
}

impl RandomReference {
    pub fn new(upper: u32) -> Self {
        Self { upper: upper.max(1) }
    }
}

impl Default for RandomReference {
    fn default() -> Self {
        Self::new(99_999_999)
    }
}

impl ReferenceGenerator for RandomReference {
    fn generate(&self) -> String {
        let value = rand::thread_rng().gen_range(0..self.upper);
        format!("{:08}", value)
    }
}
