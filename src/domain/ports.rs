//! Interfaces the ledger core consumes. Adapters live in `infrastructure`.

use super::account::{Account, AccountId, Balance, Currency, UserId};
use super::audit::{AuditEvent, AuditRecord};
use super::interest::InterestRate;
use super::task::{Task, TaskId, TaskInfo};
use super::transaction::{FundsCheck, NewTransaction, PostedTransaction, Transaction};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn account(&self, id: AccountId) -> Result<Option<Account>>;
    /// An account owned by `owner` in `currency`, if there is one.
    async fn account_by_currency(
        &self,
        owner: UserId,
        currency: Currency,
    ) -> Result<Option<Account>>;
    /// Materialized balance; `None` if the account does not exist.
    async fn balance(&self, id: AccountId) -> Result<Option<Balance>>;
    /// Rebuilds the materialized balance from transaction history.
    async fn recompute_balance(&self, id: AccountId) -> Result<()>;
    /// Active, customer-owned current accounts.
    async fn interest_bearing_accounts(&self) -> Result<Vec<Account>>;
}

/// Seeding and enumeration of accounts. Account lifecycle is owned elsewhere;
/// this is the hand-off point into the ledger.
#[async_trait]
pub trait AccountRegistry: Send + Sync {
    /// Adds or replaces an account. Existing ledger positions are kept; a
    /// replacement in another currency is rejected with `CurrencyChange`.
    async fn register_account(&self, account: Account) -> Result<()>;
    /// All accounts, ordered by account number.
    async fn all_accounts(&self) -> Result<Vec<Account>>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Writes a transaction atomically.
    ///
    /// With [`FundsCheck::Required`] the store rejects the posting with
    /// `InsufficientFunds` unless the committed position of the source account
    /// covers the amount. Check and write happen under one lock or statement,
    /// so concurrent postings cannot both pass against the same balance.
    async fn post(&self, tx: NewTransaction, funds: FundsCheck) -> Result<PostedTransaction>;
    /// Transactions touching `account_id`, oldest first.
    async fn transactions_for(&self, account_id: AccountId) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait RateStore: Send + Sync {
    async fn current_rate(&self) -> Result<Option<InterestRate>>;
    async fn insert_rate(&self, rate: InterestRate) -> Result<InterestRate>;
    async fn update_rate(&self, rate: InterestRate) -> Result<()>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn save_audit_record(&self, record: AuditRecord) -> Result<()>;
    /// Records scoped to `account_id`, oldest first.
    async fn audit_records_for(&self, account_id: AccountId) -> Result<Vec<AuditRecord>>;
}

/// Durable, at-least-once task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task) -> Result<TaskInfo>;
    /// Hands out the next ready task. A claimed task is redelivered if it is
    /// neither completed nor rescheduled, e.g. after a crash.
    async fn claim(&self) -> Result<Option<Task>>;
    async fn complete(&self, id: TaskId) -> Result<()>;
    async fn reschedule(&self, task: Task, not_before: DateTime<Utc>) -> Result<()>;
    async fn dead_letter(&self, task: Task) -> Result<()>;
    async fn dead_letters(&self) -> Result<Vec<Task>>;
    /// Tasks waiting or in flight.
    async fn pending(&self) -> Result<usize>;
}

/// Sink for audit events raised by ledger operations.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Hands the event off for persistence. Fails only if hand-off fails.
    async fn submit(&self, event: AuditEvent) -> Result<TaskInfo>;
}

/// Reinstalls the recurring accrual job with the current configuration.
#[async_trait]
pub trait Rescheduler: Send + Sync {
    async fn reschedule(&self) -> Result<()>;
}

pub type AccountStoreRef = Arc<dyn AccountStore>;
pub type TransactionStoreRef = Arc<dyn TransactionStore>;
pub type RateStoreRef = Arc<dyn RateStore>;
pub type AuditStoreRef = Arc<dyn AuditStore>;
pub type TaskQueueRef = Arc<dyn TaskQueue>;
pub type AuditSinkRef = Arc<dyn AuditSink>;
pub type ReschedulerRef = Arc<dyn Rescheduler>;

/// Every store port, for adapters that provide all of them.
pub trait LedgerStore:
    AccountStore + AccountRegistry + TransactionStore + RateStore + AuditStore
{
}

impl<T> LedgerStore for T where
    T: AccountStore + AccountRegistry + TransactionStore + RateStore + AuditStore
{
}
