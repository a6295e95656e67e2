use crate::domain::account::{Account, AccountId, Balance, Currency, UserId};
use crate::domain::audit::AuditRecord;
use crate::domain::interest::InterestRate;
use crate::domain::money::MinorUnits;
use crate::domain::ports::{
    AccountRegistry, AccountStore, AuditStore, RateStore, TaskQueue, TransactionStore,
};
use crate::domain::task::{Task, TaskId, TaskInfo};
use crate::domain::transaction::{
    FundsCheck, NewTransaction, PostedTransaction, Transaction, net_effect,
};
use crate::error::{LedgerError, Result, Violation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Committed ledger position of one account.
#[derive(Debug, Clone, Copy, Default)]
struct Position {
    committed: MinorUnits,
    sequence: u64,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    positions: HashMap<AccountId, Position>,
    /// Materialized balances, refreshed by `recompute_balance`.
    balances: HashMap<AccountId, MinorUnits>,
    transactions: Vec<Transaction>,
    rate: Option<InterestRate>,
    audit: Vec<AuditRecord>,
}

/// A thread-safe in-memory ledger store.
///
/// All state sits behind one `RwLock`; postings take the write lock for the
/// whole check-and-write, which is the store's serialization point.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account. Account lifecycle lives outside the ledger core;
    /// this is how callers and tests seed the store. Replacing an account
    /// keeps its ledger position but never its currency.
    pub async fn insert_account(&self, account: Account) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.accounts.get(&account.id) {
            existing.check_replacement(&account)?;
        }
        state.positions.entry(account.id).or_default();
        state.balances.entry(account.id).or_insert(MinorUnits::ZERO);
        state.accounts.insert(account.id, account);
        Ok(())
    }

    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }
}

#[async_trait]
impl AccountStore for InMemoryLedgerStore {
    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&id).cloned())
    }

    async fn account_by_currency(
        &self,
        owner: UserId,
        currency: Currency,
    ) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .filter(|a| a.owner == owner && a.currency == currency)
            .min_by_key(|a| a.created_at)
            .cloned())
    }

    async fn balance(&self, id: AccountId) -> Result<Option<Balance>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&id).map(|account| {
            let amount = state.balances.get(&id).copied().unwrap_or_default();
            Balance::of(account, amount)
        }))
    }

    async fn recompute_balance(&self, id: AccountId) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&id) {
            return Err(LedgerError::not_found("account"));
        }
        let total = net_effect(&state.transactions, id)?;
        state.balances.insert(id, total);
        Ok(())
    }

    async fn interest_bearing_accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.accrues_interest())
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }
}

#[async_trait]
impl AccountRegistry for InMemoryLedgerStore {
    async fn register_account(&self, account: Account) -> Result<()> {
        self.insert_account(account).await
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(accounts)
    }
}

#[async_trait]
impl TransactionStore for InMemoryLedgerStore {
    async fn post(&self, tx: NewTransaction, funds: FundsCheck) -> Result<PostedTransaction> {
        let mut state = self.state.write().await;
        for id in [tx.from_account_id, tx.to_account_id] {
            if !state.accounts.contains_key(&id) {
                return Err(LedgerError::not_found("account"));
            }
        }

        let amount = tx.amount.minor();
        let position = |id| state.positions.get(&id).copied().unwrap_or_default();
        let (from, to) = (position(tx.from_account_id), position(tx.to_account_id));
        if funds == FundsCheck::Required && from.committed < amount {
            return Err(Violation::InsufficientFunds.into());
        }

        // Both sides are computed before anything is written.
        let from = Position {
            committed: from
                .committed
                .checked_sub(amount)
                .ok_or(Violation::AmountOutOfRange)?,
            sequence: from.sequence + 1,
        };
        let to = Position {
            committed: to
                .committed
                .checked_add(amount)
                .ok_or(Violation::AmountOutOfRange)?,
            sequence: to.sequence + 1,
        };

        let transaction = tx.into_transaction(Utc::now());
        state.positions.insert(transaction.from_account_id, from);
        state.positions.insert(transaction.to_account_id, to);
        state.transactions.push(transaction.clone());

        Ok(PostedTransaction {
            transaction,
            from_sequence: from.sequence,
            to_sequence: to.sequence,
        })
    }

    async fn transactions_for(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.touches(account_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RateStore for InMemoryLedgerStore {
    async fn current_rate(&self) -> Result<Option<InterestRate>> {
        Ok(self.state.read().await.rate.clone())
    }

    async fn insert_rate(&self, rate: InterestRate) -> Result<InterestRate> {
        let mut state = self.state.write().await;
        if let Some(existing) = &state.rate {
            return Ok(existing.clone());
        }
        state.rate = Some(rate.clone());
        Ok(rate)
    }

    async fn update_rate(&self, rate: InterestRate) -> Result<()> {
        let mut state = self.state.write().await;
        match &state.rate {
            Some(current) if current.id == rate.id => {
                state.rate = Some(rate);
                Ok(())
            }
            _ => Err(LedgerError::not_found("interest rate")),
        }
    }
}

#[async_trait]
impl AuditStore for InMemoryLedgerStore {
    async fn save_audit_record(&self, record: AuditRecord) -> Result<()> {
        self.state.write().await.audit.push(record);
        Ok(())
    }

    async fn audit_records_for(&self, account_id: AccountId) -> Result<Vec<AuditRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<AuditRecord> = state
            .audit
            .iter()
            .filter(|r| r.account_id == Some(account_id))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<Task>,
    in_flight: HashMap<TaskId, Task>,
    dead: Vec<Task>,
}

/// Process-local task queue. Delivery is at-least-once for the process lifetime.
#[derive(Default, Clone)]
pub struct InMemoryTaskQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: Task) -> Result<TaskInfo> {
        let info = task.info();
        self.state.lock().await.waiting.push_back(task);
        Ok(info)
    }

    async fn claim(&self) -> Result<Option<Task>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let Some(index) = state.waiting.iter().position(|t| t.is_ready(now)) else {
            return Ok(None);
        };
        let task = state.waiting.remove(index);
        if let Some(task) = &task {
            state.in_flight.insert(task.id, task.clone());
        }
        Ok(task)
    }

    async fn complete(&self, id: TaskId) -> Result<()> {
        self.state.lock().await.in_flight.remove(&id);
        Ok(())
    }

    async fn reschedule(&self, mut task: Task, not_before: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&task.id);
        task.not_before = not_before;
        state.waiting.push_back(task);
        Ok(())
    }

    async fn dead_letter(&self, task: Task) -> Result<()> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&task.id);
        state.dead.push(task);
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<Task>> {
        Ok(self.state.lock().await.dead.clone())
    }

    async fn pending(&self) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.waiting.len() + state.in_flight.len())
    }
}
