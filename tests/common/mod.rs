#![allow(dead_code)]

use async_trait::async_trait;
use ledger_core::application::audit::{AuditProcessor, AuditService, AuditWorker, WorkerConfig};
use ledger_core::application::engine::TransactionEngine;
use ledger_core::domain::account::{
    Account, AccountId, AccountType, Balance, Currency, UserId, UserType,
};
use ledger_core::domain::money::MinorUnits;
use ledger_core::domain::ports::AccountStore;
use ledger_core::domain::task::RetryPolicy;
use ledger_core::domain::transaction::TransferRequest;
use ledger_core::error::{LedgerError, Result};
use ledger_core::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryTaskQueue};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// An in-memory ledger wired the way the binary wires it.
pub struct Ledger {
    pub store: InMemoryLedgerStore,
    pub queue: InMemoryTaskQueue,
    pub audit: Arc<AuditService>,
    pub engine: TransactionEngine,
    numbers: AtomicU32,
}

impl Ledger {
    pub fn new() -> Self {
        let store = InMemoryLedgerStore::new();
        let queue = InMemoryTaskQueue::new();
        let shared = Arc::new(store.clone());
        let audit = Arc::new(AuditService::new(Arc::new(queue.clone()), shared.clone()));
        let engine = TransactionEngine::new(shared.clone(), shared, audit.clone());
        Self {
            store,
            queue,
            audit,
            engine,
            numbers: AtomicU32::new(10_000_000),
        }
    }

    pub async fn open(
        &self,
        owner_type: UserType,
        account_type: AccountType,
        currency: Currency,
    ) -> Account {
        let number = self.numbers.fetch_add(1, Ordering::SeqCst).to_string();
        let account = Account::new(UserId::new(), owner_type, account_type, currency, number);
        self.store.insert_account(account.clone()).await.unwrap();
        account
    }

    pub async fn external(&self, currency: Currency) -> Account {
        self.open(UserType::Admin, AccountType::External, currency)
            .await
    }

    pub async fn customer(&self, currency: Currency) -> Account {
        self.open(UserType::Customer, AccountType::Current, currency)
            .await
    }

    /// Credits `amount` (major units) from `source` into `target`.
    pub async fn fund(&self, source: &Account, target: &Account, amount: Decimal) {
        self.engine
            .credit(TransferRequest::new(
                source.id,
                target.id,
                amount,
                "funding",
                UserId::nil(),
            ))
            .await
            .expect("funding failed");
    }

    pub async fn balance(&self, account: &Account) -> MinorUnits {
        self.engine.balance(account.id).await.unwrap().balance
    }

    pub fn worker(&self) -> AuditWorker {
        AuditWorker::new(
            Arc::new(self.queue.clone()),
            AuditProcessor::new(Arc::new(self.store.clone())),
            fast_worker_config(),
        )
    }
}

pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 4,
        poll_interval: Duration::from_millis(5),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    }
}

/// Account store wrapper that fails or fakes balance lookups for chosen accounts.
#[derive(Clone)]
pub struct FlakyAccountStore {
    inner: InMemoryLedgerStore,
    failing: Arc<RwLock<HashSet<AccountId>>>,
    forced: Arc<RwLock<HashMap<AccountId, MinorUnits>>>,
}

impl FlakyAccountStore {
    pub fn new(inner: InMemoryLedgerStore) -> Self {
        Self {
            inner,
            failing: Arc::default(),
            forced: Arc::default(),
        }
    }

    pub async fn fail_balance_of(&self, id: AccountId) {
        self.failing.write().await.insert(id);
    }

    pub async fn force_balance(&self, id: AccountId, balance: MinorUnits) {
        self.forced.write().await.insert(id, balance);
    }
}

#[async_trait]
impl AccountStore for FlakyAccountStore {
    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        self.inner.account(id).await
    }

    async fn account_by_currency(
        &self,
        owner: UserId,
        currency: Currency,
    ) -> Result<Option<Account>> {
        self.inner.account_by_currency(owner, currency).await
    }

    async fn balance(&self, id: AccountId) -> Result<Option<Balance>> {
        if self.failing.read().await.contains(&id) {
            return Err(LedgerError::internal("connection reset"));
        }
        let balance = self.inner.balance(id).await?;
        let forced = self.forced.read().await.get(&id).copied();
        Ok(match (balance, forced) {
            (Some(mut balance), Some(amount)) => {
                balance.balance = amount;
                Some(balance)
            }
            (balance, _) => balance,
        })
    }

    async fn recompute_balance(&self, id: AccountId) -> Result<()> {
        self.inner.recompute_balance(id).await
    }

    async fn interest_bearing_accounts(&self) -> Result<Vec<Account>> {
        self.inner.interest_bearing_accounts().await
    }
}

/// Writes `rows` credits of 0.01 from the fixture bank account into account A.
pub fn generate_postings(path: &std::path::Path, rows: usize) -> std::io::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["op", "from", "to", "amount", "narration", "user"])?;
    for i in 1..=rows {
        wtr.write_record([
            "credit",
            "00000000-1111-1111-1111-000000000000",
            "0190a5b4-0000-7000-8000-00000000000a",
            "0.01",
            &format!("posting {i}"),
            "",
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
