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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CF_ACCOUNTS: &str = "accounts";
/// Committed position and posting sequence per account.
pub const CF_POSITIONS: &str = "positions";
/// Materialized balances.
pub const CF_BALANCES: &str = "balances";
/// Transactions keyed by a global big-endian posting counter.
pub const CF_TRANSACTIONS: &str = "transactions";
pub const CF_RATES: &str = "rates";
pub const CF_AUDIT: &str = "audit";
pub const CF_TASKS: &str = "tasks";
pub const CF_DEAD_TASKS: &str = "dead_tasks";
pub const CF_META: &str = "meta";

const COLUMN_FAMILIES: [&str; 9] = [
    CF_ACCOUNTS,
    CF_POSITIONS,
    CF_BALANCES,
    CF_TRANSACTIONS,
    CF_RATES,
    CF_AUDIT,
    CF_TASKS,
    CF_DEAD_TASKS,
    CF_META,
];

const CURRENT_RATE_KEY: &[u8] = b"current";
const POSTING_COUNTER_KEY: &[u8] = b"posting_counter";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct StoredPosition {
    committed: MinorUnits,
    sequence: u64,
}

/// A persistent ledger store on RocksDB, one column family per entity.
///
/// RocksDB has no conditional writes, so every read-check-write sequence
/// (postings, rate inserts) runs under `write_lock` and commits through a
/// single `WriteBatch`. This assumes one process owns the database, which
/// RocksDB enforces with its own file lock.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a database at `path`, creating any missing column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// A task queue persisted in the same database.
    pub fn task_queue(&self) -> RocksDBTaskQueue {
        RocksDBTaskQueue {
            db: self.db.clone(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        column_family(&self.db, name)
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        get_json(&self.db, cf, key)
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        scan(&self.db, cf)
    }

    fn position(&self, id: AccountId) -> Result<StoredPosition> {
        Ok(self
            .get_json(CF_POSITIONS, id.as_uuid().as_bytes())?
            .unwrap_or_default())
    }

    fn posting_counter(&self) -> Result<u64> {
        let raw = self.db.get_cf(self.cf(CF_META)?, POSTING_COUNTER_KEY)?;
        match raw {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| LedgerError::internal("corrupt posting counter"))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl AccountStore for RocksDBStore {
    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        self.get_json(CF_ACCOUNTS, id.as_uuid().as_bytes())
    }

    async fn account_by_currency(
        &self,
        owner: UserId,
        currency: Currency,
    ) -> Result<Option<Account>> {
        let accounts: Vec<Account> = self.scan(CF_ACCOUNTS)?;
        Ok(accounts
            .into_iter()
            .filter(|a| a.owner == owner && a.currency == currency)
            .min_by_key(|a| a.created_at))
    }

    async fn balance(&self, id: AccountId) -> Result<Option<Balance>> {
        let Some(account) = self.account(id).await? else {
            return Ok(None);
        };
        let amount: MinorUnits = self
            .get_json(CF_BALANCES, id.as_uuid().as_bytes())?
            .unwrap_or_default();
        Ok(Some(Balance::of(&account, amount)))
    }

    async fn recompute_balance(&self, id: AccountId) -> Result<()> {
        if self.account(id).await?.is_none() {
            return Err(LedgerError::not_found("account"));
        }
        let _guard = self.write_lock.lock().await;
        let transactions: Vec<Transaction> = self.scan(CF_TRANSACTIONS)?;
        let total = net_effect(&transactions, id)?;
        self.db.put_cf(
            self.cf(CF_BALANCES)?,
            id.as_uuid().as_bytes(),
            serde_json::to_vec(&total)?,
        )?;
        Ok(())
    }

    async fn interest_bearing_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .scan::<Account>(CF_ACCOUNTS)?
            .into_iter()
            .filter(|a| a.accrues_interest())
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }
}

#[async_trait]
impl AccountRegistry for RocksDBStore {
    async fn register_account(&self, account: Account) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = account.id.as_uuid().as_bytes().to_vec();
        if let Some(existing) = self.get_json::<Account>(CF_ACCOUNTS, &key)? {
            existing.check_replacement(&account)?;
        }
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_ACCOUNTS)?, &key, serde_json::to_vec(&account)?);
        if self
            .db
            .get_pinned_cf(self.cf(CF_POSITIONS)?, &key)?
            .is_none()
        {
            batch.put_cf(
                self.cf(CF_POSITIONS)?,
                &key,
                serde_json::to_vec(&StoredPosition::default())?,
            );
            batch.put_cf(
                self.cf(CF_BALANCES)?,
                &key,
                serde_json::to_vec(&MinorUnits::ZERO)?,
            );
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self.scan(CF_ACCOUNTS)?;
        accounts.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(accounts)
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn post(&self, tx: NewTransaction, funds: FundsCheck) -> Result<PostedTransaction> {
        let _guard = self.write_lock.lock().await;
        for id in [tx.from_account_id, tx.to_account_id] {
            if self.account(id).await?.is_none() {
                return Err(LedgerError::not_found("account"));
            }
        }

        let amount = tx.amount.minor();
        let from = self.position(tx.from_account_id)?;
        if funds == FundsCheck::Required && from.committed < amount {
            return Err(Violation::InsufficientFunds.into());
        }
        let to = self.position(tx.to_account_id)?;
        let from = StoredPosition {
            committed: from
                .committed
                .checked_sub(amount)
                .ok_or(Violation::AmountOutOfRange)?,
            sequence: from.sequence + 1,
        };
        let to = StoredPosition {
            committed: to
                .committed
                .checked_add(amount)
                .ok_or(Violation::AmountOutOfRange)?,
            sequence: to.sequence + 1,
        };

        let transaction = tx.into_transaction(Utc::now());
        let counter = self.posting_counter()? + 1;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_TRANSACTIONS)?,
            counter.to_be_bytes(),
            serde_json::to_vec(&transaction)?,
        );
        batch.put_cf(
            self.cf(CF_POSITIONS)?,
            transaction.from_account_id.as_uuid().as_bytes(),
            serde_json::to_vec(&from)?,
        );
        batch.put_cf(
            self.cf(CF_POSITIONS)?,
            transaction.to_account_id.as_uuid().as_bytes(),
            serde_json::to_vec(&to)?,
        );
        batch.put_cf(self.cf(CF_META)?, POSTING_COUNTER_KEY, counter.to_be_bytes());
        self.db.write(batch)?;

        Ok(PostedTransaction {
            transaction,
            from_sequence: from.sequence,
            to_sequence: to.sequence,
        })
    }

    async fn transactions_for(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        Ok(self
            .scan::<Transaction>(CF_TRANSACTIONS)?
            .into_iter()
            .filter(|tx| tx.touches(account_id))
            .collect())
    }
}

#[async_trait]
impl RateStore for RocksDBStore {
    async fn current_rate(&self) -> Result<Option<InterestRate>> {
        self.get_json(CF_RATES, CURRENT_RATE_KEY)
    }

    async fn insert_rate(&self, rate: InterestRate) -> Result<InterestRate> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.current_rate().await? {
            return Ok(existing);
        }
        self.db
            .put_cf(self.cf(CF_RATES)?, CURRENT_RATE_KEY, serde_json::to_vec(&rate)?)?;
        Ok(rate)
    }

    async fn update_rate(&self, rate: InterestRate) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match self.current_rate().await? {
            Some(current) if current.id == rate.id => {
                self.db.put_cf(
                    self.cf(CF_RATES)?,
                    CURRENT_RATE_KEY,
                    serde_json::to_vec(&rate)?,
                )?;
                Ok(())
            }
            _ => Err(LedgerError::not_found("interest rate")),
        }
    }
}

#[async_trait]
impl AuditStore for RocksDBStore {
    async fn save_audit_record(&self, record: AuditRecord) -> Result<()> {
        self.db.put_cf(
            self.cf(CF_AUDIT)?,
            record.id.as_uuid().as_bytes(),
            serde_json::to_vec(&record)?,
        )?;
        Ok(())
    }

    async fn audit_records_for(&self, account_id: AccountId) -> Result<Vec<AuditRecord>> {
        let mut records: Vec<AuditRecord> = self
            .scan::<AuditRecord>(CF_AUDIT)?
            .into_iter()
            .filter(|r| r.account_id == Some(account_id))
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

/// Durable task queue sharing the store's database.
///
/// Tasks stay in `tasks` until completed or dead-lettered. Which of them are
/// claimed is tracked in memory only, so after a restart every unfinished
/// task is delivered again.
#[derive(Clone)]
pub struct RocksDBTaskQueue {
    db: Arc<DB>,
    in_flight: Arc<Mutex<HashSet<TaskId>>>,
}

impl RocksDBTaskQueue {
    fn put_task(&self, task: &Task) -> Result<()> {
        self.db.put_cf(
            column_family(&self.db, CF_TASKS)?,
            task.id.as_uuid().as_bytes(),
            serde_json::to_vec(task)?,
        )?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RocksDBTaskQueue {
    async fn enqueue(&self, task: Task) -> Result<TaskInfo> {
        self.put_task(&task)?;
        Ok(task.info())
    }

    async fn claim(&self) -> Result<Option<Task>> {
        let now = Utc::now();
        let mut in_flight = self.in_flight.lock().await;
        let tasks: Vec<Task> = scan(&self.db, CF_TASKS)?;
        let next = tasks
            .into_iter()
            .find(|t| !in_flight.contains(&t.id) && t.is_ready(now));
        if let Some(task) = &next {
            in_flight.insert(task.id);
        }
        Ok(next)
    }

    async fn complete(&self, id: TaskId) -> Result<()> {
        let mut in_flight = self.in_flight.lock().await;
        self.db
            .delete_cf(column_family(&self.db, CF_TASKS)?, id.as_uuid().as_bytes())?;
        in_flight.remove(&id);
        Ok(())
    }

    async fn reschedule(&self, mut task: Task, not_before: DateTime<Utc>) -> Result<()> {
        let mut in_flight = self.in_flight.lock().await;
        task.not_before = not_before;
        self.put_task(&task)?;
        in_flight.remove(&task.id);
        Ok(())
    }

    async fn dead_letter(&self, task: Task) -> Result<()> {
        let mut in_flight = self.in_flight.lock().await;
        let key = task.id.as_uuid().as_bytes().to_vec();
        let mut batch = WriteBatch::default();
        batch.delete_cf(column_family(&self.db, CF_TASKS)?, &key);
        batch.put_cf(
            column_family(&self.db, CF_DEAD_TASKS)?,
            &key,
            serde_json::to_vec(&task)?,
        );
        self.db.write(batch)?;
        in_flight.remove(&task.id);
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<Task>> {
        scan(&self.db, CF_DEAD_TASKS)
    }

    async fn pending(&self) -> Result<usize> {
        Ok(scan::<Task>(&self.db, CF_TASKS)?.len())
    }
}

fn column_family<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| LedgerError::internal(format!("{name} column family not found")))
}

fn get_json<T: DeserializeOwned>(db: &DB, cf: &str, key: &[u8]) -> Result<Option<T>> {
    match db.get_cf(column_family(db, cf)?, key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Every value in a column family, in key order.
fn scan<T: DeserializeOwned>(db: &DB, cf: &str) -> Result<Vec<T>> {
    db.iterator_cf(column_family(db, cf)?, IteratorMode::Start)
        .map(|item| -> Result<T> {
            let (_key, value) = item?;
            Ok(serde_json::from_slice(&value)?)
        })
        .collect()
}
