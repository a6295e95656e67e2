use crate::application::cron::{CronSchedule, JobScheduler, job_task};
use crate::application::engine::TransactionEngine;
use crate::application::rates::load_current_rate;
use crate::domain::account::{Account, AccountId, UserId};
use crate::domain::money::MinorUnits;
use crate::domain::ports::{AccountStoreRef, RateStoreRef, Rescheduler};
use crate::domain::transaction::TransferRequest;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Name of the single recurring accrual job.
pub const ACCRUAL_JOB: &str = "interest-rate-application";

/// Outcome of one accrual run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccrualReport {
    pub credited: usize,
    /// Zero or negative balances, or interest that floors to nothing.
    pub skipped: usize,
    pub failed: usize,
    pub total: MinorUnits,
}

/// Periodically credits interest to every interest-bearing account.
#[derive(Clone)]
pub struct InterestScheduler {
    rates: RateStoreRef,
    accounts: AccountStoreRef,
    engine: TransactionEngine,
    jobs: JobScheduler,
    source_account: AccountId,
    system_user: UserId,
}

impl InterestScheduler {
    pub fn new(
        rates: RateStoreRef,
        accounts: AccountStoreRef,
        engine: TransactionEngine,
        source_account: AccountId,
        system_user: UserId,
    ) -> Self {
        Self {
            rates,
            accounts,
            engine,
            jobs: JobScheduler::new(),
            source_account,
            system_user,
        }
    }

    pub fn jobs(&self) -> &JobScheduler {
        &self.jobs
    }

    /// Installs the accrual job and blocks until `cancel` fires, then shuts
    /// the scheduler down. Fails before scheduling anything if no rate exists
    /// or its frequency is not recognised.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        self.install().await?;
        cancel.cancelled().await;
        info!("shutting down interest scheduler");
        self.jobs.shutdown().await;
        Ok(())
    }

    async fn install(&self) -> Result<()> {
        let rate = load_current_rate(self.rates.as_ref()).await?;
        let frequency = rate.frequency()?;
        let schedule: CronSchedule = frequency.cron_expression().parse()?;

        let scheduler = self.clone();
        let task = job_task(move || {
            let scheduler = scheduler.clone();
            async move {
                if let Err(e) = scheduler.apply_rates().await {
                    error!(error = %e, "interest accrual run failed");
                }
            }
        });
        self.jobs.install(ACCRUAL_JOB, schedule, task).await?;
        info!(%frequency, "interest rate job queued");
        Ok(())
    }

    /// Runs one accrual pass over all interest-bearing accounts.
    ///
    /// The rate is read fresh on every run. A failure on one account is logged
    /// and the run moves on to the next.
    #[instrument(skip(self))]
    pub async fn apply_rates(&self) -> Result<AccrualReport> {
        let rate = load_current_rate(self.rates.as_ref()).await?;
        let source = self
            .accounts
            .account(self.source_account)
            .await?
            .ok_or_else(|| LedgerError::not_found("interest source account"))?;
        let accounts = self
            .accounts
            .interest_bearing_accounts()
            .await
            .inspect_err(|e| error!(error = %e, "failed to get interest-bearing accounts"))?;

        let narration = format!("Interest gained on {}", Utc::now().date_naive());
        let mut report = AccrualReport::default();

        for account in accounts {
            let balance = match self.accounts.balance(account.id).await {
                Ok(Some(balance)) => balance.balance,
                Ok(None) => {
                    warn!(account_id = %account.id, "account vanished during accrual");
                    report.failed += 1;
                    continue;
                }
                Err(e) => {
                    error!(account_id = %account.id, error = %e, "failed to get account balance");
                    report.failed += 1;
                    continue;
                }
            };
            if !balance.is_positive() {
                report.skipped += 1;
                continue;
            }
            let gain = rate.accrual_on(balance);
            if !gain.is_positive() {
                report.skipped += 1;
                continue;
            }

            let Some(from) = self.source_for(&source, &account).await else {
                report.failed += 1;
                continue;
            };
            let req = TransferRequest::new(
                from,
                account.id,
                gain.to_major(),
                narration.clone(),
                self.system_user,
            );
            match self.engine.credit(req).await {
                Ok(transaction_id) => {
                    info!(account_id = %account.id, %transaction_id, gain = gain.value(), "interest applied");
                    report.credited += 1;
                    report.total = report.total.saturating_add(gain);
                }
                Err(e) => {
                    error!(account_id = %account.id, error = %e, "failed to save interest transaction");
                    report.failed += 1;
                }
            }
        }

        info!(
            credited = report.credited,
            skipped = report.skipped,
            failed = report.failed,
            total = report.total.value(),
            "interest accrual run finished"
        );
        Ok(report)
    }

    /// The configured source, or its owner's account in the target currency.
    async fn source_for(&self, source: &Account, target: &Account) -> Option<AccountId> {
        if source.currency == target.currency {
            return Some(source.id);
        }
        match self
            .accounts
            .account_by_currency(source.owner, target.currency)
            .await
        {
            Ok(Some(account)) => Some(account.id),
            Ok(None) => {
                warn!(account_id = %target.id, currency = %target.currency, "no interest source in account currency");
                None
            }
            Err(e) => {
                error!(account_id = %target.id, error = %e, "failed to get interest source account");
                None
            }
        }
    }
}

#[async_trait]
impl Rescheduler for InterestScheduler {
    async fn reschedule(&self) -> Result<()> {
        self.install().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::cron::JobState;
    use crate::domain::account::{AccountType, Currency, UserType};
    use crate::domain::audit::AuditEvent;
    use crate::domain::interest::{Frequency, InterestRate};
    use crate::domain::ports::{AuditSink, RateStore};
    use crate::domain::task::TaskInfo;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use std::sync::Arc;

    struct NullSink;

    #[async_trait]
    impl AuditSink for NullSink {
        async fn submit(&self, _event: AuditEvent) -> Result<TaskInfo> {
            Ok(crate::domain::task::Task::new("test", "").info())
        }
    }

    async fn scheduler() -> (InMemoryLedgerStore, InterestScheduler) {
        let store = InMemoryLedgerStore::new();
        let source = Account::new(
            UserId::new(),
            UserType::Admin,
            AccountType::External,
            Currency::Gbp,
            "00000001",
        );
        store.insert_account(source.clone()).await.unwrap();
        let shared = Arc::new(store.clone());
        let engine = TransactionEngine::new(shared.clone(), shared.clone(), Arc::new(NullSink));
        let scheduler =
            InterestScheduler::new(shared.clone(), shared, engine, source.id, UserId::nil());
        (store, scheduler)
    }

    #[tokio::test]
    async fn test_start_without_rate_fails_fast() {
        let (_store, scheduler) = scheduler().await;
        let err = scheduler.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotInitialized(_)));
        assert_eq!(scheduler.jobs().job_count().await, 0);
    }

    #[tokio::test]
    async fn test_start_with_unknown_frequency_fails() {
        let (store, scheduler) = scheduler().await;
        let mut rate = InterestRate::new(500, Frequency::Daily);
        rate.calculation_frequency = "fortnightly".to_string();
        store.insert_rate(rate).await.unwrap();

        assert!(scheduler.start(CancellationToken::new()).await.is_err());
        assert_eq!(scheduler.jobs().job_count().await, 0);
    }

    #[tokio::test]
    async fn test_start_installs_one_job_and_stops_on_cancel() {
        let (store, scheduler) = scheduler().await;
        store
            .insert_rate(InterestRate::new(500, Frequency::Monthly))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            async move { scheduler.start(cancel).await }
        });

        for _ in 0..100 {
            if scheduler.jobs().job_count().await == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(
            scheduler.jobs().schedule_of(ACCRUAL_JOB).await.unwrap().to_string(),
            "0 0 1 * *"
        );
        assert!(matches!(
            scheduler.jobs().state_of(ACCRUAL_JOB).await,
            Some(JobState::Scheduled { .. })
        ));

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(scheduler.jobs().job_count().await, 0);
    }

    #[tokio::test]
    async fn test_reschedule_picks_up_new_frequency() {
        let (store, scheduler) = scheduler().await;
        let rate = store
            .insert_rate(InterestRate::new(500, Frequency::Daily))
            .await
            .unwrap();
        scheduler.reschedule().await.unwrap();

        let mut changed = rate.clone();
        changed.calculation_frequency = Frequency::Hourly.as_str().to_string();
        store.update_rate(changed).await.unwrap();
        scheduler.reschedule().await.unwrap();

        assert_eq!(scheduler.jobs().job_count().await, 1);
        assert_eq!(
            scheduler.jobs().schedule_of(ACCRUAL_JOB).await.unwrap().to_string(),
            "0 * * * *"
        );
        scheduler.jobs().shutdown().await;
    }
}
