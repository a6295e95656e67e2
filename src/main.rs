use clap::{Parser, Subcommand};
use ledger_core::application::audit::{AuditProcessor, AuditService, AuditWorker};
use ledger_core::application::engine::TransactionEngine;
use ledger_core::application::interest::InterestScheduler;
use ledger_core::application::rates::RateAdministration;
use ledger_core::config::LedgerConfig;
use ledger_core::domain::interest::Frequency;
use ledger_core::domain::ports::{
    AccountRegistry, AccountStoreRef, AuditStoreRef, LedgerStore, RateStoreRef, TaskQueueRef,
    TransactionStoreRef,
};
use ledger_core::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryTaskQueue};
#[cfg(feature = "storage-rocksdb")]
use ledger_core::infrastructure::rocksdb::RocksDBStore;
use ledger_core::interfaces::csv::account_reader::AccountReader;
use ledger_core::interfaces::csv::balance_writer::BalanceWriter;
use ledger_core::interfaces::csv::posting_reader::{PostingOp, PostingReader};
use ledger_core::telemetry;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ledger-core", author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: LedgerConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay postings from CSV and print the resulting balances
    Post {
        /// Accounts to seed before replaying
        #[arg(long)]
        accounts: PathBuf,

        /// Input postings CSV file
        input: PathBuf,
    },
    /// Run the audit worker and the interest scheduler until interrupted
    Serve {
        /// Create the interest rate (in percent) if none exists yet
        #[arg(long, requires = "frequency")]
        rate: Option<Decimal>,

        /// Calculation frequency for a newly created rate
        #[arg(long)]
        frequency: Option<Frequency>,
    },
}

/// The store ports, all backed by one adapter.
struct Backend {
    accounts: AccountStoreRef,
    registry: Arc<dyn AccountRegistry>,
    transactions: TransactionStoreRef,
    rates: RateStoreRef,
    audit_store: AuditStoreRef,
    queue: TaskQueueRef,
}

impl Backend {
    fn from_store<S: LedgerStore + 'static>(store: S, queue: TaskQueueRef) -> Self {
        let store = Arc::new(store);
        Self {
            accounts: store.clone(),
            registry: store.clone(),
            transactions: store.clone(),
            rates: store.clone(),
            audit_store: store,
            queue,
        }
    }

    fn in_memory() -> Self {
        Self::from_store(InMemoryLedgerStore::new(), Arc::new(InMemoryTaskQueue::new()))
    }

    #[cfg(feature = "storage-rocksdb")]
    fn open(db_path: Option<&Path>) -> Result<Self> {
        match db_path {
            Some(path) => {
                let store = RocksDBStore::open(path).into_diagnostic()?;
                let queue = Arc::new(store.task_queue());
                Ok(Self::from_store(store, queue))
            }
            None => Ok(Self::in_memory()),
        }
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    fn open(db_path: Option<&Path>) -> Result<Self> {
        if db_path.is_some() {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
        }
        Ok(Self::in_memory())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.config.log_format);

    let backend = Backend::open(cli.config.db_path.as_deref())?;
    let audit = Arc::new(AuditService::new(
        backend.queue.clone(),
        backend.audit_store.clone(),
    ));
    let engine = TransactionEngine::new(
        backend.accounts.clone(),
        backend.transactions.clone(),
        audit.clone(),
    );
    let worker = AuditWorker::new(
        backend.queue.clone(),
        AuditProcessor::new(backend.audit_store.clone()),
        cli.config.worker(),
    );

    match cli.command {
        Command::Post { accounts, input } => {
            seed_accounts(&backend, &accounts).await?;
            replay_postings(&engine, &input, &cli.config).await?;

            let handled = worker.run_until_idle().await.into_diagnostic()?;
            info!(handled, "audit queue drained");

            let mut balances = Vec::new();
            for account in backend.registry.all_accounts().await.into_diagnostic()? {
                balances.push(engine.balance(account.id).await.into_diagnostic()?);
            }
            let stdout = io::stdout();
            let mut writer = BalanceWriter::new(stdout.lock());
            writer.write_balances(balances).into_diagnostic()?;
        }
        Command::Serve { rate, frequency } => {
            let scheduler = InterestScheduler::new(
                backend.rates.clone(),
                backend.accounts.clone(),
                engine,
                cli.config.interest_rate_account_id,
                cli.config.system_user_id,
            );
            if let (Some(rate), Some(frequency)) = (rate, frequency) {
                let admin =
                    RateAdministration::new(backend.rates.clone(), audit, Arc::new(scheduler.clone()));
                let id = admin
                    .create_rate(rate, frequency, cli.config.system_user_id)
                    .await
                    .into_diagnostic()?;
                info!(interest_rate_id = %id, "interest rate ready");
            }

            let cancel = CancellationToken::new();
            let worker_handle = tokio::spawn({
                let cancel = cancel.clone();
                async move { worker.start(cancel).await }
            });
            let scheduler_handle = tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if let Err(e) = scheduler.start(cancel).await {
                        error!(error = %e, "interest scheduler did not start");
                    }
                }
            });

            tokio::signal::ctrl_c().await.into_diagnostic()?;
            info!("shutdown requested");
            cancel.cancel();

            worker_handle
                .await
                .into_diagnostic()?
                .into_diagnostic()?;
            scheduler_handle.await.into_diagnostic()?;
        }
    }

    Ok(())
}

async fn seed_accounts(backend: &Backend, path: &Path) -> Result<()> {
    let file = File::open(path).into_diagnostic()?;
    for account in AccountReader::new(file).accounts() {
        let account = account.into_diagnostic()?;
        backend
            .registry
            .register_account(account)
            .await
            .into_diagnostic()?;
    }
    Ok(())
}

async fn replay_postings(
    engine: &TransactionEngine,
    path: &Path,
    config: &LedgerConfig,
) -> Result<()> {
    let file = File::open(path).into_diagnostic()?;
    let reader = PostingReader::new(file, config.system_user_id);
    for posting in reader.postings() {
        match posting {
            Ok(posting) => {
                let result = match posting.op {
                    PostingOp::Credit => engine.credit(posting.request).await,
                    PostingOp::Debit => engine.debit(posting.request).await,
                    PostingOp::Transfer => engine.transfer(posting.request).await,
                };
                if let Err(e) = result {
                    eprintln!("Error processing posting: {}", e.public_message());
                }
            }
            Err(e) => {
                eprintln!("Error reading posting: {}", e);
            }
        }
    }
    Ok(())
}
