use crate::application::audit::WorkerConfig;
use crate::domain::account::{AccountId, UserId};
use crate::domain::task::RetryPolicy;
use crate::telemetry::LogFormat;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Account credited from when interest is paid, unless configured otherwise.
pub const DEFAULT_INTEREST_RATE_ACCOUNT_ID: &str = "00000000-1111-1111-1111-000000000000";

/// Runtime settings shared by every subcommand. Each can be given as a flag or
/// through the environment.
#[derive(Args, Debug, Clone)]
pub struct LedgerConfig {
    /// Path to a persistent database. Uses RocksDB when the
    /// `storage-rocksdb` feature is enabled.
    #[arg(long, env = "DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Audit tasks processed concurrently.
    #[arg(long, env = "QUEUE_CONCURRENCY", default_value_t = 10, global = true)]
    pub queue_concurrency: usize,

    /// Idle poll interval of the audit worker, in milliseconds.
    #[arg(long, env = "QUEUE_POLL_INTERVAL_MS", default_value_t = 100, global = true)]
    pub queue_poll_interval_ms: u64,

    /// Delivery attempts before an audit task is dead-lettered.
    #[arg(long, env = "AUDIT_MAX_ATTEMPTS", default_value_t = 5, global = true)]
    pub audit_max_attempts: u32,

    #[arg(
        long,
        env = "INTEREST_RATE_ACCOUNT_ID",
        default_value = DEFAULT_INTEREST_RATE_ACCOUNT_ID,
        global = true
    )]
    pub interest_rate_account_id: AccountId,

    /// Acting user recorded on system-initiated postings.
    #[arg(long, env = "SYSTEM_USER_ID", default_value_t = UserId::nil(), global = true)]
    pub system_user_id: UserId,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,
}

impl LedgerConfig {
    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.queue_concurrency.max(1),
            poll_interval: Duration::from_millis(self.queue_poll_interval_ms),
            retry: RetryPolicy::new(self.audit_max_attempts.max(1)),
        }
    }
}
