//! Minimal cron support: five-field expressions and a scheduler of named
//! recurring jobs on the tokio runtime.

use crate::error::{LedgerError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How far ahead `next_after` searches before giving up (covers leap days).
const SEARCH_DAYS: i64 = 366 * 4 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Any,
    At(u32),
}

impl Field {
    fn parse(raw: &str, min: u32, max: u32) -> Result<Self> {
        if raw == "*" {
            return Ok(Field::Any);
        }
        let value: u32 = raw
            .parse()
            .map_err(|_| LedgerError::internal(format!("invalid cron field: {raw}")))?;
        if value < min || value > max {
            return Err(LedgerError::internal(format!(
                "cron field {raw} outside {min}..={max}"
            )));
        }
        Ok(Field::At(value))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::At(v) => *v == value,
        }
    }

    fn values(&self, max: u32) -> Vec<u32> {
        match self {
            Field::Any => (0..=max).collect(),
            Field::At(v) => vec![*v],
        }
    }
}

/// A cron expression: minute, hour, day of month, month, day of week
/// (0 = Sunday). Each field is `*` or a single number. Evaluated in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl FromStr for CronSchedule {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(LedgerError::internal(format!(
                "cron expression needs 5 fields: {s}"
            )));
        };
        Ok(Self {
            expression: s.to_string(),
            minute: Field::parse(minute, 0, 59)?,
            hour: Field::parse(hour, 0, 23)?,
            day_of_month: Field::parse(dom, 1, 31)?,
            month: Field::parse(month, 1, 12)?,
            day_of_week: Field::parse(dow, 0, 6)?,
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl CronSchedule {
    fn day_matches(&self, date: NaiveDate) -> bool {
        if !self.month.matches(date.month()) {
            return false;
        }
        let dom = self.day_of_month.matches(date.day());
        let dow = self
            .day_of_week
            .matches(date.weekday().num_days_from_sunday());
        // Classic cron: when both day fields are restricted, either may match.
        match (self.day_of_month, self.day_of_week) {
            (Field::At(_), Field::At(_)) => dom || dow,
            _ => dom && dow,
        }
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .map(|t| t + Duration::minutes(1))?;
        let hours = self.hour.values(23);
        let minutes = self.minute.values(59);

        let mut date = start.date_naive();
        for _ in 0..SEARCH_DAYS {
            if self.day_matches(date) {
                for &h in &hours {
                    for &m in &minutes {
                        let Some(time) = NaiveTime::from_hms_opt(h, m, 0) else {
                            continue;
                        };
                        let candidate = Utc.from_utc_datetime(&date.and_time(time));
                        if candidate >= start {
                            return Some(candidate);
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

/// Work run on every tick of a recurring job.
pub type JobTask = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wraps an async closure as a [`JobTask`].
pub fn job_task<F, Fut>(f: F) -> JobTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> { Box::pin(f()) })
}

/// State of an installed job. Stopped jobs are removed from the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Scheduled { next_run: DateTime<Utc> },
    Running,
}

struct JobEntry {
    schedule: CronSchedule,
    state: Arc<RwLock<JobState>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs named jobs on cron schedules. Installing a job under an existing name
/// replaces the previous one.
#[derive(Clone, Default)]
pub struct JobScheduler {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    shutdown: CancellationToken,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn install(&self, name: &str, schedule: CronSchedule, task: JobTask) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(LedgerError::internal("scheduler has been shut down"));
        }
        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.remove(name) {
            // A run already in progress is left to finish.
            previous.cancel.cancel();
            debug!(job = name, "replaced existing job");
        }

        let next_run = schedule
            .next_after(Utc::now())
            .ok_or_else(|| LedgerError::internal(format!("cron {schedule} never fires")))?;
        let state = Arc::new(RwLock::new(JobState::Scheduled { next_run }));
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(run_job(
            name.to_string(),
            schedule.clone(),
            task,
            state.clone(),
            cancel.clone(),
        ));
        info!(job = name, cron = %schedule, %next_run, "job scheduled");

        jobs.insert(
            name.to_string(),
            JobEntry {
                schedule,
                state,
                cancel,
                handle,
            },
        );
        Ok(())
    }

    pub async fn schedule_of(&self, name: &str) -> Option<CronSchedule> {
        self.jobs.lock().await.get(name).map(|j| j.schedule.clone())
    }

    pub async fn state_of(&self, name: &str) -> Option<JobState> {
        let state = self.jobs.lock().await.get(name).map(|j| j.state.clone())?;
        let current = state.read().await.clone();
        Some(current)
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Stops all jobs, letting any in-progress run complete.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let jobs: Vec<(String, JobEntry)> = self.jobs.lock().await.drain().collect();
        for (name, job) in jobs {
            if let Err(e) = job.handle.await {
                error!(job = %name, error = %e, "job task panicked");
            }
        }
        info!("scheduler stopped");
    }
}

async fn run_job(
    name: String,
    schedule: CronSchedule,
    task: JobTask,
    state: Arc<RwLock<JobState>>,
    cancel: CancellationToken,
) {
    loop {
        let now = Utc::now();
        let Some(next_run) = schedule.next_after(now) else {
            warn!(job = %name, cron = %schedule, "no further fire time");
            break;
        };
        *state.write().await = JobState::Scheduled { next_run };
        let wait = (next_run - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        *state.write().await = JobState::Running;
        debug!(job = %name, "job running");
        task().await;
    }
    debug!(job = %name, "job stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn noop() -> JobTask {
        job_task(|| async {})
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("0 0 * *".parse::<CronSchedule>().is_err());
        assert!("60 * * * *".parse::<CronSchedule>().is_err());
        assert!("a * * * *".parse::<CronSchedule>().is_err());
    }

    #[test]
    fn test_hourly() {
        let cron: CronSchedule = "0 * * * *".parse().unwrap();
        assert_eq!(
            cron.next_after(at("2026-03-10T10:15:30Z")),
            Some(at("2026-03-10T11:00:00Z"))
        );
        // Strictly after: a tick exactly on the hour moves to the next hour.
        assert_eq!(
            cron.next_after(at("2026-03-10T11:00:00Z")),
            Some(at("2026-03-10T12:00:00Z"))
        );
    }

    #[test]
    fn test_daily_weekly_monthly_yearly() {
        let now = at("2026-03-10T10:15:00Z"); // a Tuesday
        let daily: CronSchedule = "0 0 * * *".parse().unwrap();
        assert_eq!(daily.next_after(now), Some(at("2026-03-11T00:00:00Z")));

        let weekly: CronSchedule = "0 0 * * 0".parse().unwrap();
        assert_eq!(weekly.next_after(now), Some(at("2026-03-15T00:00:00Z")));

        let monthly: CronSchedule = "0 0 1 * *".parse().unwrap();
        assert_eq!(monthly.next_after(now), Some(at("2026-04-01T00:00:00Z")));

        let yearly: CronSchedule = "0 0 1 1 *".parse().unwrap();
        assert_eq!(yearly.next_after(now), Some(at("2027-01-01T00:00:00Z")));
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let cron: CronSchedule = "0 0 31 2 *".parse().unwrap();
        assert_eq!(cron.next_after(at("2026-01-01T00:00:00Z")), None);
    }

    #[tokio::test]
    async fn test_install_replaces_job_with_same_name() {
        let scheduler = JobScheduler::new();
        scheduler
            .install("accrual", "0 0 * * *".parse().unwrap(), noop())
            .await
            .unwrap();
        scheduler
            .install("accrual", "0 * * * *".parse().unwrap(), noop())
            .await
            .unwrap();

        assert_eq!(scheduler.job_count().await, 1);
        assert_eq!(
            scheduler.schedule_of("accrual").await.unwrap().to_string(),
            "0 * * * *"
        );
        assert!(matches!(
            scheduler.state_of("accrual").await,
            Some(JobState::Scheduled { .. })
        ));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_jobs_without_running_them() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = job_task(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let scheduler = JobScheduler::new();
        scheduler
            .install("accrual", "0 0 1 1 *".parse().unwrap(), task)
            .await
            .unwrap();
        scheduler.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.job_count().await, 0);
        assert_eq!(scheduler.state_of("accrual").await, None);
        assert!(scheduler
            .install("accrual", "0 0 1 1 *".parse().unwrap(), noop())
            .await
            .is_err());
    }
}
