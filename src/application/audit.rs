//! Asynchronous audit trail.
//!
//! Producers serialize an [`AuditEvent`] onto the durable queue and return
//! immediately; an [`AuditWorker`] consumes the queue with bounded concurrency
//! and persists one [`AuditRecord`] per event. Delivery is at-least-once and
//! unordered across events; the `account_sequence` in posting metadata lets
//! readers detect gaps.

use crate::domain::account::AccountId;
use crate::domain::audit::{AUDIT_TASK_KIND, AuditEvent, AuditRecord, AuditRecordId};
use crate::domain::ports::{AuditSink, AuditStoreRef, TaskQueueRef};
use crate::domain::task::{RetryPolicy, Task, TaskInfo};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Producer side and read access to the audit trail.
#[derive(Clone)]
pub struct AuditService {
    queue: TaskQueueRef,
    store: AuditStoreRef,
}

impl AuditService {
    pub fn new(queue: TaskQueueRef, store: AuditStoreRef) -> Self {
        Self { queue, store }
    }

    /// Persisted audit records for one account, oldest first.
    pub async fn audit_logs(&self, account_id: AccountId) -> Result<Vec<AuditRecord>> {
        self.store.audit_records_for(account_id).await
    }
}

#[async_trait]
impl AuditSink for AuditService {
    async fn submit(&self, event: AuditEvent) -> Result<TaskInfo> {
        let payload = serde_json::to_string(&event)?;
        let info = self
            .queue
            .enqueue(Task::new(AUDIT_TASK_KIND, payload))
            .await
            .inspect_err(|e| error!(action = %event.action, error = %e, "failed to enqueue audit log task"))?;
        debug!(task_id = %info.id, action = %event.action, "audit log task enqueued");
        Ok(info)
    }
}

/// Turns one queued task into one persisted audit row.
#[derive(Clone)]
pub struct AuditProcessor {
    store: AuditStoreRef,
}

impl AuditProcessor {
    pub fn new(store: AuditStoreRef) -> Self {
        Self { store }
    }

    pub async fn process(&self, task: &Task) -> Result<AuditRecord> {
        if task.kind != AUDIT_TASK_KIND {
            return Err(LedgerError::internal(format!(
                "unexpected task kind: {}",
                task.kind
            )));
        }
        let event: AuditEvent = serde_json::from_str(&task.payload)
            .inspect_err(|e| error!(task_id = %task.id, error = %e, "failed to decode audit log event"))?;
        let metadata = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let record = AuditRecord {
            id: AuditRecordId::new(),
            user_id: event.user_id,
            account_id: event.account_id,
            action: event.action.as_str().to_string(),
            metadata,
            created_at: event.created_at,
        };
        self.store
            .save_audit_record(record.clone())
            .await
            .inspect_err(|e| error!(task_id = %task.id, error = %e, "failed to save audit log"))?;
        debug!(task_id = %task.id, action = %record.action, "audit log saved");
        Ok(record)
    }
}

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum tasks handled at once.
    pub concurrency: usize,
    /// Sleep between polls when the queue has nothing ready.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}

/// Queue consumer that runs [`AuditProcessor`] on every audit task.
#[derive(Clone)]
pub struct AuditWorker {
    queue: TaskQueueRef,
    processor: Arc<AuditProcessor>,
    config: WorkerConfig,
}

impl AuditWorker {
    pub fn new(queue: TaskQueueRef, processor: AuditProcessor, config: WorkerConfig) -> Self {
        Self {
            queue,
            processor: Arc::new(processor),
            config,
        }
    }

    /// Consumes the queue until `cancel` fires, then waits for in-flight
    /// tasks to finish before returning.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let concurrency = self.config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut in_flight = JoinSet::new();
        info!(concurrency, "starting audit log worker");

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "audit task handler panicked");
                }
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => permit
                    .map_err(|e| LedgerError::internal(e.to_string()))?,
            };

            match self.queue.claim().await {
                Ok(Some(task)) => {
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        worker.handle(task).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if self.idle(&cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "failed to claim audit task");
                    if self.idle(&cancel).await {
                        break;
                    }
                }
            }
        }

        info!(in_flight = in_flight.len(), "shutting down audit log worker");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "audit task handler panicked");
            }
        }
        info!("audit log worker stopped");
        Ok(())
    }

    /// Processes tasks one at a time until nothing is waiting or in flight.
    /// Returns the number of tasks handled.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut handled = 0;
        loop {
            match self.queue.claim().await? {
                Some(task) => {
                    self.handle(task).await;
                    handled += 1;
                }
                None if self.queue.pending().await? == 0 => return Ok(handled),
                None => tokio::time::sleep(self.config.poll_interval).await,
            }
        }
    }

    /// Returns true if cancellation fired while waiting.
    async fn idle(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }

    async fn handle(&self, mut task: Task) {
        match self.processor.process(&task).await {
            Ok(_) => {
                if let Err(e) = self.queue.complete(task.id).await {
                    error!(task_id = %task.id, error = %e, "failed to acknowledge audit task");
                }
            }
            Err(e) => {
                task.attempt += 1;
                task.last_error = Some(e.to_string());
                let outcome = if self.config.retry.should_retry(task.attempt) {
                    let delay = self.config.retry.delay_for_attempt(task.attempt);
                    let not_before =
                        Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                    warn!(task_id = %task.id, attempt = task.attempt, error = %e, "audit task failed, retrying");
                    self.queue.reschedule(task.clone(), not_before).await
                } else {
                    warn!(task_id = %task.id, attempt = task.attempt, error = %e, "audit task dead-lettered");
                    self.queue.dead_letter(task.clone()).await
                };
                if let Err(e) = outcome {
                    error!(task_id = %task.id, error = %e, "failed to return audit task to queue");
                }
            }
        }
    }
}
