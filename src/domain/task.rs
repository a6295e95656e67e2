use crate::domain::account::uuid_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

uuid_id!(TaskId, "task id");

/// A unit of work on the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    /// Serialized (JSON) body, opaque to the queue.
    pub payload: String,
    /// Completed delivery attempts so far.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Not handed to a consumer before this instant.
    pub not_before: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(kind: impl Into<String>, payload: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            kind: kind.into(),
            payload: payload.into(),
            attempt: 0,
            enqueued_at: now,
            not_before: now,
            last_error: None,
        }
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            kind: self.kind.clone(),
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Acknowledgement returned by a successful enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub kind: String,
    pub enqueued_at: DateTime<Utc>,
}

/// How failed tasks are redelivered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total delivery attempts before the task is dead-lettered.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
