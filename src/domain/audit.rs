use crate::domain::account::{AccountId, UserId, uuid_id};
use crate::domain::transaction::Transaction;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

uuid_id!(AuditRecordId, "audit record id");

/// Task type under which audit events travel through the queue.
pub const AUDIT_TASK_KIND: &str = "auditlog:record";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CreateAccount,
    AccountStatusChange,
    AccountCredit,
    AccountDebit,
    AccountTransfer,
    InterestRateChange,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateAccount => "create_account",
            AuditAction::AccountStatusChange => "account_status_change",
            AuditAction::AccountCredit => "account_credit",
            AuditAction::AccountDebit => "account_debit",
            AuditAction::AccountTransfer => "account_transfer",
            AuditAction::InterestRateChange => "interest_rate_change",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sensitive action, captured at the moment it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub user_id: UserId,
    pub account_id: Option<AccountId>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, user_id: UserId, account_id: Option<AccountId>) -> Self {
        Self {
            action,
            user_id,
            account_id,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata<T: Serialize>(mut self, metadata: &T) -> Result<Self> {
        self.metadata = Some(serde_json::to_value(metadata)?);
        Ok(self)
    }
}

/// Metadata attached to credit and debit events.
///
/// `account_sequence` is the posting sequence of the account the event is
/// scoped to, so consumers can spot gaps and reorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingMetadata {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub account_sequence: u64,
}

/// Metadata attached to interest rate changes. Unchanged sides are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateChangeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_rate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_calculation_frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_rate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_calculation_frequency: Option<String>,
}

/// A persisted audit row. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditRecordId,
    pub user_id: UserId,
    pub account_id: Option<AccountId>,
    pub action: String,
    /// Raw JSON blob, absent for actions without metadata.
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}
