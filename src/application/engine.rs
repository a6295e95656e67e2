use crate::domain::account::{Account, AccountId, Balance};
use crate::domain::audit::{AuditAction, AuditEvent, PostingMetadata};
use crate::domain::money::Amount;
use crate::domain::ports::{AccountStoreRef, AuditSinkRef, TransactionStoreRef};
use crate::domain::transaction::{
    FundsCheck, NewTransaction, PostedTransaction, RandomReference, ReferenceGenerator,
    Transaction, TransactionId, TransferRequest,
};
use crate::error::{LedgerError, Result, Violation};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Which side of the movement the caller is acting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Funds arrive in the destination; unlimited sources skip the funds check.
    Credit,
    /// Funds leave the source; the funds check always applies.
    Debit,
}

impl Direction {
    fn action(&self) -> AuditAction {
        match self {
            Direction::Credit => AuditAction::AccountCredit,
            Direction::Debit => AuditAction::AccountDebit,
        }
    }
}

/// Enforces money-movement rules and posts transactions to the ledger store.
///
/// The engine keeps no account state between calls. Every operation reads
/// accounts fresh. Funds are checked early against the materialized balance
/// and again by the store, atomically with the write.
#[derive(Clone)]
pub struct TransactionEngine {
    accounts: AccountStoreRef,
    transactions: TransactionStoreRef,
    audit: AuditSinkRef,
    references: Arc<dyn ReferenceGenerator>,
}

impl TransactionEngine {
    pub fn new(
        accounts: AccountStoreRef,
        transactions: TransactionStoreRef,
        audit: AuditSinkRef,
    ) -> Self {
        Self {
            accounts,
            transactions,
            audit,
            references: Arc::new(RandomReference::default()),
        }
    }

    pub fn with_reference_generator(mut self, references: Arc<dyn ReferenceGenerator>) -> Self {
        self.references = references;
        self
    }

    /// Moves funds into `to_account_id`. The source balance is only checked
    /// when the source is not an unlimited (external) account.
    #[instrument(skip(self), fields(from = %req.from_account_id, to = %req.to_account_id))]
    pub async fn credit(&self, req: TransferRequest) -> Result<TransactionId> {
        self.post(Direction::Credit, req).await
    }

    /// Moves funds out of `from_account_id`, always checking its balance.
    #[instrument(skip(self), fields(from = %req.from_account_id, to = %req.to_account_id))]
    pub async fn debit(&self, req: TransferRequest) -> Result<TransactionId> {
        self.post(Direction::Debit, req).await
    }

    /// A transfer is a debit from the caller's own account. Checking that the
    /// caller owns the source is the API layer's job.
    pub async fn transfer(&self, req: TransferRequest) -> Result<TransactionId> {
        self.debit(req).await
    }

    pub async fn balance(&self, account_id: AccountId) -> Result<Balance> {
        self.accounts
            .balance(account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account"))
    }

    /// Transactions touching the account, oldest first. An account without
    /// transactions yields an empty list.
    pub async fn transaction_history(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        self.require_account(account_id).await?;
        self.transactions.transactions_for(account_id).await
    }

    async fn post(&self, direction: Direction, req: TransferRequest) -> Result<TransactionId> {
        if req.from_account_id == req.to_account_id {
            return Err(Violation::SelfTransfer.into());
        }
        let amount = req.amount_minor()?;

        let from = self.require_account(req.from_account_id).await?;
        let to = self.require_account(req.to_account_id).await?;

        let funds = match direction {
            Direction::Credit if from.account_type.is_unlimited_source() => FundsCheck::Skip,
            _ => FundsCheck::Required,
        };
        if funds == FundsCheck::Required {
            self.ensure_covered(&from, amount).await?;
        }

        if from.currency != to.currency {
            return Err(Violation::CurrencyMismatch {
                from: from.currency,
                to: to.currency,
            }
            .into());
        }

        let new_tx = NewTransaction {
            from_account_id: from.id,
            to_account_id: to.id,
            amount,
            currency: from.currency,
            narration: req.narration(),
            reference_number: self.references.generate(),
        };
        let posted = self.transactions.post(new_tx, funds).await?;

        self.refresh_balance(from.id).await;
        self.refresh_balance(to.id).await;

        let scope = match direction {
            Direction::Credit => to.id,
            Direction::Debit => from.id,
        };
        self.record(direction, &req, scope, &posted).await;

        info!(
            transaction_id = %posted.transaction.id,
            amount = posted.transaction.amount.minor().value(),
            currency = %posted.transaction.currency,
            "transaction posted"
        );
        Ok(posted.transaction.id)
    }

    async fn require_account(&self, id: AccountId) -> Result<Account> {
        self.accounts
            .account(id)
            .await
            .inspect_err(|e| error!(account_id = %id, error = %e, "failed to get account"))?
            .ok_or_else(|| LedgerError::not_found("account"))
    }

    /// Early rejection against the materialized balance. The store checks the
    /// committed position again when it writes.
    async fn ensure_covered(&self, from: &Account, amount: Amount) -> Result<()> {
        let balance = self
            .accounts
            .balance(from.id)
            .await?
            .map(|b| b.balance)
            .unwrap_or_default();
        if balance < amount.minor() {
            return Err(Violation::InsufficientFunds.into());
        }
        Ok(())
    }

    /// The transaction row is authoritative; a stale projection is repaired
    /// by the next recompute.
    async fn refresh_balance(&self, id: AccountId) {
        if let Err(e) = self.accounts.recompute_balance(id).await {
            error!(account_id = %id, error = %e, "failed to update account balance");
        }
    }

    /// Audit delivery is best effort and never fails the posting.
    async fn record(
        &self,
        direction: Direction,
        req: &TransferRequest,
        scope: AccountId,
        posted: &PostedTransaction,
    ) {
        let metadata = PostingMetadata {
            transaction: posted.transaction.clone(),
            account_sequence: posted.sequence_for(scope).unwrap_or_default(),
        };
        let event = match AuditEvent::new(direction.action(), req.user_id, Some(scope))
            .with_metadata(&metadata)
        {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "failed to build audit event");
                return;
            }
        };
        if let Err(e) = self.audit.submit(event).await {
            error!(error = %e, "failed to submit audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{AccountType, Currency, UserId, UserType};
    use crate::domain::money::MinorUnits;
    use crate::domain::ports::AuditSink;
    use crate::domain::task::TaskInfo;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<AuditEvent>>,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn submit(&self, event: AuditEvent) -> Result<TaskInfo> {
            let task = crate::domain::task::Task::new("test", "");
            self.events.lock().await.push(event);
            Ok(task.info())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn submit(&self, _event: AuditEvent) -> Result<TaskInfo> {
            Err(LedgerError::internal("queue unavailable"))
        }
    }

    async fn seeded(account_type: AccountType) -> (InMemoryLedgerStore, Account, Account) {
        let store = InMemoryLedgerStore::new();
        let source = Account::new(
            UserId::new(),
            UserType::Admin,
            account_type,
            Currency::Gbp,
            "90000001",
        );
        let customer = Account::new(
            UserId::new(),
            UserType::Customer,
            AccountType::Current,
            Currency::Gbp,
            "10000001",
        );
        store.insert_account(source.clone()).await.unwrap();
        store.insert_account(customer.clone()).await.unwrap();
        (store, source, customer)
    }

    fn engine(store: &InMemoryLedgerStore, sink: Arc<dyn AuditSink>) -> TransactionEngine {
        let store = Arc::new(store.clone());
        TransactionEngine::new(store.clone(), store, sink)
    }

    #[tokio::test]
    async fn test_credit_from_external_skips_funds_check() {
        let (store, external, customer) = seeded(AccountType::External).await;
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(&store, sink.clone());

        let req = TransferRequest::new(external.id, customer.id, dec!(100.50), "top up", UserId::nil());
        engine.credit(req).await.unwrap();

        let balance = engine.balance(customer.id).await.unwrap();
        assert_eq!(balance.balance, MinorUnits(10050));

        let events = sink.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::AccountCredit);
        assert_eq!(events[0].account_id, Some(customer.id));
        let metadata = events[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["amount"], 10050);
        assert_eq!(metadata["account_sequence"], 1);
    }

    #[tokio::test]
    async fn test_credit_from_internal_requires_funds() {
        let (store, internal, customer) = seeded(AccountType::Internal).await;
        let engine = engine(&store, Arc::new(RecordingSink::default()));

        let req = TransferRequest::new(internal.id, customer.id, dec!(1), "", UserId::nil());
        let err = engine.credit(req).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidOperation(Violation::InsufficientFunds)
        ));
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_posting() {
        let (store, external, customer) = seeded(AccountType::External).await;
        let engine = engine(&store, Arc::new(FailingSink));

        let req = TransferRequest::new(external.id, customer.id, dec!(5), "", UserId::nil());
        assert!(engine.credit(req).await.is_ok());
        assert_eq!(store.transaction_count().await, 1);
    }

    #[tokio::test]
    async fn test_history_of_unknown_account() {
        let (store, _, customer) = seeded(AccountType::External).await;
        let engine = engine(&store, Arc::new(RecordingSink::default()));

        assert!(engine.transaction_history(customer.id).await.unwrap().is_empty());
        assert!(matches!(
            engine.transaction_history(AccountId::new()).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            engine.balance(AccountId::new()).await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
