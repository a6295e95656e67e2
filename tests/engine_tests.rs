mod common;

use common::Ledger;
use ledger_core::domain::account::{AccountType, Currency, UserId, UserType};
use ledger_core::domain::money::MinorUnits;
use ledger_core::domain::ports::{AccountRegistry, TaskQueue};
use ledger_core::domain::transaction::{ReferenceGenerator, TransferRequest};
use ledger_core::error::{LedgerError, Violation};
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn test_debit_scenario() {
    let ledger = Ledger::new();
    let bank = ledger.external(Currency::Gbp).await;
    let x = ledger.customer(Currency::Gbp).await;
    let y = ledger.external(Currency::Gbp).await;
    ledger.fund(&bank, &x, dec!(100.00)).await;
    assert_eq!(ledger.balance(&x).await, MinorUnits(10000));

    let user = UserId::new();
    let id = ledger
        .engine
        .debit(TransferRequest::new(x.id, y.id, dec!(25.50), "card payment", user))
        .await
        .unwrap();

    assert_eq!(ledger.balance(&x).await, MinorUnits(7450));

    let history = ledger.engine.transaction_history(x.id).await.unwrap();
    let tx = history.iter().find(|t| t.id == id).unwrap();
    assert_eq!(tx.amount.minor(), MinorUnits(2550));
    assert_eq!(tx.currency, Currency::Gbp);
    assert_eq!(tx.major_amount(), dec!(25.50));
    assert_eq!(tx.reference_number.len(), 8);
    assert_eq!(history.len(), 2);

    ledger.worker().run_until_idle().await.unwrap();
    let logs = ledger.audit.audit_logs(x.id).await.unwrap();
    let debits: Vec<_> = logs.iter().filter(|r| r.action == "account_debit").collect();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].user_id, user);
    assert!(ledger.audit.audit_logs(y.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejections() {
    let ledger = Ledger::new();
    let bank = ledger.external(Currency::Gbp).await;
    let gbp = ledger.customer(Currency::Gbp).await;
    let eur = ledger.customer(Currency::Eur).await;
    ledger.fund(&bank, &gbp, dec!(10)).await;

    let req = |from, to, amount| TransferRequest::new(from, to, amount, "", UserId::nil());
    let cases = [
        (req(gbp.id, gbp.id, dec!(1)), "self_transfer"),
        (req(gbp.id, eur.id, dec!(1)), "currency_mismatch"),
        // Short and cross-currency: the shortfall is reported.
        (req(gbp.id, eur.id, dec!(50)), "insufficient_funds"),
        (req(gbp.id, bank.id, dec!(10.01)), "insufficient_funds"),
        (req(gbp.id, bank.id, dec!(0)), "non_positive_amount"),
        (req(gbp.id, bank.id, dec!(-5)), "non_positive_amount"),
    ];
    for (req, code) in cases {
        match ledger.engine.debit(req).await {
            Err(LedgerError::InvalidOperation(v)) => assert_eq!(v.code(), code),
            other => panic!("expected {code}, got {other:?}"),
        }
    }

    let missing = TransferRequest::new(gbp.id, Default::default(), dec!(1), "", UserId::nil());
    assert!(matches!(
        ledger.engine.transfer(missing).await,
        Err(LedgerError::NotFound(_))
    ));

    // Nothing but the funding posting made it in.
    assert_eq!(ledger.store.transaction_count().await, 1);
    assert_eq!(ledger.balance(&gbp).await, MinorUnits(1000));
}

#[tokio::test]
async fn test_credit_overflowing_positions_is_rejected() {
    let ledger = Ledger::new();
    let bank = ledger.external(Currency::Gbp).await;
    let whale = ledger.customer(Currency::Gbp).await;
    let huge = MinorUnits(5_000_000_000_000_000_000);

    ledger.fund(&bank, &whale, dec!(50000000000000000)).await;
    assert_eq!(ledger.balance(&whale).await, huge);

    let req = TransferRequest::new(bank.id, whale.id, dec!(50000000000000000), "", UserId::nil());
    assert!(matches!(
        ledger.engine.credit(req).await,
        Err(LedgerError::InvalidOperation(Violation::AmountOutOfRange))
    ));

    assert_eq!(ledger.store.transaction_count().await, 1);
    assert_eq!(ledger.balance(&whale).await, huge);
    assert_eq!(ledger.balance(&bank).await, -huge);

    // The ledger keeps working after the rejection.
    let back = TransferRequest::new(whale.id, bank.id, dec!(1), "", UserId::nil());
    ledger.engine.debit(back).await.unwrap();
    assert_eq!(ledger.balance(&whale).await, MinorUnits(huge.value() - 100));
}

#[tokio::test]
async fn test_reregistering_in_another_currency_is_rejected() {
    let ledger = Ledger::new();
    let bank = ledger.external(Currency::Gbp).await;
    let account = ledger.customer(Currency::Gbp).await;
    let eur = ledger.customer(Currency::Eur).await;
    ledger.fund(&bank, &account, dec!(100.00)).await;

    let mut moved = account.clone();
    moved.currency = Currency::Eur;
    assert!(matches!(
        ledger.store.register_account(moved).await,
        Err(LedgerError::InvalidOperation(Violation::CurrencyChange { .. }))
    ));

    let balance = ledger.engine.balance(account.id).await.unwrap();
    assert_eq!(balance.currency, Currency::Gbp);
    assert_eq!(balance.balance, MinorUnits(10000));

    let req = TransferRequest::new(account.id, eur.id, dec!(50), "", UserId::nil());
    assert!(matches!(
        ledger.engine.debit(req).await,
        Err(LedgerError::InvalidOperation(Violation::CurrencyMismatch { .. }))
    ));
}

#[tokio::test]
async fn test_credit_from_internal_account_needs_funds() {
    let ledger = Ledger::new();
    let bank = ledger.external(Currency::Gbp).await;
    let book = ledger
        .open(UserType::Admin, AccountType::Internal, Currency::Gbp)
        .await;
    let customer = ledger.customer(Currency::Gbp).await;

    let req = TransferRequest::new(book.id, customer.id, dec!(1), "", UserId::nil());
    assert!(matches!(
        ledger.engine.credit(req.clone()).await,
        Err(LedgerError::InvalidOperation(Violation::InsufficientFunds))
    ));

    ledger.fund(&bank, &book, dec!(5)).await;
    ledger.engine.credit(req).await.unwrap();
    assert_eq!(ledger.balance(&customer).await, MinorUnits(100));
    assert_eq!(ledger.balance(&book).await, MinorUnits(400));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() {
    let ledger = Arc::new(Ledger::new());
    let bank = ledger.external(Currency::Gbp).await;
    let payer = ledger.customer(Currency::Gbp).await;
    let payee = ledger.customer(Currency::Gbp).await;
    ledger.fund(&bank, &payer, dec!(100)).await;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let ledger = ledger.clone();
        let req = TransferRequest::new(payer.id, payee.id, dec!(10), "split", UserId::nil());
        handles.push(tokio::spawn(async move { ledger.engine.debit(req).await }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(matches!(
                e,
                LedgerError::InvalidOperation(Violation::InsufficientFunds)
            )),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(ledger.balance(&payer).await, MinorUnits::ZERO);
    assert_eq!(ledger.balance(&payee).await, MinorUnits(10000));
}

struct FixedReference;

impl ReferenceGenerator for FixedReference {
    fn generate(&self) -> String {
        "12345678".to_string()
    }
}

#[tokio::test]
async fn test_sequences_in_audit_metadata_are_contiguous() {
    let ledger = Ledger::new();
    let bank = ledger.external(Currency::Gbp).await;
    let account = ledger.customer(Currency::Gbp).await;
    let engine = ledger
        .engine
        .clone()
        .with_reference_generator(Arc::new(FixedReference));

    for _ in 0..5 {
        engine
            .credit(TransferRequest::new(bank.id, account.id, dec!(1), "", UserId::nil()))
            .await
            .unwrap();
    }
    assert_eq!(ledger.queue.pending().await.unwrap(), 5);
    ledger.worker().run_until_idle().await.unwrap();

    let mut sequences: Vec<u64> = ledger
        .audit
        .audit_logs(account.id)
        .await
        .unwrap()
        .iter()
        .map(|r| {
            let meta: serde_json::Value =
                serde_json::from_str(r.metadata.as_deref().unwrap()).unwrap();
            assert_eq!(meta["reference_number"], "12345678");
            meta["account_sequence"].as_u64().unwrap()
        })
        .collect();
    sequences.sort_unstable();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
}
