use crate::domain::account::{
    Account, AccountId, AccountStatus, AccountType, Currency, UserId, UserType,
};
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct AccountRecord {
    id: AccountId,
    owner: UserId,
    owner_type: UserType,
    account_type: AccountType,
    currency: Currency,
    status: AccountStatus,
    number: String,
}

impl From<AccountRecord> for Account {
    fn from(record: AccountRecord) -> Self {
        Account::new(
            record.owner,
            record.owner_type,
            record.account_type,
            record.currency,
            record.number,
        )
        .with_id(record.id)
        .with_status(record.status)
    }
}

/// Reads account seed rows (`id,owner,owner_type,account_type,currency,status,number`).
pub struct AccountReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> AccountReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    pub fn accounts(self) -> impl Iterator<Item = Result<Account>> {
        self.reader
            .into_deserialize::<AccountRecord>()
            .map(|result| result.map(Account::from).map_err(LedgerError::from))
    }
}
