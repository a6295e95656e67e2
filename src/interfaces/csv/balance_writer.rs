use crate::domain::account::{AccountId, Balance, Currency};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct BalanceRow<'a> {
    account: AccountId,
    number: &'a str,
    currency: Currency,
    balance: Decimal,
}

/// Writes balances as `account,number,currency,balance`, amounts in major units.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_balances(&mut self, balances: impl IntoIterator<Item = Balance>) -> Result<()> {
        for balance in balances {
            self.writer.serialize(BalanceRow {
                account: balance.account_id,
                number: &balance.account_number,
                currency: balance.currency,
                balance: balance.major(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
