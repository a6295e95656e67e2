use crate::domain::account::{AccountId, UserId};
use crate::domain::transaction::TransferRequest;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// Which engine operation a posting row invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingOp {
    Credit,
    Debit,
    Transfer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub op: PostingOp,
    pub request: TransferRequest,
}

#[derive(Debug, Deserialize)]
struct PostingRecord {
    op: PostingOp,
    from: AccountId,
    to: AccountId,
    amount: Decimal,
    narration: Option<String>,
    /// Acting user; the system user when left empty.
    user: Option<UserId>,
}

/// Streams posting rows (`op,from,to,amount,narration,user`).
pub struct PostingReader<R: Read> {
    reader: csv::Reader<R>,
    system_user: UserId,
}

impl<R: Read> PostingReader<R> {
    pub fn new(source: R, system_user: UserId) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self {
            reader,
            system_user,
        }
    }

    /// Lazily parses postings, one result per row.
    pub fn postings(self) -> impl Iterator<Item = Result<Posting>> {
        let system_user = self.system_user;
        self.reader
            .into_deserialize::<PostingRecord>()
            .map(move |result| {
                let record = result.map_err(LedgerError::from)?;
                Ok(Posting {
                    op: record.op,
                    request: TransferRequest::new(
                        record.from,
                        record.to,
                        record.amount,
                        record.narration.unwrap_or_default(),
                        record.user.unwrap_or(system_user),
                    ),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const FROM: &str = "0190a5b4-0000-7000-8000-000000000001";
    const TO: &str = "0190a5b4-0000-7000-8000-000000000002";

    #[test]
    fn test_reader_valid_stream() {
        let data = format!(
            "op,from,to,amount,narration,user\n\
             credit, {FROM}, {TO}, 100.00, salary, 0190a5b4-0000-7000-8000-0000000000cc\n\
             debit, {TO}, {FROM}, 25.50,,"
        );
        let postings: Vec<Posting> = PostingReader::new(data.as_bytes(), UserId::nil())
            .postings()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].op, PostingOp::Credit);
        assert_eq!(postings[0].request.amount, dec!(100.00));
        assert_eq!(postings[0].request.narration(), Some("salary".to_string()));
        assert_eq!(postings[1].op, PostingOp::Debit);
        assert_eq!(postings[1].request.narration(), None);
        assert_eq!(postings[1].request.user_id, UserId::nil());
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = format!("op,from,to,amount,narration,user\nrefund, {FROM}, {TO}, 1.0,,");
        let results: Vec<Result<Posting>> = PostingReader::new(data.as_bytes(), UserId::nil())
            .postings()
            .collect();
        assert!(results[0].is_err());
    }
}
