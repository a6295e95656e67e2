//! CSV batch I/O used by the command line.

pub mod account_reader;
pub mod balance_writer;
pub mod posting_reader;
