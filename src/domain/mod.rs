//! Core ledger types and the ports the application layer depends on.

pub mod account;
pub mod audit;
pub mod interest;
pub mod money;
pub mod ports;
pub mod task;
pub mod transaction;
