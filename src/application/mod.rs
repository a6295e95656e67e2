//! Application layer: the services that orchestrate ledger operations.
//!
//! [`engine::TransactionEngine`] enforces money-movement rules on top of the
//! store ports. Audit events it raises travel through [`audit`] to a queue
//! consumer, and [`interest::InterestScheduler`] drives the same engine on a
//! cron schedule configured through [`rates::RateAdministration`].

pub mod audit;
pub mod cron;
pub mod engine;
pub mod interest;
pub mod rates;
