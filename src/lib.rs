pub mod abis;
pub mod config;
pub mod cron;
pub mod db;
pub mod reconciler;
pub mod utils;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::config::Settings;
pub use cron::{CronScheduler, CronSettings};
pub use db::Database;
pub use reconciler::{EventDispatcher, HistoryRepairer, Reconciler};
pub use worker::{SaleBalanceOracle, SaleWorker};
