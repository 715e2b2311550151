pub mod balance_oracle;
pub mod parser;
pub mod worker;

pub use balance_oracle::SaleBalanceOracle;
pub use parser::{decode_log, event_signatures, parse_logs, ParseResult};
pub use worker::SaleWorker;
