pub mod factory;
pub mod sale;

pub use factory::SaleCreated;
pub use sale::{Claimed, MetaUpdated, SaleLaunched, TokensBought, TokensSold, ISale};
