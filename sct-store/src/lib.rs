pub mod transaction_log;
pub mod transaction_store;

pub use transaction_log::*;
pub use transaction_store::*;
