pub mod aggregation;
pub mod catalog;
mod errors;
pub mod sct_model;

pub use aggregation::*;
pub use catalog::*;
pub use errors::*;
pub use sct_model::*;
