pub mod data;
pub mod selector;
pub mod stats;
pub mod trainer;

pub use data::*;
pub use selector::*;
pub use stats::*;
pub use trainer::*;

pub type Error = anyboost_core::Error;
pub type Result<T> = anyboost_core::Result<T>;
