pub mod classifier;
pub mod config;
pub mod feature;
pub mod geometry;
pub mod loss;
pub mod patch;

pub use classifier::*;
pub use config::*;
pub use feature::*;
pub use geometry::*;
pub use loss::*;
pub use patch::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("patch geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("empty cohort: {0}")]
    EmptyCohort(String),
}

pub type Result<T> = std::result::Result<T, Error>;
