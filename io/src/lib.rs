//! Record framing and binary codecs for anyboost artifacts:
//! - patch and labeled-frame sample files,
//! - feature pool files,
//! - trained classifier files,
//! - PGM/PPM dumps of patches and activation maps,
//! - conversions between `image` buffers and patches.

pub mod frame;
pub mod pnm;
pub mod record;
pub mod wire;

pub use frame::*;
pub use pnm::*;
pub use record::*;
pub use wire::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Core(#[from] anyboost_core::Error),
}

pub type Result<T> = std::result::Result<T, IoError>;
