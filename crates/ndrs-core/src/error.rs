//! Error types shared across the engine

use thiserror::Error;

/// Engine-wide error type.
///
/// Each variant corresponds to one ABI status code; the mapping to the
/// numeric ND_E_* values lives in the ABI crate.
#[derive(Error, Debug, Clone)]
pub enum NdError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("invalid dtype: {0}")]
    InvalidDtype(String),

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("invalid strides: {0}")]
    InvalidStrides(String),

    #[error("invalid alignment: {0}")]
    InvalidAlignment(String),

    #[error("stale handle")]
    StaleHandle,

    #[error("out of memory: {0}")]
    Oom(String),

    #[error("not contiguous: {0}")]
    NotContiguous(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NdError>;
