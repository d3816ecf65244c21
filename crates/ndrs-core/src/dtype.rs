//! Element types supported by the engine

use serde::{Deserialize, Serialize};

use crate::error::{NdError, Result};

/// Supported element types.
///
/// The ABI codes are part of the stable contract: F32=1, I32=3, F64=4.
/// Code 2 is reserved and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    I32,
    F64,
}

impl DType {
    /// Width of one element in bytes.
    pub fn width(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 => 8,
        }
    }

    /// Whether this dtype is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Stable ABI code for this dtype.
    pub fn code(&self) -> u32 {
        match self {
            DType::F32 => 1,
            DType::I32 => 3,
            DType::F64 => 4,
        }
    }

    /// Decode an ABI dtype code.
    pub fn from_code(code: u32) -> Result<DType> {
        match code {
            1 => Ok(DType::F32),
            3 => Ok(DType::I32),
            4 => Ok(DType::F64),
            other => Err(NdError::InvalidDtype(format!("unknown dtype code {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::I32 => "i32",
            DType::F64 => "f64",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result dtype of a binary operation.
///
/// Equal dtypes keep their type. Mixed pairs resolve toward the float of
/// wider width: (F64, _) -> F64, (F32, I32) -> F32, (I32, F64) -> F64.
pub fn promote(a: DType, b: DType) -> DType {
    if a == b {
        return a;
    }
    match (a, b) {
        (DType::F64, _) | (_, DType::F64) => DType::F64,
        (DType::F32, DType::I32) | (DType::I32, DType::F32) => DType::F32,
        // Both arms above are exhaustive for unequal pairs of three dtypes.
        _ => DType::F64,
    }
}
