//! ndrs core - dtypes, layout algebra and shared error types
//!
//! This crate holds everything the engine needs to reason about arrays
//! without touching their bytes: the dtype table with promotion rules,
//! the shape/stride layout algebra (contiguity, reshape, transpose,
//! slice, bounds), and broadcasting. Storage and kernels live in
//! `ndrs-cpu`; the C ABI lives in `ndrs-ffi`.

pub mod broadcast;
pub mod dtype;
pub mod error;
pub mod layout;

pub use broadcast::{broadcast_shapes, broadcast_strides};
pub use dtype::DType;
pub use error::{NdError, Result};
pub use layout::{Layout, SliceSpec};
