//! ndrs CPU engine
//!
//! Storage, array views and the compute kernels: elementwise arithmetic
//! and comparisons with broadcasting, `where`, sums (pairwise for
//! floats), and a blocked, cancellable matmul. The C ABI layer in
//! `ndrs-ffi` is a thin shell over this crate.

mod array;
pub mod elementwise;
mod iter;
pub mod matmul;
pub mod reduce;
pub mod simd;
mod storage;

pub use array::NdArray;
pub use elementwise::{add, add_into, div, eq, gt, lt, mul, sub, where_select};
pub use matmul::{matmul, matmul_cancellable};
pub use reduce::{sum_all, sum_axis};
pub use storage::{Storage, StorageOwner, MIN_ALIGN};
