//! ndrs C ABI
//!
//! The boundary between the engine and its hosts: a process-wide handle
//! table with generation-based stale detection, a thread-local error
//! station, the export bridge, the asynchronous job registry, and one
//! `extern "C"` entry point per symbol in `include/ndarray.h`.
//!
//! Builds as both a cdylib (for host FFI) and an rlib (so the shared
//! test suite can exercise the entry points in-process).

pub mod abi;
pub mod export;
pub mod job;
pub mod registry;
pub mod station;

pub use abi::{EXPORTED_SYMBOLS, ND_ABI_VERSION};
pub use station::NdStatus;
