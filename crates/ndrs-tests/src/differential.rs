//! Differential checks against the `ndarray` crate
//!
//! The original project diffed the engine against NumPy; here the
//! `ndarray` crate plays the oracle for add/sum/sum_axis/matmul/where on
//! randomized f64 inputs.
