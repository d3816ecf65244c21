//! Elementwise arithmetic, comparisons and where through the ABI
