//! Reductions through the ABI
