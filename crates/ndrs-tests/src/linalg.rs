//! Matmul through the ABI
