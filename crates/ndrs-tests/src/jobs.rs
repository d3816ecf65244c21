//! Asynchronous job lifecycle through the ABI
