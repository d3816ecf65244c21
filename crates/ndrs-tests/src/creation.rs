//! Creation and metadata through the ABI
