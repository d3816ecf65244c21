//! Randomized retain/release/lookup sequences against the handle table
