//! Fundamental data types for the binned feature store.

/// Data indexing type. 32-bit integer supporting up to 2 billion rows.
pub type DataSize = i32;

/// Bin index type for discretized feature values.
pub type BinIndex = u32;
