//! Storage-selection and binary-format constants.

/// Sparse rate at or above which a single-feature column uses sparse
/// storage instead of dense storage.
pub const SPARSE_THRESHOLD: f64 = 0.8;

/// Upper bound on a plausible per-mapper bin count. Deserialized images
/// claiming more bins than this are rejected as corrupt.
pub const MAX_NUM_BIN: i32 = 1 << 24;

/// Upper bound on a plausible sub-feature count in one group image.
pub const MAX_NUM_FEATURE: i32 = 1 << 20;

/// Number of buckets in the sparse bin fast index.
pub const NUM_FAST_INDEX: usize = 64;
