//! Binned storage: mapper metadata, dense and sparse bin columns, and
//! the feature group that multiplexes sub-features over them.

pub mod bin;
pub mod dense_bin;
pub mod feature_group;
pub mod sparse_bin;
