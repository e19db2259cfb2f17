//! # binfeat
//!
//! A binned columnar feature store for gradient boosted decision tree
//! training. One or more quantized features that share storage are grouped
//! into a [`FeatureGroup`], which converts raw floating-point values to
//! small integer bin codes through per-feature [`BinMapper`] metadata and
//! serves the two operations that dominate training cost: iterating bin
//! codes over a column range (histogram construction) and partitioning a
//! row index set against a split threshold or category set.
//!
//! ## Features
//!
//! - **Dense and sparse storage**, selected per column from the mapper's
//!   sparse rate, behind a common [`Bin`] operation table.
//! - **Most-frequent-bin elision**: the dominant bin of every sub-feature
//!   is never stored; readers synthesize it. Code 0 in packed storage is
//!   the universal elision sentinel.
//! - **Packed multiplexing**: several sub-features share one physical
//!   column through disjoint bin-offset ranges, or keep independent bins
//!   in multi-val mode.
//! - **Lock-free concurrent loading**: rows are pushed from multiple
//!   threads under a row-ownership contract, with `finish_load` as the
//!   barrier before any read.
//! - **Stable binary images** for dataset persistence and distributed row
//!   partitioning (subset deserialization with dense renumbering).
//!
//! ## Quick start
//!
//! ```rust
//! use binfeat::{BinMapper, FeatureGroup, MissingType};
//!
//! # fn main() -> binfeat::Result<()> {
//! let mapper = BinMapper::numerical(
//!     vec![0.5, 1.5, f64::INFINITY],
//!     MissingType::None,
//!     0,   // most frequent bin
//!     0,   // default bin
//!     0.5, // sparse rate
//! )?;
//!
//! let mut group = FeatureGroup::new(1, false, vec![mapper], 4)?;
//! for (row, value) in [0.2, 1.0, 2.0, 0.3].into_iter().enumerate() {
//!     group.push(0, 0, row as i32, value);
//! }
//! group.finish_load()?;
//!
//! let mut iter = group.sub_feature_iterator(0);
//! assert_eq!(iter.get(2), 2);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod io;

pub use crate::core::constants::SPARSE_THRESHOLD;
pub use crate::core::error::{BinFeatError, Result};
pub use crate::core::types::{BinIndex, DataSize};
pub use crate::core::utils::binary_writer::{BinaryWriter, VecBinaryWriter};
pub use crate::io::bin::{Bin, BinFactory, BinIterator, BinMapper, BinType, MissingType};
pub use crate::io::dense_bin::DenseBin;
pub use crate::io::feature_group::FeatureGroup;
pub use crate::io::sparse_bin::SparseBin;
