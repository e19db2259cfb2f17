//! Bin mapper metadata and the storage-agnostic bin column interface.
//!
//! A [`BinMapper`] translates raw feature values into small integer bin
//! codes; a [`Bin`] stores one physical column of codes (dense or sparse,
//! see [`DenseBin`](crate::io::dense_bin::DenseBin) and
//! [`SparseBin`](crate::io::sparse_bin::SparseBin)); a [`BinIterator`]
//! reads codes back in mapper space. [`BinFactory`] picks the lane width
//! from the code-space size.

use std::any::Any;
use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::constants::MAX_NUM_BIN;
use crate::core::error::{BinFeatError, Result};
use crate::core::types::{BinIndex, DataSize};
use crate::core::utils::binary_writer::BinaryWriter;
use crate::core::utils::byte_buffer::ByteCursor;
use crate::io::dense_bin::DenseBin;
use crate::io::sparse_bin::SparseBin;

/// How missing values were encoded when the feature was quantized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingType {
    /// No missing values in this feature.
    None,
    /// Zero acts as the missing value.
    Zero,
    /// NaN acts as the missing value and owns a dedicated bin.
    Nan,
}

impl MissingType {
    fn to_u8(self) -> u8 {
        match self {
            MissingType::None => 0,
            MissingType::Zero => 1,
            MissingType::Nan => 2,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MissingType::None),
            1 => Ok(MissingType::Zero),
            2 => Ok(MissingType::Nan),
            other => Err(BinFeatError::corrupt(format!(
                "invalid missing type tag {other}"
            ))),
        }
    }
}

/// Whether a feature is thresholded or category-matched at splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinType {
    Numerical,
    Categorical,
}

impl BinType {
    fn to_u8(self) -> u8 {
        match self {
            BinType::Numerical => 0,
            BinType::Categorical => 1,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(BinType::Numerical),
            1 => Ok(BinType::Categorical),
            other => Err(BinFeatError::corrupt(format!("invalid bin type tag {other}"))),
        }
    }
}

/// Per-feature quantization metadata, immutable after construction.
///
/// Maps raw `f64` values into `[0, num_bin)` codes and back, and carries
/// the most-frequent-bin / default-bin markers the storage layer uses for
/// elision and missing-value routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinMapper {
    num_bin: i32,
    bin_type: BinType,
    missing_type: MissingType,
    sparse_rate: f64,
    default_bin: u32,
    most_freq_bin: u32,
    /// Upper bound of each numerical bin; the last finite entry is
    /// `f64::INFINITY`, and under [`MissingType::Nan`] a trailing NaN slot
    /// follows it.
    bin_upper_bound: Vec<f64>,
    /// Raw category code for each categorical bin.
    bin_2_categorical: Vec<i32>,
    categorical_2_bin: HashMap<i32, u32>,
}

impl BinMapper {
    /// Build a numerical mapper from its bin threshold table.
    pub fn numerical(
        bin_upper_bound: Vec<f64>,
        missing_type: MissingType,
        most_freq_bin: u32,
        default_bin: u32,
        sparse_rate: f64,
    ) -> Result<Self> {
        let num_bin = bin_upper_bound.len() as i32;
        Self::check_shape(num_bin, most_freq_bin, default_bin)?;
        Ok(BinMapper {
            num_bin,
            bin_type: BinType::Numerical,
            missing_type,
            sparse_rate,
            default_bin,
            most_freq_bin,
            bin_upper_bound,
            bin_2_categorical: Vec::new(),
            categorical_2_bin: HashMap::new(),
        })
    }

    /// Build a categorical mapper from the per-bin category codes.
    pub fn categorical(
        categories: Vec<i32>,
        missing_type: MissingType,
        most_freq_bin: u32,
        default_bin: u32,
        sparse_rate: f64,
    ) -> Result<Self> {
        let num_bin = categories.len() as i32;
        Self::check_shape(num_bin, most_freq_bin, default_bin)?;
        let mut categorical_2_bin = HashMap::with_capacity(categories.len());
        for (bin, &cat) in categories.iter().enumerate() {
            if cat < 0 {
                warn!("negative category code {} for bin {}", cat, bin);
            }
            categorical_2_bin.insert(cat, bin as u32);
        }
        Ok(BinMapper {
            num_bin,
            bin_type: BinType::Categorical,
            missing_type,
            sparse_rate,
            default_bin,
            most_freq_bin,
            bin_upper_bound: Vec::new(),
            bin_2_categorical: categories,
            categorical_2_bin,
        })
    }

    fn check_shape(num_bin: i32, most_freq_bin: u32, default_bin: u32) -> Result<()> {
        if num_bin <= 0 || num_bin > MAX_NUM_BIN {
            return Err(BinFeatError::precondition(format!(
                "num_bin {num_bin} outside (0, {MAX_NUM_BIN}]"
            )));
        }
        if most_freq_bin as i32 >= num_bin {
            return Err(BinFeatError::precondition(format!(
                "most_freq_bin {most_freq_bin} >= num_bin {num_bin}"
            )));
        }
        if default_bin as i32 >= num_bin {
            return Err(BinFeatError::precondition(format!(
                "default_bin {default_bin} >= num_bin {num_bin}"
            )));
        }
        Ok(())
    }

    pub fn num_bin(&self) -> i32 {
        self.num_bin
    }

    pub fn bin_type(&self) -> BinType {
        self.bin_type
    }

    pub fn missing_type(&self) -> MissingType {
        self.missing_type
    }

    pub fn sparse_rate(&self) -> f64 {
        self.sparse_rate
    }

    pub fn default_bin(&self) -> u32 {
        self.default_bin
    }

    pub fn most_freq_bin(&self) -> u32 {
        self.most_freq_bin
    }

    /// A mapper with a single bin carries no information.
    pub fn is_trivial(&self) -> bool {
        self.num_bin <= 1
    }

    /// Map a raw value to its bin code.
    ///
    /// NaN values and unseen categories map to `default_bin`.
    pub fn value_to_bin(&self, value: f64) -> u32 {
        if value.is_nan() {
            return self.default_bin;
        }
        match self.bin_type {
            BinType::Numerical => {
                // Search only the finite prefix; the NaN slot (if any) is
                // reached through the default_bin path above.
                let searchable = self.bin_upper_bound.len()
                    - (self.missing_type == MissingType::Nan) as usize;
                if searchable == 0 {
                    return self.default_bin;
                }
                let bounds = &self.bin_upper_bound[..searchable];
                let pos = bounds.partition_point(|&upper| upper < value);
                pos.min(searchable - 1) as u32
            }
            BinType::Categorical => {
                let cat = value as i32;
                match self.categorical_2_bin.get(&cat) {
                    Some(&bin) => bin,
                    None => self.default_bin,
                }
            }
        }
    }

    /// Map a bin code back to a representative raw value.
    pub fn bin_to_value(&self, bin: u32) -> f64 {
        match self.bin_type {
            BinType::Categorical => self.bin_2_categorical[bin as usize] as f64,
            BinType::Numerical => {
                let idx = bin as usize;
                if self.missing_type == MissingType::Nan
                    && idx == self.bin_upper_bound.len() - 1
                {
                    return f64::NAN;
                }
                let upper = self.bin_upper_bound[idx];
                if idx == 0 {
                    upper
                } else if upper.is_infinite() {
                    self.bin_upper_bound[idx - 1]
                } else {
                    (self.bin_upper_bound[idx - 1] + upper) / 2.0
                }
            }
        }
    }

    /// Exact byte size of [`BinMapper::save_binary`]'s output.
    pub fn sizes_in_byte(&self) -> usize {
        let table = match self.bin_type {
            BinType::Numerical => self.num_bin as usize * 8,
            BinType::Categorical => self.num_bin as usize * 4,
        };
        1 + 1 + 4 + 4 + 4 + 8 + table
    }

    /// Write the stable little-endian image. Returns bytes written.
    pub fn save_binary(&self, writer: &mut dyn BinaryWriter) -> Result<usize> {
        let mut image = Vec::with_capacity(self.sizes_in_byte());
        image.push(self.bin_type.to_u8());
        image.push(self.missing_type.to_u8());
        image.extend_from_slice(&self.num_bin.to_le_bytes());
        image.extend_from_slice(&self.default_bin.to_le_bytes());
        image.extend_from_slice(&self.most_freq_bin.to_le_bytes());
        image.extend_from_slice(&self.sparse_rate.to_le_bytes());
        match self.bin_type {
            BinType::Numerical => {
                for &upper in &self.bin_upper_bound {
                    image.extend_from_slice(&upper.to_le_bytes());
                }
            }
            BinType::Categorical => {
                for &cat in &self.bin_2_categorical {
                    image.extend_from_slice(&cat.to_le_bytes());
                }
            }
        }
        let written = writer.write(&image)?;
        if written != image.len() {
            return Err(BinFeatError::ShortWrite {
                written,
                expected: image.len(),
            });
        }
        Ok(written)
    }

    /// Read a mapper image back; advances the cursor past it.
    pub fn from_bytes(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let bin_type = BinType::from_u8(cursor.read_u8()?)?;
        let missing_type = MissingType::from_u8(cursor.read_u8()?)?;
        let num_bin = cursor.read_i32()?;
        if num_bin <= 0 || num_bin > MAX_NUM_BIN {
            return Err(BinFeatError::corrupt(format!(
                "mapper num_bin {num_bin} outside (0, {MAX_NUM_BIN}]"
            )));
        }
        let default_bin = cursor.read_u32()?;
        let most_freq_bin = cursor.read_u32()?;
        if default_bin as i32 >= num_bin || most_freq_bin as i32 >= num_bin {
            return Err(BinFeatError::corrupt(format!(
                "mapper bin markers ({default_bin}, {most_freq_bin}) >= num_bin {num_bin}"
            )));
        }
        let sparse_rate = cursor.read_f64()?;
        match bin_type {
            BinType::Numerical => {
                let mut bin_upper_bound = Vec::with_capacity(num_bin as usize);
                for _ in 0..num_bin {
                    bin_upper_bound.push(cursor.read_f64()?);
                }
                Ok(BinMapper {
                    num_bin,
                    bin_type,
                    missing_type,
                    sparse_rate,
                    default_bin,
                    most_freq_bin,
                    bin_upper_bound,
                    bin_2_categorical: Vec::new(),
                    categorical_2_bin: HashMap::new(),
                })
            }
            BinType::Categorical => {
                let mut bin_2_categorical = Vec::with_capacity(num_bin as usize);
                for _ in 0..num_bin {
                    bin_2_categorical.push(cursor.read_i32()?);
                }
                let categorical_2_bin = bin_2_categorical
                    .iter()
                    .enumerate()
                    .map(|(bin, &cat)| (cat, bin as u32))
                    .collect();
                Ok(BinMapper {
                    num_bin,
                    bin_type,
                    missing_type,
                    sparse_rate,
                    default_bin,
                    most_freq_bin,
                    bin_upper_bound: Vec::new(),
                    bin_2_categorical,
                    categorical_2_bin,
                })
            }
        }
    }
}

/// Physical code width of a bin column.
pub trait Lane: Copy + Default + Send + Sync + 'static {
    const BYTES: usize;
    fn to_u32(self) -> u32;
    fn from_u32(value: u32) -> Self;
    fn append_le(self, out: &mut Vec<u8>);
    /// Read one value from exactly [`Lane::BYTES`] bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

impl Lane for u8 {
    const BYTES: usize = 1;
    fn to_u32(self) -> u32 {
        self as u32
    }
    fn from_u32(value: u32) -> Self {
        value as u8
    }
    fn append_le(self, out: &mut Vec<u8>) {
        out.push(self);
    }
    fn read_le(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl Lane for u16 {
    const BYTES: usize = 2;
    fn to_u32(self) -> u32 {
        self as u32
    }
    fn from_u32(value: u32) -> Self {
        value as u16
    }
    fn append_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn read_le(bytes: &[u8]) -> Self {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }
}

impl Lane for u32 {
    const BYTES: usize = 4;
    fn to_u32(self) -> u32 {
        self
    }
    fn from_u32(value: u32) -> Self {
        value
    }
    fn append_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn read_le(bytes: &[u8]) -> Self {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Cursor over one column's stored codes.
///
/// `&mut self` because the sparse cursor advances; calling `get` with
/// decreasing rows resets it through the fast index.
pub trait BinIterator {
    /// Mapper-space bin code at `row` ([`min, max`] window normalization
    /// applied, elided rows synthesized as the most frequent bin).
    fn get(&mut self, row: DataSize) -> BinIndex;
    /// Raw stored code at `row` (0 for elided rows).
    fn raw_get(&mut self, row: DataSize) -> BinIndex;
    /// Reposition the cursor at `row`.
    fn reset(&mut self, row: DataSize);
}

/// One physical column of stored bin codes.
///
/// Loading follows a strict lifecycle: `push` from loader threads (each
/// row pushed by exactly one thread), then `finish_load` once as the
/// barrier, then reads (`get_iterator`, `split*`).
pub trait Bin: Send + Sync {
    /// Store `code` at `row`. Caller contract: no two threads push the
    /// same row, and `tid` is stable per thread.
    fn push(&self, tid: usize, row: DataSize, code: u32);

    /// Seal the column. Errors on duplicate rows and on a second call.
    fn finish_load(&mut self) -> Result<()>;

    fn resize(&mut self, num_data: DataSize);

    fn num_data(&self) -> DataSize;

    fn get_iterator<'a>(
        &'a self,
        min_bin: u32,
        max_bin: u32,
        most_freq_bin: u32,
    ) -> Box<dyn BinIterator + 'a>;

    /// Partition `data_indices` against a numerical threshold in mapper
    /// space. Returns the count routed to `lte_indices`; the remainder
    /// lands in `gt_indices`, relative order preserved on both sides.
    #[allow(clippy::too_many_arguments)]
    fn split(
        &self,
        min_bin: u32,
        max_bin: u32,
        default_bin: u32,
        most_freq_bin: u32,
        missing_type: MissingType,
        default_left: bool,
        threshold: u32,
        data_indices: &[DataSize],
        lte_indices: &mut [DataSize],
        gt_indices: &mut [DataSize],
    ) -> DataSize;

    /// [`Bin::split`] for a column holding a single sub-feature, where
    /// the in-window test degenerates to `raw != 0`.
    #[allow(clippy::too_many_arguments)]
    fn split_no_min_bin(
        &self,
        max_bin: u32,
        default_bin: u32,
        most_freq_bin: u32,
        missing_type: MissingType,
        default_left: bool,
        threshold: u32,
        data_indices: &[DataSize],
        lte_indices: &mut [DataSize],
        gt_indices: &mut [DataSize],
    ) -> DataSize;

    /// Partition by membership of the mapper-space bin in `bitset`.
    #[allow(clippy::too_many_arguments)]
    fn split_categorical(
        &self,
        min_bin: u32,
        max_bin: u32,
        most_freq_bin: u32,
        bitset: &[u32],
        data_indices: &[DataSize],
        lte_indices: &mut [DataSize],
        gt_indices: &mut [DataSize],
    ) -> DataSize;

    #[allow(clippy::too_many_arguments)]
    fn split_categorical_no_min_bin(
        &self,
        max_bin: u32,
        most_freq_bin: u32,
        bitset: &[u32],
        data_indices: &[DataSize],
        lte_indices: &mut [DataSize],
        gt_indices: &mut [DataSize],
    ) -> DataSize;

    /// Rebuild this column from the selected rows of `full_bin` (same
    /// storage variant and lane), renumbering rows densely.
    fn copy_subrow(&mut self, full_bin: &dyn Bin, used_indices: &[DataSize]) -> Result<()>;

    /// Write the stable image. Returns bytes written.
    fn save_binary(&self, writer: &mut dyn BinaryWriter) -> Result<usize>;

    /// Exact byte size of [`Bin::save_binary`]'s output.
    fn sizes_in_byte(&self) -> usize;

    /// Rebuild from a stored image of `num_all_data` rows, optionally
    /// keeping only `local_used_indices` (sorted, renumbered densely).
    /// Returns the source-image bytes consumed, which can exceed this
    /// column's own `sizes_in_byte` when a subset is taken.
    fn load_from_memory(
        &mut self,
        buffer: &[u8],
        num_all_data: DataSize,
        local_used_indices: Option<&[DataSize]>,
    ) -> Result<usize>;

    fn clone_box(&self) -> Box<dyn Bin>;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Bin> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Creates bin columns with the narrowest lane that fits the code space.
pub struct BinFactory;

impl BinFactory {
    pub fn create_dense_bin(num_data: DataSize, num_bin: i32) -> Box<dyn Bin> {
        if num_bin <= 256 {
            Box::new(DenseBin::<u8>::new(num_data))
        } else if num_bin <= 65536 {
            Box::new(DenseBin::<u16>::new(num_data))
        } else {
            Box::new(DenseBin::<u32>::new(num_data))
        }
    }

    pub fn create_sparse_bin(num_data: DataSize, num_bin: i32) -> Box<dyn Bin> {
        if num_bin <= 256 {
            Box::new(SparseBin::<u8>::new(num_data))
        } else if num_bin <= 65536 {
            Box::new(SparseBin::<u16>::new(num_data))
        } else {
            Box::new(SparseBin::<u32>::new(num_data))
        }
    }
}

/// Membership test over a packed `u32` bitset of bin codes.
pub fn find_in_bitset(bitset: &[u32], value: u32) -> bool {
    let word = (value / 32) as usize;
    if word >= bitset.len() {
        return false;
    }
    (bitset[word] >> (value % 32)) & 1 != 0
}

/// Shared numerical-split kernel over any raw-code fetch.
#[allow(clippy::too_many_arguments)]
pub(crate) fn split_numerical_with<F>(
    mut raw_of: F,
    use_min_bin: bool,
    min_bin: u32,
    max_bin: u32,
    default_bin: u32,
    most_freq_bin: u32,
    missing_type: MissingType,
    default_left: bool,
    threshold: u32,
    data_indices: &[DataSize],
    lte_indices: &mut [DataSize],
    gt_indices: &mut [DataSize],
) -> DataSize
where
    F: FnMut(DataSize) -> u32,
{
    let offset = (most_freq_bin == 0) as u32;
    let mut cnt_lte = 0usize;
    let mut cnt_gt = 0usize;
    for &idx in data_indices {
        let raw = raw_of(idx);
        let in_window = if use_min_bin {
            raw >= min_bin && raw <= max_bin
        } else {
            raw != 0
        };
        let bin = if in_window {
            raw - min_bin + offset
        } else {
            most_freq_bin
        };
        let to_left = if missing_type != MissingType::None && bin == default_bin {
            default_left
        } else {
            bin <= threshold
        };
        if to_left {
            lte_indices[cnt_lte] = idx;
            cnt_lte += 1;
        } else {
            gt_indices[cnt_gt] = idx;
            cnt_gt += 1;
        }
    }
    cnt_lte as DataSize
}

/// Shared categorical-split kernel over any raw-code fetch.
#[allow(clippy::too_many_arguments)]
pub(crate) fn split_categorical_with<F>(
    mut raw_of: F,
    use_min_bin: bool,
    min_bin: u32,
    max_bin: u32,
    most_freq_bin: u32,
    bitset: &[u32],
    data_indices: &[DataSize],
    lte_indices: &mut [DataSize],
    gt_indices: &mut [DataSize],
) -> DataSize
where
    F: FnMut(DataSize) -> u32,
{
    let offset = (most_freq_bin == 0) as u32;
    let mut cnt_lte = 0usize;
    let mut cnt_gt = 0usize;
    for &idx in data_indices {
        let raw = raw_of(idx);
        let in_window = if use_min_bin {
            raw >= min_bin && raw <= max_bin
        } else {
            raw != 0
        };
        let bin = if in_window {
            raw - min_bin + offset
        } else {
            most_freq_bin
        };
        if find_in_bitset(bitset, bin) {
            lte_indices[cnt_lte] = idx;
            cnt_lte += 1;
        } else {
            gt_indices[cnt_gt] = idx;
            cnt_gt += 1;
        }
    }
    cnt_lte as DataSize
}
