//! A group of sub-features sharing binned storage.
//!
//! Packed groups multiplex all sub-features into one physical column
//! through disjoint `bin_offsets` windows; they rely on the sub-features
//! being mutually exclusive (at most one non-elided value per row).
//! Multi-val groups keep one independent column per sub-feature. In both
//! layouts the most frequent bin of each sub-feature is elided from
//! storage and stored code 0 means "elided".

use log::debug;
use rayon::prelude::*;

use crate::core::constants::{MAX_NUM_FEATURE, SPARSE_THRESHOLD};
use crate::core::error::{BinFeatError, Result};
use crate::core::types::DataSize;
use crate::core::utils::binary_writer::BinaryWriter;
use crate::core::utils::byte_buffer::ByteCursor;
use crate::io::bin::{Bin, BinFactory, BinIterator, BinMapper, BinType};

/// Physical storage of a group.
#[derive(Clone)]
enum GroupBins {
    /// All sub-features share one column addressed through bin offsets.
    Packed(Box<dyn Bin>),
    /// One column per sub-feature, each in its own local code space.
    MultiVal(Vec<Box<dyn Bin>>),
}

#[derive(Clone)]
pub struct FeatureGroup {
    num_feature: usize,
    bin_mappers: Vec<BinMapper>,
    /// Packed-mode base code of each sub-feature, plus one past-the-end
    /// entry; `bin_offsets[0] == 1` because 0 is the elision sentinel.
    bin_offsets: Vec<u32>,
    bins: GroupBins,
    is_sparse: bool,
    num_total_bin: i32,
    num_data: DataSize,
    loaded: bool,
}

/// Cumulative code-space layout. Each sub-feature contributes
/// `num_bin - 1` codes when its most frequent bin is 0 (the elided bin
/// needs no code), `num_bin` otherwise.
fn calc_bin_offsets(bin_mappers: &[BinMapper]) -> (Vec<u32>, i32) {
    let mut num_total_bin: i32 = 1;
    let mut bin_offsets = Vec::with_capacity(bin_mappers.len() + 1);
    bin_offsets.push(num_total_bin as u32);
    for mapper in bin_mappers {
        let mut num_bin = mapper.num_bin();
        if mapper.most_freq_bin() == 0 {
            num_bin -= 1;
        }
        num_total_bin += num_bin;
        bin_offsets.push(num_total_bin as u32);
    }
    (bin_offsets, num_total_bin)
}

impl FeatureGroup {
    /// Group `num_feature` mapped sub-features over `num_data` rows.
    ///
    /// Packed groups store densely unless they hold a single sub-feature
    /// whose sparse rate reaches [`SPARSE_THRESHOLD`]; multi-val groups
    /// pick dense or sparse per sub-feature.
    pub fn new(
        num_feature: usize,
        is_multi_val: bool,
        bin_mappers: Vec<BinMapper>,
        num_data: DataSize,
    ) -> Result<Self> {
        Self::check_mappers(num_feature, &bin_mappers)?;
        let (bin_offsets, num_total_bin) = calc_bin_offsets(&bin_mappers);
        let mut is_sparse = false;
        let bins = if is_multi_val {
            let columns = bin_mappers
                .iter()
                .map(|mapper| {
                    let addi = (mapper.most_freq_bin() != 0) as i32;
                    if mapper.sparse_rate() >= SPARSE_THRESHOLD {
                        BinFactory::create_sparse_bin(num_data, mapper.num_bin() + addi)
                    } else {
                        BinFactory::create_dense_bin(num_data, mapper.num_bin() + addi)
                    }
                })
                .collect();
            GroupBins::MultiVal(columns)
        } else {
            is_sparse =
                num_feature == 1 && bin_mappers[0].sparse_rate() >= SPARSE_THRESHOLD;
            let column = if is_sparse {
                BinFactory::create_sparse_bin(num_data, num_total_bin)
            } else {
                BinFactory::create_dense_bin(num_data, num_total_bin)
            };
            GroupBins::Packed(column)
        };
        debug!(
            "feature group: {} sub-features, {} total bins, multi_val={}, sparse={}",
            num_feature, num_total_bin, is_multi_val, is_sparse
        );
        Ok(FeatureGroup {
            num_feature,
            bin_mappers,
            bin_offsets,
            bins,
            is_sparse,
            num_total_bin,
            num_data,
            loaded: false,
        })
    }

    /// Single-feature group with storage forced dense regardless of the
    /// mapper's sparse rate.
    pub fn new_single(bin_mappers: Vec<BinMapper>, num_data: DataSize) -> Result<Self> {
        Self::check_mappers(1, &bin_mappers)?;
        let (bin_offsets, num_total_bin) = calc_bin_offsets(&bin_mappers);
        Ok(FeatureGroup {
            num_feature: 1,
            bin_mappers,
            bin_offsets,
            bins: GroupBins::Packed(BinFactory::create_dense_bin(num_data, num_total_bin)),
            is_sparse: false,
            num_total_bin,
            num_data,
            loaded: false,
        })
    }

    /// Shape copy: same mappers, offsets and storage layout as `other`,
    /// with fresh empty columns over `num_data` rows.
    pub fn from_other(other: &FeatureGroup, num_data: DataSize) -> Result<Self> {
        let bins = match &other.bins {
            GroupBins::Packed(_) => {
                let column = if other.is_sparse {
                    BinFactory::create_sparse_bin(num_data, other.num_total_bin)
                } else {
                    BinFactory::create_dense_bin(num_data, other.num_total_bin)
                };
                GroupBins::Packed(column)
            }
            GroupBins::MultiVal(_) => {
                let columns = other
                    .bin_mappers
                    .iter()
                    .map(|mapper| {
                        let addi = (mapper.most_freq_bin() != 0) as i32;
                        if mapper.sparse_rate() >= SPARSE_THRESHOLD {
                            BinFactory::create_sparse_bin(num_data, mapper.num_bin() + addi)
                        } else {
                            BinFactory::create_dense_bin(num_data, mapper.num_bin() + addi)
                        }
                    })
                    .collect();
                GroupBins::MultiVal(columns)
            }
        };
        Ok(FeatureGroup {
            num_feature: other.num_feature,
            bin_mappers: other.bin_mappers.clone(),
            bin_offsets: other.bin_offsets.clone(),
            bins,
            is_sparse: other.is_sparse,
            num_total_bin: other.num_total_bin,
            num_data,
            loaded: false,
        })
    }

    /// Rebuild a group from its stable image, optionally keeping only
    /// `local_used_indices` (sorted) with rows renumbered densely.
    ///
    /// Returns the group and the source-image bytes consumed, which can
    /// exceed the rebuilt group's own [`FeatureGroup::sizes_in_byte`]
    /// when a subset is taken.
    pub fn from_bytes(
        buffer: &[u8],
        num_all_rows: DataSize,
        local_used_indices: Option<&[DataSize]>,
    ) -> Result<(Self, usize)> {
        let mut cursor = ByteCursor::new(buffer);
        let is_multi_val = cursor.read_u8()? != 0;
        let is_sparse = cursor.read_u8()? != 0;
        let num_feature = cursor.read_i32()?;
        if num_feature <= 0 || num_feature > MAX_NUM_FEATURE {
            return Err(BinFeatError::corrupt(format!(
                "group header claims {num_feature} sub-features"
            )));
        }
        let num_feature = num_feature as usize;
        let mut bin_mappers = Vec::with_capacity(num_feature);
        for _ in 0..num_feature {
            bin_mappers.push(BinMapper::from_bytes(&mut cursor)?);
        }
        let (bin_offsets, num_total_bin) = calc_bin_offsets(&bin_mappers);
        let num_data = local_used_indices
            .map(|indices| indices.len() as DataSize)
            .unwrap_or(num_all_rows);

        let mut position = cursor.position();
        let mut load_column = |column: &mut Box<dyn Bin>| -> Result<()> {
            let consumed =
                column.load_from_memory(&buffer[position..], num_all_rows, local_used_indices)?;
            position += consumed;
            Ok(())
        };

        let bins = if is_multi_val {
            let mut columns = Vec::with_capacity(num_feature);
            for mapper in &bin_mappers {
                let addi = (mapper.most_freq_bin() != 0) as i32;
                let mut column = if mapper.sparse_rate() >= SPARSE_THRESHOLD {
                    BinFactory::create_sparse_bin(num_data, mapper.num_bin() + addi)
                } else {
                    BinFactory::create_dense_bin(num_data, mapper.num_bin() + addi)
                };
                load_column(&mut column)?;
                columns.push(column);
            }
            GroupBins::MultiVal(columns)
        } else {
            let mut column = if is_sparse {
                BinFactory::create_sparse_bin(num_data, num_total_bin)
            } else {
                BinFactory::create_dense_bin(num_data, num_total_bin)
            };
            load_column(&mut column)?;
            GroupBins::Packed(column)
        };

        Ok((
            FeatureGroup {
                num_feature,
                bin_mappers,
                bin_offsets,
                bins,
                is_sparse,
                num_total_bin,
                num_data,
                loaded: true,
            },
            position,
        ))
    }

    fn check_mappers(num_feature: usize, bin_mappers: &[BinMapper]) -> Result<()> {
        if num_feature == 0 || num_feature > MAX_NUM_FEATURE as usize {
            return Err(BinFeatError::precondition(format!(
                "num_feature {num_feature} outside (0, {MAX_NUM_FEATURE}]"
            )));
        }
        if bin_mappers.len() != num_feature {
            return Err(BinFeatError::precondition(format!(
                "{} mappers for {} sub-features",
                bin_mappers.len(),
                num_feature
            )));
        }
        Ok(())
    }

    /// Store one value. Pushing the mapper's most frequent bin is a
    /// no-op. Caller contract: rows are partitioned across threads and
    /// `tid` identifies the pushing thread.
    pub fn push(&self, tid: usize, sub_feature: usize, row: DataSize, value: f64) {
        assert!(!self.loaded, "push after finish_load");
        debug_assert!(row >= 0 && row < self.num_data);
        let mapper = &self.bin_mappers[sub_feature];
        let mut bin = mapper.value_to_bin(value);
        if bin == mapper.most_freq_bin() {
            return;
        }
        if mapper.most_freq_bin() == 0 {
            bin -= 1;
        }
        match &self.bins {
            GroupBins::Packed(column) => {
                column.push(tid, row, bin + self.bin_offsets[sub_feature]);
            }
            GroupBins::MultiVal(columns) => {
                columns[sub_feature].push(tid, row, bin + 1);
            }
        }
    }

    /// Seal the group. The barrier between loading and reading; exactly
    /// one call. Multi-val columns are sealed in parallel and the first
    /// failure is reported.
    pub fn finish_load(&mut self) -> Result<()> {
        if self.loaded {
            return Err(BinFeatError::precondition(
                "finish_load called twice on a feature group",
            ));
        }
        match &mut self.bins {
            GroupBins::Packed(column) => column.finish_load()?,
            GroupBins::MultiVal(columns) => {
                columns
                    .par_iter_mut()
                    .try_for_each(|column| column.finish_load())?;
            }
        }
        self.loaded = true;
        Ok(())
    }

    /// Iterate one sub-feature's codes in mapper space.
    pub fn sub_feature_iterator(&self, sub_feature: usize) -> Box<dyn BinIterator + '_> {
        assert!(self.loaded, "iterator before finish_load");
        let mapper = &self.bin_mappers[sub_feature];
        let most_freq_bin = mapper.most_freq_bin();
        match &self.bins {
            GroupBins::Packed(column) => {
                let min_bin = self.bin_offsets[sub_feature];
                let max_bin = self.bin_offsets[sub_feature + 1] - 1;
                column.get_iterator(min_bin, max_bin, most_freq_bin)
            }
            GroupBins::MultiVal(columns) => {
                let addi = (most_freq_bin != 0) as u32;
                let max_bin = mapper.num_bin() as u32 - 1 + addi;
                columns[sub_feature].get_iterator(1, max_bin, most_freq_bin)
            }
        }
    }

    /// Iterate the whole packed code space raw (group-space codes, no
    /// per-feature normalization). `None` for multi-val groups, whose
    /// sub-features have no shared code space.
    pub fn feature_group_iterator(&self) -> Option<Box<dyn BinIterator + '_>> {
        assert!(self.loaded, "iterator before finish_load");
        match &self.bins {
            GroupBins::Packed(column) => {
                let min_bin = self.bin_offsets[0];
                let max_bin = (self.num_total_bin - 1) as u32;
                Some(column.get_iterator(min_bin, max_bin, 0))
            }
            GroupBins::MultiVal(_) => None,
        }
    }

    /// Partition `data_indices` by a split on `sub_feature`.
    ///
    /// For numerical sub-features `threshold` holds one mapper-space bin
    /// code; for categorical ones it is a packed bitset of mapper-space
    /// codes. Returns the count routed to `lte_indices`; both output
    /// sides preserve the input order.
    pub fn split(
        &self,
        sub_feature: usize,
        threshold: &[u32],
        default_left: bool,
        data_indices: &[DataSize],
        lte_indices: &mut [DataSize],
        gt_indices: &mut [DataSize],
    ) -> DataSize {
        assert!(self.loaded, "split before finish_load");
        let mapper = &self.bin_mappers[sub_feature];
        let most_freq_bin = mapper.most_freq_bin();
        let (column, min_bin, max_bin, single) = match &self.bins {
            GroupBins::Packed(column) => (
                column.as_ref(),
                self.bin_offsets[sub_feature],
                self.bin_offsets[sub_feature + 1] - 1,
                self.num_feature == 1,
            ),
            GroupBins::MultiVal(columns) => {
                let addi = (most_freq_bin != 0) as u32;
                (
                    columns[sub_feature].as_ref(),
                    1,
                    mapper.num_bin() as u32 - 1 + addi,
                    false,
                )
            }
        };
        match mapper.bin_type() {
            BinType::Numerical => {
                if single {
                    column.split_no_min_bin(
                        max_bin,
                        mapper.default_bin(),
                        most_freq_bin,
                        mapper.missing_type(),
                        default_left,
                        threshold[0],
                        data_indices,
                        lte_indices,
                        gt_indices,
                    )
                } else {
                    column.split(
                        min_bin,
                        max_bin,
                        mapper.default_bin(),
                        most_freq_bin,
                        mapper.missing_type(),
                        default_left,
                        threshold[0],
                        data_indices,
                        lte_indices,
                        gt_indices,
                    )
                }
            }
            BinType::Categorical => {
                if single {
                    column.split_categorical_no_min_bin(
                        max_bin,
                        most_freq_bin,
                        threshold,
                        data_indices,
                        lte_indices,
                        gt_indices,
                    )
                } else {
                    column.split_categorical(
                        min_bin,
                        max_bin,
                        most_freq_bin,
                        threshold,
                        data_indices,
                        lte_indices,
                        gt_indices,
                    )
                }
            }
        }
    }

    pub fn resize(&mut self, num_data: DataSize) {
        match &mut self.bins {
            GroupBins::Packed(column) => column.resize(num_data),
            GroupBins::MultiVal(columns) => {
                for column in columns {
                    column.resize(num_data);
                }
            }
        }
        self.num_data = num_data;
    }

    /// Rebuild this group from the selected rows of `full_group`.
    /// The source must share this group's layout (built through
    /// [`FeatureGroup::from_other`]).
    pub fn copy_subrow(
        &mut self,
        full_group: &FeatureGroup,
        used_indices: &[DataSize],
    ) -> Result<()> {
        match (&mut self.bins, &full_group.bins) {
            (GroupBins::Packed(dst), GroupBins::Packed(src)) => {
                dst.copy_subrow(src.as_ref(), used_indices)?;
            }
            (GroupBins::MultiVal(dst), GroupBins::MultiVal(src)) => {
                if dst.len() != src.len() {
                    return Err(BinFeatError::precondition(
                        "copy_subrow source has a different column count",
                    ));
                }
                for (dst_col, src_col) in dst.iter_mut().zip(src) {
                    dst_col.copy_subrow(src_col.as_ref(), used_indices)?;
                }
            }
            _ => {
                return Err(BinFeatError::precondition(
                    "copy_subrow source has a different storage layout",
                ));
            }
        }
        self.num_data = used_indices.len() as DataSize;
        self.loaded = true;
        Ok(())
    }

    /// Representative raw value of a mapper-space bin code.
    pub fn bin_to_value(&self, sub_feature: usize, bin: u32) -> f64 {
        self.bin_mappers[sub_feature].bin_to_value(bin)
    }

    /// Write the stable image: 6-byte header, mapper images, column
    /// image(s). Returns bytes written.
    pub fn save_binary(&self, writer: &mut dyn BinaryWriter) -> Result<usize> {
        let header = [self.is_multi_val() as u8, self.is_sparse as u8];
        let mut written = writer.write(&header)?;
        written += writer.write(&(self.num_feature as i32).to_le_bytes())?;
        if written != 6 {
            return Err(BinFeatError::ShortWrite {
                written,
                expected: 6,
            });
        }
        for mapper in &self.bin_mappers {
            written += mapper.save_binary(writer)?;
        }
        match &self.bins {
            GroupBins::Packed(column) => {
                written += column.save_binary(writer)?;
            }
            GroupBins::MultiVal(columns) => {
                for column in columns {
                    written += column.save_binary(writer)?;
                }
            }
        }
        Ok(written)
    }

    /// Exact byte size of [`FeatureGroup::save_binary`]'s output.
    pub fn sizes_in_byte(&self) -> usize {
        let mut total = 6;
        for mapper in &self.bin_mappers {
            total += mapper.sizes_in_byte();
        }
        match &self.bins {
            GroupBins::Packed(column) => total += column.sizes_in_byte(),
            GroupBins::MultiVal(columns) => {
                for column in columns {
                    total += column.sizes_in_byte();
                }
            }
        }
        total
    }

    pub fn num_feature(&self) -> usize {
        self.num_feature
    }

    pub fn num_data(&self) -> DataSize {
        self.num_data
    }

    pub fn is_multi_val(&self) -> bool {
        matches!(self.bins, GroupBins::MultiVal(_))
    }

    pub fn is_sparse(&self) -> bool {
        self.is_sparse
    }

    pub fn num_total_bin(&self) -> i32 {
        self.num_total_bin
    }

    pub fn bin_offsets(&self) -> &[u32] {
        &self.bin_offsets
    }

    pub fn bin_mapper(&self, sub_feature: usize) -> &BinMapper {
        &self.bin_mappers[sub_feature]
    }

    /// Lowest stored code of a sub-feature's window.
    pub fn feature_min_bin(&self, sub_feature: usize) -> u32 {
        if self.is_multi_val() {
            1
        } else {
            self.bin_offsets[sub_feature]
        }
    }

    /// Highest stored code of a sub-feature's window.
    pub fn feature_max_bin(&self, sub_feature: usize) -> u32 {
        if self.is_multi_val() {
            let mapper = &self.bin_mappers[sub_feature];
            let addi = (mapper.most_freq_bin() != 0) as u32;
            mapper.num_bin() as u32 - 1 + addi
        } else {
            self.bin_offsets[sub_feature + 1] - 1
        }
    }
}
