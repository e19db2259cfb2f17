//! Dense bin column: one lane-width slot per row.
//!
//! Elided rows keep the sentinel value 0, so a freshly allocated column
//! is "all most-frequent" until pushed into.

use std::any::Any;

use crate::core::error::{BinFeatError, Result};
use crate::core::types::DataSize;
use crate::core::utils::binary_writer::BinaryWriter;
use crate::core::utils::concurrent::SlotVec;
use crate::io::bin::{
    split_categorical_with, split_numerical_with, Bin, BinIterator, Lane, MissingType,
};

#[derive(Clone)]
pub struct DenseBin<T: Lane> {
    data: SlotVec<T>,
    num_data: DataSize,
}

impl<T: Lane> DenseBin<T> {
    pub fn new(num_data: DataSize) -> Self {
        DenseBin {
            data: SlotVec::new(num_data as usize),
            num_data,
        }
    }

    fn raw(&self, row: DataSize) -> u32 {
        self.data.get(row as usize).to_u32()
    }
}

pub struct DenseBinIterator<'a, T: Lane> {
    bin: &'a DenseBin<T>,
    min_bin: u32,
    max_bin: u32,
    most_freq_bin: u32,
    offset: u32,
}

impl<'a, T: Lane> DenseBinIterator<'a, T> {
    fn new(bin: &'a DenseBin<T>, min_bin: u32, max_bin: u32, most_freq_bin: u32) -> Self {
        DenseBinIterator {
            bin,
            min_bin,
            max_bin,
            most_freq_bin,
            offset: (most_freq_bin == 0) as u32,
        }
    }
}

impl<T: Lane> BinIterator for DenseBinIterator<'_, T> {
    fn get(&mut self, row: DataSize) -> u32 {
        let raw = self.bin.raw(row);
        if raw >= self.min_bin && raw <= self.max_bin {
            raw - self.min_bin + self.offset
        } else {
            self.most_freq_bin
        }
    }

    fn raw_get(&mut self, row: DataSize) -> u32 {
        self.bin.raw(row)
    }

    fn reset(&mut self, _row: DataSize) {}
}

impl<T: Lane> Bin for DenseBin<T> {
    fn push(&self, _tid: usize, row: DataSize, code: u32) {
        // Row-ownership contract: each row is touched by one thread.
        unsafe { self.data.set(row as usize, T::from_u32(code)) };
    }

    fn finish_load(&mut self) -> Result<()> {
        // Dense storage is written in place; nothing to merge.
        Ok(())
    }

    fn resize(&mut self, num_data: DataSize) {
        self.data.resize(num_data as usize);
        self.num_data = num_data;
    }

    fn num_data(&self) -> DataSize {
        self.num_data
    }

    fn get_iterator<'a>(
        &'a self,
        min_bin: u32,
        max_bin: u32,
        most_freq_bin: u32,
    ) -> Box<dyn BinIterator + 'a> {
        Box::new(DenseBinIterator::new(self, min_bin, max_bin, most_freq_bin))
    }

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
    ) -> DataSize {
        split_numerical_with(
            |idx| self.raw(idx),
            true,
            min_bin,
            max_bin,
            default_bin,
            most_freq_bin,
            missing_type,
            default_left,
            threshold,
            data_indices,
            lte_indices,
            gt_indices,
        )
    }

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
    ) -> DataSize {
        split_numerical_with(
            |idx| self.raw(idx),
            false,
            1,
            max_bin,
            default_bin,
            most_freq_bin,
            missing_type,
            default_left,
            threshold,
            data_indices,
            lte_indices,
            gt_indices,
        )
    }

    fn split_categorical(
        &self,
        min_bin: u32,
        max_bin: u32,
        most_freq_bin: u32,
        bitset: &[u32],
        data_indices: &[DataSize],
        lte_indices: &mut [DataSize],
        gt_indices: &mut [DataSize],
    ) -> DataSize {
        split_categorical_with(
            |idx| self.raw(idx),
            true,
            min_bin,
            max_bin,
            most_freq_bin,
            bitset,
            data_indices,
            lte_indices,
            gt_indices,
        )
    }

    fn split_categorical_no_min_bin(
        &self,
        max_bin: u32,
        most_freq_bin: u32,
        bitset: &[u32],
        data_indices: &[DataSize],
        lte_indices: &mut [DataSize],
        gt_indices: &mut [DataSize],
    ) -> DataSize {
        split_categorical_with(
            |idx| self.raw(idx),
            false,
            1,
            max_bin,
            most_freq_bin,
            bitset,
            data_indices,
            lte_indices,
            gt_indices,
        )
    }

    fn copy_subrow(&mut self, full_bin: &dyn Bin, used_indices: &[DataSize]) -> Result<()> {
        let other = full_bin
            .as_any()
            .downcast_ref::<DenseBin<T>>()
            .ok_or_else(|| {
                BinFeatError::precondition("copy_subrow source has a different storage layout")
            })?;
        self.resize(used_indices.len() as DataSize);
        for (row, &idx) in used_indices.iter().enumerate() {
            debug_assert!(idx >= 0 && idx < other.num_data);
            self.data.set_mut(row, other.data.get(idx as usize));
        }
        Ok(())
    }

    fn save_binary(&self, writer: &mut dyn BinaryWriter) -> Result<usize> {
        let mut image = Vec::with_capacity(self.sizes_in_byte());
        for value in self.data.iter() {
            value.append_le(&mut image);
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

    fn sizes_in_byte(&self) -> usize {
        self.num_data as usize * T::BYTES
    }

    fn load_from_memory(
        &mut self,
        buffer: &[u8],
        num_all_data: DataSize,
        local_used_indices: Option<&[DataSize]>,
    ) -> Result<usize> {
        let source_bytes = num_all_data as usize * T::BYTES;
        if buffer.len() < source_bytes {
            return Err(BinFeatError::corrupt(format!(
                "dense image needs {} bytes for {} rows, got {}",
                source_bytes,
                num_all_data,
                buffer.len()
            )));
        }
        let element = |idx: usize| T::read_le(&buffer[idx * T::BYTES..(idx + 1) * T::BYTES]);
        match local_used_indices {
            None => {
                if num_all_data != self.num_data {
                    return Err(BinFeatError::corrupt(format!(
                        "dense image holds {} rows, column expects {}",
                        num_all_data, self.num_data
                    )));
                }
                for row in 0..self.num_data as usize {
                    self.data.set_mut(row, element(row));
                }
            }
            Some(used_indices) => {
                self.resize(used_indices.len() as DataSize);
                for (row, &idx) in used_indices.iter().enumerate() {
                    if idx < 0 || idx >= num_all_data {
                        return Err(BinFeatError::OutOfRange {
                            index: idx as usize,
                            length: num_all_data as usize,
                        });
                    }
                    self.data.set_mut(row, element(idx as usize));
                }
            }
        }
        Ok(source_bytes)
    }

    fn clone_box(&self) -> Box<dyn Bin> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
