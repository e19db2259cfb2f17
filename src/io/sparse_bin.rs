//! Sparse bin column: delta-compressed (row, code) stream.
//!
//! Non-elided rows are stored as a `u8` delta stream plus a value lane.
//! Gaps of 256 or more are bridged by 255-delta spacer entries carrying
//! value 0, and a terminal 0 delta guards cursor overruns. A coarse
//! 64-bucket fast index lets cursors reposition without a full rescan.

use std::any::Any;

use log::debug;

use crate::core::constants::NUM_FAST_INDEX;
use crate::core::error::{BinFeatError, Result};
use crate::core::types::DataSize;
use crate::core::utils::binary_writer::BinaryWriter;
use crate::core::utils::byte_buffer::ByteCursor;
use crate::core::utils::concurrent::PerThreadBuffers;
use crate::io::bin::{
    split_categorical_with, split_numerical_with, Bin, BinIterator, Lane, MissingType,
};

pub struct SparseBin<T: Lane> {
    num_data: DataSize,
    /// Delta stream; always one longer than `vals` (terminal 0).
    deltas: Vec<u8>,
    /// Stored codes; value 0 marks a spacer entry.
    vals: Vec<T>,
    num_vals: DataSize,
    push_buffers: PerThreadBuffers<(DataSize, T)>,
    /// Bucket start cursors: `(i_delta, cur_pos)` of the first entry at
    /// or past each bucket threshold.
    fast_index: Vec<(DataSize, DataSize)>,
    fast_index_shift: u32,
    finished: bool,
}

/// Cursor over the delta stream. `i_delta == -1` is the pre-start state.
struct SparseCursor {
    i_delta: DataSize,
    cur_pos: DataSize,
}

impl<T: Lane> SparseBin<T> {
    pub fn new(num_data: DataSize) -> Self {
        SparseBin {
            num_data,
            deltas: vec![0],
            vals: Vec::new(),
            num_vals: 0,
            push_buffers: PerThreadBuffers::new(),
            fast_index: Vec::new(),
            fast_index_shift: 0,
            finished: false,
        }
    }

    pub fn num_vals(&self) -> DataSize {
        self.num_vals
    }

    /// Advance the cursor one entry. Returns false past the last entry
    /// and parks the position at `num_data`.
    fn next_nonzero(&self, i_delta: &mut DataSize, cur_pos: &mut DataSize) -> bool {
        *i_delta += 1;
        if (*i_delta as usize) < self.deltas.len() {
            *cur_pos += self.deltas[*i_delta as usize] as DataSize;
        }
        if *i_delta < self.num_vals {
            true
        } else {
            *cur_pos = self.num_data;
            false
        }
    }

    fn init_index(&self, start_idx: DataSize, i_delta: &mut DataSize, cur_pos: &mut DataSize) {
        let bucket = (start_idx as usize) >> self.fast_index_shift;
        if bucket < self.fast_index.len() {
            let (entry_delta, entry_pos) = self.fast_index[bucket];
            *i_delta = entry_delta;
            *cur_pos = entry_pos;
        } else {
            *i_delta = -1;
            *cur_pos = 0;
        }
    }

    fn start_cursor(&self) -> SparseCursor {
        let mut cursor = SparseCursor {
            i_delta: -1,
            cur_pos: 0,
        };
        self.init_index(0, &mut cursor.i_delta, &mut cursor.cur_pos);
        cursor
    }

    /// Raw stored code at `idx`, advancing (or resetting) the cursor.
    fn raw_at(&self, cursor: &mut SparseCursor, idx: DataSize) -> u32 {
        if idx < cursor.cur_pos {
            self.init_index(idx, &mut cursor.i_delta, &mut cursor.cur_pos);
        }
        while cursor.cur_pos < idx {
            if !self.next_nonzero(&mut cursor.i_delta, &mut cursor.cur_pos) {
                break;
            }
        }
        if cursor.cur_pos == idx && cursor.i_delta >= 0 && cursor.i_delta < self.num_vals {
            self.vals[cursor.i_delta as usize].to_u32()
        } else {
            0
        }
    }

    /// Rebuild the delta/value streams from sorted, deduplicated pairs.
    fn load_from_pair(&mut self, pairs: &[(DataSize, T)]) {
        self.deltas.clear();
        self.vals.clear();
        self.deltas.reserve(pairs.len());
        self.vals.reserve(pairs.len());

        let mut last_idx: DataSize = 0;
        for &(cur_idx, code) in pairs {
            let mut cur_delta = cur_idx - last_idx;
            while cur_delta >= 256 {
                self.deltas.push(255);
                self.vals.push(T::default());
                cur_delta -= 255;
            }
            self.deltas.push(cur_delta as u8);
            self.vals.push(code);
            last_idx = cur_idx;
        }
        // terminal delta so cursors can overrun by one
        self.deltas.push(0);
        self.num_vals = self.vals.len() as DataSize;
        self.deltas.shrink_to_fit();
        self.vals.shrink_to_fit();
        self.build_fast_index();
    }

    fn build_fast_index(&mut self) {
        self.fast_index.clear();

        let mod_size = (self.num_data + NUM_FAST_INDEX as DataSize - 1) / NUM_FAST_INDEX as DataSize;
        let mut pow2_mod_size: DataSize = 1;
        self.fast_index_shift = 0;
        while pow2_mod_size < mod_size {
            pow2_mod_size <<= 1;
            self.fast_index_shift += 1;
        }

        let mut i_delta: DataSize = -1;
        let mut cur_pos: DataSize = 0;
        let mut next_threshold: DataSize = 0;
        while self.next_nonzero(&mut i_delta, &mut cur_pos) {
            while next_threshold <= cur_pos {
                self.fast_index.push((i_delta, cur_pos));
                next_threshold += pow2_mod_size;
            }
        }
        while next_threshold < self.num_data {
            self.fast_index.push((self.num_vals - 1, cur_pos));
            next_threshold += pow2_mod_size;
        }
        self.fast_index.shrink_to_fit();
    }

    /// Decode the streams back into (row, code) pairs, dropping spacers.
    fn to_pairs(&self) -> Vec<(DataSize, T)> {
        let mut pairs = Vec::with_capacity(self.num_vals as usize);
        let mut i_delta: DataSize = -1;
        let mut cur_pos: DataSize = 0;
        while self.next_nonzero(&mut i_delta, &mut cur_pos) {
            let code = self.vals[i_delta as usize];
            if code.to_u32() != 0 {
                pairs.push((cur_pos, code));
            }
        }
        pairs
    }
}

impl<T: Lane> Clone for SparseBin<T> {
    fn clone(&self) -> Self {
        // Pending per-thread pushes are not cloned; callers clone only
        // after finish_load.
        SparseBin {
            num_data: self.num_data,
            deltas: self.deltas.clone(),
            vals: self.vals.clone(),
            num_vals: self.num_vals,
            push_buffers: PerThreadBuffers::new(),
            fast_index: self.fast_index.clone(),
            fast_index_shift: self.fast_index_shift,
            finished: self.finished,
        }
    }
}

pub struct SparseBinIterator<'a, T: Lane> {
    bin: &'a SparseBin<T>,
    cursor: SparseCursor,
    min_bin: u32,
    max_bin: u32,
    most_freq_bin: u32,
    offset: u32,
}

impl<'a, T: Lane> SparseBinIterator<'a, T> {
    fn new(bin: &'a SparseBin<T>, min_bin: u32, max_bin: u32, most_freq_bin: u32) -> Self {
        SparseBinIterator {
            cursor: bin.start_cursor(),
            bin,
            min_bin,
            max_bin,
            most_freq_bin,
            offset: (most_freq_bin == 0) as u32,
        }
    }
}

impl<T: Lane> BinIterator for SparseBinIterator<'_, T> {
    fn get(&mut self, row: DataSize) -> u32 {
        let raw = self.bin.raw_at(&mut self.cursor, row);
        if raw >= self.min_bin && raw <= self.max_bin {
            raw - self.min_bin + self.offset
        } else {
            self.most_freq_bin
        }
    }

    fn raw_get(&mut self, row: DataSize) -> u32 {
        self.bin.raw_at(&mut self.cursor, row)
    }

    fn reset(&mut self, row: DataSize) {
        self.bin
            .init_index(row, &mut self.cursor.i_delta, &mut self.cursor.cur_pos);
    }
}

impl<T: Lane> Bin for SparseBin<T> {
    fn push(&self, tid: usize, row: DataSize, code: u32) {
        // Row-ownership contract: tid identifies the pushing thread.
        unsafe { self.push_buffers.push(tid, (row, T::from_u32(code))) };
    }

    fn finish_load(&mut self) -> Result<()> {
        if self.finished {
            return Err(BinFeatError::precondition(
                "finish_load called twice on a sparse column",
            ));
        }
        let mut pairs = self.push_buffers.drain_all();
        pairs.sort_by_key(|&(row, _)| row);
        for window in pairs.windows(2) {
            if window[0].0 == window[1].0 {
                return Err(BinFeatError::precondition(format!(
                    "row {} pushed more than once",
                    window[0].0
                )));
            }
        }
        pairs.retain(|&(row, _)| row >= 0 && row < self.num_data);
        debug!(
            "sealed sparse column: {} non-elided of {} rows",
            pairs.len(),
            self.num_data
        );
        self.load_from_pair(&pairs);
        self.finished = true;
        Ok(())
    }

    fn resize(&mut self, num_data: DataSize) {
        if self.finished {
            let mut pairs = self.to_pairs();
            pairs.retain(|&(row, _)| row < num_data);
            self.num_data = num_data;
            self.load_from_pair(&pairs);
        } else {
            self.num_data = num_data;
        }
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
        Box::new(SparseBinIterator::new(self, min_bin, max_bin, most_freq_bin))
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
        let mut cursor = self.start_cursor();
        split_numerical_with(
            |idx| self.raw_at(&mut cursor, idx),
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
        let mut cursor = self.start_cursor();
        split_numerical_with(
            |idx| self.raw_at(&mut cursor, idx),
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
        let mut cursor = self.start_cursor();
        split_categorical_with(
            |idx| self.raw_at(&mut cursor, idx),
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
        let mut cursor = self.start_cursor();
        split_categorical_with(
            |idx| self.raw_at(&mut cursor, idx),
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
            .downcast_ref::<SparseBin<T>>()
            .ok_or_else(|| {
                BinFeatError::precondition("copy_subrow source has a different storage layout")
            })?;
        debug_assert!(used_indices.windows(2).all(|w| w[0] < w[1]));
        let source_pairs = other.to_pairs();
        let mut subset_pairs = Vec::new();
        let mut next = 0usize;
        for &(row, code) in &source_pairs {
            while next < used_indices.len() && used_indices[next] < row {
                next += 1;
            }
            if next == used_indices.len() {
                break;
            }
            if used_indices[next] == row {
                subset_pairs.push((next as DataSize, code));
                next += 1;
            }
        }
        self.num_data = used_indices.len() as DataSize;
        self.load_from_pair(&subset_pairs);
        self.finished = true;
        Ok(())
    }

    fn save_binary(&self, writer: &mut dyn BinaryWriter) -> Result<usize> {
        let mut image = Vec::with_capacity(self.sizes_in_byte());
        image.extend_from_slice(&self.num_vals.to_le_bytes());
        image.extend_from_slice(&self.deltas);
        for &code in &self.vals {
            code.append_le(&mut image);
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
        4 + self.num_vals as usize + 1 + self.num_vals as usize * T::BYTES
    }

    fn load_from_memory(
        &mut self,
        buffer: &[u8],
        num_all_data: DataSize,
        local_used_indices: Option<&[DataSize]>,
    ) -> Result<usize> {
        let mut cursor = ByteCursor::new(buffer);
        let num_vals = cursor.read_i32()?;
        if num_vals < 0 {
            return Err(BinFeatError::corrupt(format!(
                "sparse image claims {num_vals} values"
            )));
        }
        let nv = num_vals as usize;
        let deltas = cursor.read_bytes(nv + 1)?;
        let vals_bytes = cursor.read_bytes(nv * T::BYTES)?;
        let consumed = cursor.position();

        // Decode into source-space pairs, validating positions.
        let mut source_pairs = Vec::with_capacity(nv);
        let mut cur_pos: DataSize = 0;
        for k in 0..nv {
            cur_pos += deltas[k] as DataSize;
            if cur_pos >= num_all_data {
                return Err(BinFeatError::corrupt(format!(
                    "sparse entry at row {cur_pos} past {num_all_data} rows"
                )));
            }
            let code = T::read_le(&vals_bytes[k * T::BYTES..(k + 1) * T::BYTES]);
            if code.to_u32() != 0 {
                source_pairs.push((cur_pos, code));
            }
        }

        match local_used_indices {
            None => {
                if num_all_data != self.num_data {
                    return Err(BinFeatError::corrupt(format!(
                        "sparse image holds {} rows, column expects {}",
                        num_all_data, self.num_data
                    )));
                }
                self.deltas = deltas.to_vec();
                self.vals = (0..nv)
                    .map(|k| T::read_le(&vals_bytes[k * T::BYTES..(k + 1) * T::BYTES]))
                    .collect();
                self.num_vals = num_vals;
                self.build_fast_index();
            }
            Some(used_indices) => {
                for &idx in used_indices {
                    if idx < 0 || idx >= num_all_data {
                        return Err(BinFeatError::OutOfRange {
                            index: idx as usize,
                            length: num_all_data as usize,
                        });
                    }
                }
                let mut subset_pairs = Vec::new();
                let mut next = 0usize;
                for &(row, code) in &source_pairs {
                    while next < used_indices.len() && used_indices[next] < row {
                        next += 1;
                    }
                    if next == used_indices.len() {
                        break;
                    }
                    if used_indices[next] == row {
                        subset_pairs.push((next as DataSize, code));
                        next += 1;
                    }
                }
                self.num_data = used_indices.len() as DataSize;
                self.load_from_pair(&subset_pairs);
            }
        }
        self.finished = true;
        Ok(consumed)
    }

    fn clone_box(&self) -> Box<dyn Bin> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
