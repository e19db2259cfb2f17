//! Interior-mutability containers backing lock-free data loading.
//!
//! Both containers expose `&self` writers so many loader threads can fill
//! a bin store through a shared reference. Callers uphold the contract
//! that concurrent writers touch disjoint slots (dense) or distinct
//! thread indices (sparse); `FeatureGroup::finish_load` is the
//! happens-before barrier after which reads are safe.

use std::cell::UnsafeCell;
use std::fmt;

/// A fixed-size slot array writable through `&self`.
///
/// # Safety contract
///
/// [`SlotVec::set`] may race only with writes to *other* slots. Two
/// unsynchronized writes to the same slot, or a read concurrent with a
/// write to the same slot, are data races.
pub struct SlotVec<T: Copy> {
    slots: Vec<UnsafeCell<T>>,
}

unsafe impl<T: Copy + Send> Send for SlotVec<T> {}
unsafe impl<T: Copy + Send> Sync for SlotVec<T> {}

impl<T: Copy + Default> SlotVec<T> {
    pub fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || UnsafeCell::new(T::default()));
        SlotVec { slots }
    }

    /// Grow or shrink to `len`, default-filling new slots.
    pub fn resize(&mut self, len: usize) {
        self.slots.resize_with(len, || UnsafeCell::new(T::default()));
    }
}

impl<T: Copy> SlotVec<T> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> T {
        unsafe { *self.slots[index].get() }
    }

    /// Write a slot through a shared reference.
    ///
    /// # Safety
    ///
    /// No other thread may access slot `index` concurrently.
    pub unsafe fn set(&self, index: usize, value: T) {
        *self.slots[index].get() = value;
    }

    /// Write a slot through an exclusive reference (no contract needed).
    pub fn set_mut(&mut self, index: usize, value: T) {
        *self.slots[index].get_mut() = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

impl<T: Copy> Clone for SlotVec<T> {
    fn clone(&self) -> Self {
        let slots = self
            .iter()
            .map(UnsafeCell::new)
            .collect::<Vec<_>>();
        SlotVec { slots }
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for SlotVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Per-thread append buffers writable through `&self`.
///
/// Each loader thread appends to its own buffer indexed by thread id;
/// [`PerThreadBuffers::drain_all`] merges them under `&mut self`.
pub struct PerThreadBuffers<T> {
    buffers: Vec<UnsafeCell<Vec<T>>>,
}

unsafe impl<T: Send> Send for PerThreadBuffers<T> {}
unsafe impl<T: Send> Sync for PerThreadBuffers<T> {}

impl<T> PerThreadBuffers<T> {
    /// Allocate one buffer per rayon worker thread.
    pub fn new() -> Self {
        Self::with_buffers(rayon::current_num_threads())
    }

    pub fn with_buffers(num_buffers: usize) -> Self {
        let mut buffers = Vec::with_capacity(num_buffers.max(1));
        buffers.resize_with(num_buffers.max(1), || UnsafeCell::new(Vec::new()));
        PerThreadBuffers { buffers }
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Append to the buffer owned by thread `tid`.
    ///
    /// # Safety
    ///
    /// At most one thread may use a given `tid` at a time.
    pub unsafe fn push(&self, tid: usize, item: T) {
        (*self.buffers[tid].get()).push(item);
    }

    /// Drain every buffer into a single vector.
    pub fn drain_all(&mut self) -> Vec<T> {
        let mut merged = Vec::new();
        for buffer in &mut self.buffers {
            merged.append(buffer.get_mut());
        }
        merged
    }
}

impl<T> Default for PerThreadBuffers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for PerThreadBuffers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerThreadBuffers")
            .field("num_buffers", &self.buffers.len())
            .finish()
    }
}
