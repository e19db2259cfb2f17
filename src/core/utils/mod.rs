//! Small shared utilities: binary writers, byte readers, and the
//! `UnsafeCell` wrappers that back lock-free data loading.

pub mod binary_writer;
pub mod byte_buffer;
pub mod concurrent;
