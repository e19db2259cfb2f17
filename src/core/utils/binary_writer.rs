//! Binary writer abstraction for serialization.

use std::fs::File;
use std::io::{self, BufWriter, Write};

/// An interface for serializing binary images to any byte sink.
///
/// Returns the number of bytes actually written so callers can verify
/// complete writes against [`sizes_in_byte`](crate::io::bin::Bin::sizes_in_byte).
pub trait BinaryWriter {
    /// Append bytes to the output. Returns the number of bytes written.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;
}

/// In-memory binary writer backed by a `Vec<u8>`.
#[derive(Debug, Default)]
pub struct VecBinaryWriter {
    buffer: Vec<u8>,
}

impl VecBinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        VecBinaryWriter {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl BinaryWriter for VecBinaryWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(data);
        Ok(data.len())
    }
}

/// Binary writer over a buffered file handle.
pub struct FileBinaryWriter {
    writer: BufWriter<File>,
}

impl FileBinaryWriter {
    pub fn new(file: File) -> Self {
        FileBinaryWriter {
            writer: BufWriter::new(file),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl BinaryWriter for FileBinaryWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.writer.write_all(data)?;
        Ok(data.len())
    }
}
