/*!
 * Memory Types
 * Handles, blocks and errors of the handle heap
 */

use crate::core::types::OsTid;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Heap operation result
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Heap errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum MemoryError {
    #[error("Invalid handle {0}")]
    #[diagnostic(
        code(memory::invalid_handle),
        help("The block was never allocated or has already been deallocated.")
    )]
    InvalidHandle(Handle),

    #[error("Index {index} out of bounds for block of {len} elements")]
    #[diagnostic(code(memory::out_of_bounds))]
    OutOfBounds { index: usize, len: usize },

    #[error("Range {start}..{end} invalid for block of {len} elements")]
    #[diagnostic(code(memory::invalid_range))]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    #[diagnostic(
        code(memory::size_mismatch),
        help("Writes must cover whole elements of the block's element size.")
    )]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Allocation of {len} elements of {elem_size} bytes is too large")]
    #[diagnostic(code(memory::too_large))]
    TooLarge { elem_size: usize, len: usize },

    #[error("Zero-sized allocation")]
    #[diagnostic(code(memory::zero_size))]
    ZeroSize,

    #[error("Value encoding failed: {0}")]
    #[diagnostic(code(memory::encoding))]
    Encoding(String),
}

impl From<bincode::Error> for MemoryError {
    fn from(err: bincode::Error) -> Self {
        MemoryError::Encoding(err.to_string())
    }
}

/// Reference to a heap block
///
/// The allocating thread's id is part of the key, so handles created on
/// different threads never collide even if their counters do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    pub key: u64,
    pub tid: OsTid,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.tid)
    }
}

/// Element-addressed storage behind one handle
#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub elem_size: usize,
    pub len: usize,
    pub data: Vec<u8>,
}

impl Block {
    pub fn new(elem_size: usize, len: usize) -> MemoryResult<Self> {
        let too_large = MemoryError::TooLarge { elem_size, len };
        let bytes = elem_size.checked_mul(len).ok_or(too_large.clone())?;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes).map_err(|_| too_large)?;
        data.resize(bytes, 0);
        Ok(Self {
            elem_size,
            len,
            data,
        })
    }

    pub fn element(&self, index: usize) -> MemoryResult<&[u8]> {
        let span = self.element_span(index)?;
        Ok(&self.data[span])
    }

    pub fn element_mut(&mut self, index: usize) -> MemoryResult<&mut [u8]> {
        let span = self.element_span(index)?;
        Ok(&mut self.data[span])
    }

    fn element_span(&self, index: usize) -> MemoryResult<std::ops::Range<usize>> {
        let end = index.checked_add(1).ok_or(MemoryError::OutOfBounds {
            index,
            len: self.len,
        })?;
        self.span(index, end)
    }

    /// Byte span of elements `start..end`. `len * elem_size` fits in usize,
    /// so any in-range span does too.
    pub fn span(&self, start: usize, end: usize) -> MemoryResult<std::ops::Range<usize>> {
        if start >= self.len && start.checked_add(1) == Some(end) {
            return Err(MemoryError::OutOfBounds {
                index: start,
                len: self.len,
            });
        }
        if start > end || end > self.len {
            return Err(MemoryError::InvalidRange {
                start,
                end,
                len: self.len,
            });
        }
        Ok(start * self.elem_size..end * self.elem_size)
    }
}

/// Heap usage snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapStats {
    pub blocks: usize,
    pub bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_spans() {
        let block = Block::new(4, 3).unwrap();
        assert_eq!(block.span(0, 3).unwrap(), 0..12);
        assert_eq!(block.span(1, 2).unwrap(), 4..8);
        assert_eq!(block.span(2, 2).unwrap(), 8..8);
        assert_eq!(
            block.element(3).unwrap_err(),
            MemoryError::OutOfBounds { index: 3, len: 3 }
        );
        assert_eq!(
            block.span(2, 1).unwrap_err(),
            MemoryError::InvalidRange {
                start: 2,
                end: 1,
                len: 3
            }
        );
    }

    #[test]
    fn test_block_arithmetic_overflow() {
        assert_eq!(
            Block::new(4, usize::MAX / 2).unwrap_err(),
            MemoryError::TooLarge {
                elem_size: 4,
                len: usize::MAX / 2
            }
        );

        let block = Block::new(8, 2).unwrap();
        assert_eq!(
            block.element(usize::MAX).unwrap_err(),
            MemoryError::OutOfBounds {
                index: usize::MAX,
                len: 2
            }
        );
        assert!(matches!(
            block.span(1, usize::MAX).unwrap_err(),
            MemoryError::InvalidRange { .. }
        ));
    }

    #[test]
    fn test_handle_display() {
        let handle = Handle { key: 7, tid: 42 };
        assert_eq!(handle.to_string(), "7@42");
    }
}
