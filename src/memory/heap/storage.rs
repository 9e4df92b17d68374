/*!
 * Heap Storage Operations
 * Element and range reads and writes
 */

use super::super::types::{Handle, MemoryError, MemoryResult};
use super::HandleHeap;
use crate::context::Flow;

impl HandleHeap {
    /// First element of the block
    pub fn read(&self, flow: &Flow, handle: Handle) -> MemoryResult<Vec<u8>> {
        self.read_at(flow, handle, 0)
    }

    pub fn read_at(&self, flow: &Flow, handle: Handle, index: usize) -> MemoryResult<Vec<u8>> {
        let _lock = flow.lock();
        let block = self
            .blocks
            .get(&handle)
            .ok_or(MemoryError::InvalidHandle(handle))?;
        Ok(block.element(index)?.to_vec())
    }

    /// Elements `start..end`, concatenated
    pub fn read_range(
        &self,
        flow: &Flow,
        handle: Handle,
        start: usize,
        end: usize,
    ) -> MemoryResult<Vec<u8>> {
        let _lock = flow.lock();
        let block = self
            .blocks
            .get(&handle)
            .ok_or(MemoryError::InvalidHandle(handle))?;
        let span = block.span(start, end)?;
        Ok(block.data[span].to_vec())
    }

    /// Overwrite the first element
    pub fn write(&self, flow: &Flow, handle: Handle, value: &[u8]) -> MemoryResult<()> {
        self.write_at(flow, handle, 0, value)
    }

    pub fn write_at(
        &self,
        flow: &Flow,
        handle: Handle,
        index: usize,
        value: &[u8],
    ) -> MemoryResult<()> {
        let _lock = flow.lock();
        let mut block = self
            .blocks
            .get_mut(&handle)
            .ok_or(MemoryError::InvalidHandle(handle))?;
        let slot = block.element_mut(index)?;
        if slot.len() != value.len() {
            return Err(MemoryError::SizeMismatch {
                expected: slot.len(),
                actual: value.len(),
            });
        }
        slot.copy_from_slice(value);
        Ok(())
    }

    /// Overwrite elements `start..end` with `values`
    pub fn write_range(
        &self,
        flow: &Flow,
        handle: Handle,
        start: usize,
        end: usize,
        values: &[u8],
    ) -> MemoryResult<()> {
        let _lock = flow.lock();
        let mut block = self
            .blocks
            .get_mut(&handle)
            .ok_or(MemoryError::InvalidHandle(handle))?;
        let span = block.span(start, end)?;
        if span.len() != values.len() {
            return Err(MemoryError::SizeMismatch {
                expected: span.len(),
                actual: values.len(),
            });
        }
        block.data[span].copy_from_slice(values);
        Ok(())
    }
}
