/*!
 * Heap Allocator
 * Allocation and deallocation of handle blocks
 */

use super::super::types::{Block, Handle, MemoryError, MemoryResult};
use super::HandleHeap;
use crate::context::Flow;
use crate::platform;
use tracing::trace;

impl HandleHeap {
    /// Allocate one zeroed element of `elem_size` bytes
    pub fn allocate(&self, flow: &Flow, elem_size: usize) -> MemoryResult<Handle> {
        self.allocate_array(flow, 1, elem_size)
    }

    /// Allocate `len` zeroed elements of `elem_size` bytes each
    pub fn allocate_array(
        &self,
        flow: &Flow,
        len: usize,
        elem_size: usize,
    ) -> MemoryResult<Handle> {
        if len == 0 || elem_size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let block = Block::new(elem_size, len)?;
        let _lock = flow.lock();
        let handle = Handle {
            key: self.next_key(),
            tid: platform::current_tid(),
        };
        self.blocks.insert(handle, block);
        trace!(vic = flow.id(), %handle, len, elem_size, "Block allocated");
        Ok(handle)
    }

    /// Release a block. Unknown handles are ignored.
    pub fn deallocate(&self, flow: &Flow, handle: Handle) -> bool {
        let _lock = flow.lock();
        let removed = self.blocks.remove(&handle).is_some();
        if removed {
            trace!(vic = flow.id(), %handle, "Block deallocated");
        }
        removed
    }
}
