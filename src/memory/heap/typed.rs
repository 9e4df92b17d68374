/*!
 * Typed Values
 * bincode-encoded values stored in single-element blocks
 */

use super::super::types::{Block, Handle, MemoryError, MemoryResult};
use super::HandleHeap;
use crate::context::Flow;
use serde::de::DeserializeOwned;
use serde::Serialize;

impl HandleHeap {
    /// Store `value` in a new block sized to its encoding
    pub fn store<T: Serialize>(&self, flow: &Flow, value: &T) -> MemoryResult<Handle> {
        let bytes = bincode::serialize(value)?;
        let handle = self.allocate(flow, bytes.len().max(1))?;
        self.replace_bytes(flow, handle, bytes)?;
        Ok(handle)
    }

    pub fn load<T: DeserializeOwned>(&self, flow: &Flow, handle: Handle) -> MemoryResult<T> {
        let bytes = self.read(flow, handle)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Replace the stored value; the block is resized to the new encoding
    pub fn replace<T: Serialize>(&self, flow: &Flow, handle: Handle, value: &T) -> MemoryResult<()> {
        let bytes = bincode::serialize(value)?;
        self.replace_bytes(flow, handle, bytes)
    }

    fn replace_bytes(&self, flow: &Flow, handle: Handle, bytes: Vec<u8>) -> MemoryResult<()> {
        let _lock = flow.lock();
        let mut block = self
            .blocks
            .get_mut(&handle)
            .ok_or(MemoryError::InvalidHandle(handle))?;
        if block.len != 1 {
            return Err(MemoryError::SizeMismatch {
                expected: 1,
                actual: block.len,
            });
        }
        let elem_size = bytes.len().max(1);
        *block = Block {
            elem_size,
            len: 1,
            data: bytes,
        };
        block.data.resize(elem_size, 0);
        Ok(())
    }
}
