/*!
 * Handle Heap
 *
 * Blocks addressed by `{key, tid}` handles instead of raw pointers, so the
 * values a routine keeps survive the routine moving between a thread and a
 * process backing. Every access runs under the owning flow's lock.
 */

mod allocator;
mod storage;
mod typed;

use super::types::{Block, Handle, HeapStats};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle-addressed block storage shared by the flows of one runtime
pub struct HandleHeap {
    blocks: DashMap<Handle, Block, RandomState>,
    next_key: AtomicU64,
}

impl HandleHeap {
    pub fn new() -> Self {
        Self {
            blocks: DashMap::with_hasher(RandomState::new()),
            next_key: AtomicU64::new(0),
        }
    }

    fn next_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.blocks.contains_key(&handle)
    }

    /// Elements in the block behind `handle`
    pub fn len_of(&self, handle: Handle) -> Option<usize> {
        self.blocks.get(&handle).map(|b| b.len)
    }

    pub fn stats(&self) -> HeapStats {
        self.blocks
            .iter()
            .fold(HeapStats::default(), |acc, entry| HeapStats {
                blocks: acc.blocks + 1,
                bytes: acc.bytes + entry.data.len(),
            })
    }
}

impl Default for HandleHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandleHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleHeap")
            .field("blocks", &self.blocks.len())
            .finish()
    }
}
