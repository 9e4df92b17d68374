/*!
 * Memory Module
 * Handle-addressed heap for values that must outlive a backing change
 */

pub mod heap;
pub mod types;

pub use heap::HandleHeap;
pub use types::{Handle, HeapStats, MemoryError, MemoryResult};
