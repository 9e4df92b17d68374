/*!
 * Context Registry
 *
 * Tracks every live context of a runtime in creation order, together with the
 * OS identity of whatever is executing it. The registry never owns a context.
 */

use crate::context::VicInner;
use crate::core::types::{OsTid, RawThread, VicId};
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// OS identity of a context's execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Kernel thread id (or pid after a split); 0 until the routine runs
    pub tid: OsTid,
    /// Raw thread handle while thread-backed
    pub thread: Option<RawThread>,
    /// Whether the routine is currently executing
    pub executing: bool,
}

struct Slot {
    vic: Weak<VicInner>,
    entry: RegistryEntry,
}

/// Registry of live contexts
#[derive(Default)]
pub struct Registry {
    slots: RwLock<BTreeMap<VicId, Slot>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a context with a zeroed entry
    pub fn register(&self, vic: &Arc<VicInner>) {
        let id = vic.id();
        self.slots.write().insert(
            id,
            Slot {
                vic: Arc::downgrade(vic),
                entry: RegistryEntry::default(),
            },
        );
        trace!(vic = id, "Context registered");
    }

    /// Remove a context; false if it was not registered
    pub fn deregister(&self, id: VicId) -> bool {
        let removed = self.slots.write().remove(&id).is_some();
        if removed {
            trace!(vic = id, "Context deregistered");
        }
        removed
    }

    /// Called by the routine itself when it begins executing
    pub fn mark_running(&self, id: VicId, tid: OsTid, thread: Option<RawThread>) {
        if let Some(slot) = self.slots.write().get_mut(&id) {
            slot.entry = RegistryEntry {
                tid,
                thread,
                executing: true,
            };
        }
    }

    /// Called when the routine returns, normally or by panic
    pub fn mark_finished(&self, id: VicId) {
        if let Some(slot) = self.slots.write().get_mut(&id) {
            slot.entry.executing = false;
        }
    }

    /// Replace the OS identity after a backing conversion
    pub fn rewrite(&self, id: VicId, tid: OsTid, thread: Option<RawThread>) {
        if let Some(slot) = self.slots.write().get_mut(&id) {
            slot.entry.tid = tid;
            slot.entry.thread = thread;
            debug!(vic = id, tid, "Registry entry rewritten");
        }
    }

    pub fn entry(&self, id: VicId) -> Option<RegistryEntry> {
        self.slots.read().get(&id).map(|slot| slot.entry)
    }

    pub fn contains(&self, id: VicId) -> bool {
        self.slots.read().contains_key(&id)
    }

    pub fn is_executing(&self, id: VicId) -> bool {
        self.entry(id).map(|e| e.executing).unwrap_or(false)
    }

    /// Live contexts in creation order, with their entries
    pub fn snapshot(&self) -> Vec<(Arc<VicInner>, RegistryEntry)> {
        self.slots
            .read()
            .values()
            .filter_map(|slot| slot.vic.upgrade().map(|vic| (vic, slot.entry)))
            .collect()
    }

    /// Ids of registered contexts in creation order
    pub fn ids(&self) -> Vec<VicId> {
        self.slots.read().keys().copied().collect()
    }

    pub fn live_count(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Forget every context except `id` (used in a freshly forked child)
    pub fn retain_only(&self, id: VicId) {
        self.slots.write().retain(|&k, _| k == id);
    }

    /// Exclusive access held across a process duplication
    pub(crate) fn lock_for_fork(&self) -> RegistryForkGuard<'_> {
        RegistryForkGuard {
            _guard: self.slots.write(),
        }
    }
}

/// Keeps the registry write-locked so a forked child sees a consistent copy
pub(crate) struct RegistryForkGuard<'a> {
    _guard: RwLockWriteGuard<'a, BTreeMap<VicId, Slot>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::BackingKind;

    fn vic(id: VicId) -> Arc<VicInner> {
        Arc::new(VicInner::new(id, BackingKind::Thread))
    }

    #[test]
    fn test_entry_lifecycle() {
        let registry = Registry::new();
        let a = vic(1);
        registry.register(&a);
        assert_eq!(registry.entry(1), Some(RegistryEntry::default()));

        registry.mark_running(1, 4242, Some(7));
        assert!(registry.is_executing(1));
        assert_eq!(registry.entry(1).unwrap().tid, 4242);

        registry.mark_finished(1);
        assert!(!registry.is_executing(1));

        registry.rewrite(1, 4243, None);
        assert_eq!(registry.entry(1).unwrap().thread, None);

        assert!(registry.deregister(1));
        assert!(!registry.deregister(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_order_and_weak_refs() {
        let registry = Registry::new();
        let a = vic(3);
        let b = vic(1);
        registry.register(&a);
        registry.register(&b);

        let ids: Vec<_> = registry.snapshot().iter().map(|(v, _)| v.id()).collect();
        assert_eq!(ids, vec![1, 3]);

        drop(b);
        assert_eq!(registry.snapshot().len(), 1);
        assert_eq!(registry.live_count(), 2);

        registry.retain_only(3);
        assert_eq!(registry.ids(), vec![3]);
    }
}
