/*!
 * Runtime
 *
 * Owns everything that is global to one process: the context registry, the
 * in-process link hub, the pause table and the transformation engine.
 * Cloning a `Runtime` is cheap and every clone refers to the same state.
 */

mod channel;
mod lifecycle;

use crate::context::Vic;
use crate::core::config::RuntimeConfig;
use crate::core::types::{OsPid, VicId};
use crate::link::InprocHub;
use crate::memory::HandleHeap;
use crate::pause::PauseTable;
use crate::platform;
use crate::registry::{Registry, RegistryEntry};
use crate::transform::TransformEngine;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::info;

/// Shared runtime state
pub struct RuntimeInner {
    config: RuntimeConfig,
    registry: Registry,
    hub: InprocHub,
    /// Link name to its (connect, bind) contexts; names are runtime-wide
    link_names: DashMap<String, (VicId, VicId), RandomState>,
    heap: HandleHeap,
    pause: Arc<PauseTable>,
    engine: Mutex<Option<TransformEngine>>,
    root_pid: OsPid,
    next_id: AtomicU64,
}

/// Handle to the runtime
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Runtime configured from `VIC_*` environment variables
    pub fn init() -> Self {
        Self::with_config(RuntimeConfig::from_env())
    }

    /// The transformation engine starts with the first context
    pub fn with_config(config: RuntimeConfig) -> Self {
        let root_pid = platform::current_pid();
        info!(
            pid = root_pid,
            attempt_timeout_ms = config.attempt_timeout_ms,
            ipc_dir = %config.ipc_dir.display(),
            "Runtime initialized"
        );
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                registry: Registry::new(),
                hub: InprocHub::new(),
                link_names: DashMap::with_hasher(RandomState::new()),
                heap: HandleHeap::new(),
                pause: Arc::new(PauseTable::new()),
                engine: Mutex::new(None),
                root_pid,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<RuntimeInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub(crate) fn hub(&self) -> &InprocHub {
        &self.inner.hub
    }

    /// Contexts joined by the link called `name`
    pub fn link_ends(&self, name: &str) -> Option<(VicId, VicId)> {
        self.inner.link_names.get(name).map(|e| *e.value())
    }

    /// Handle heap shared by every flow of this runtime
    pub fn heap(&self) -> &HandleHeap {
        &self.inner.heap
    }

    /// Pause table shared with placeholder threads
    pub fn pause_table(&self) -> &Arc<PauseTable> {
        &self.inner.pause
    }

    /// Process the runtime was created in
    pub fn root_pid(&self) -> OsPid {
        self.inner.root_pid
    }

    fn next_id(&self) -> VicId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn registry_entry(&self, vic: &Vic) -> Option<RegistryEntry> {
        self.inner.registry.entry(vic.id())
    }

    pub fn live_contexts(&self) -> usize {
        self.inner.registry.live_count()
    }

    /// Control socket this process serves, or would serve once a context exists
    pub fn control_address(&self) -> PathBuf {
        match self.inner.engine.lock().as_ref() {
            Some(engine) => engine.address(),
            None => self.inner.config.control_address(platform::current_pid()),
        }
    }

    pub fn engine_running(&self) -> bool {
        self.inner.engine.lock().is_some()
    }

    pub fn transform_in_progress(&self) -> bool {
        self.inner
            .engine
            .lock()
            .as_ref()
            .map(TransformEngine::in_progress)
            .unwrap_or(false)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("root_pid", &self.inner.root_pid)
            .field("live_contexts", &self.inner.registry.live_count())
            .finish()
    }
}
