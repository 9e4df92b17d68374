/*!
 * Execution Contexts
 *
 * A virtual isolation context (VIC) owns a backing and a set of links. An
 * execution flow binds a routine to a context. The flow's lock is the
 * context's state mutex: normal operations take it one bounded attempt at a
 * time, and a transformation pass holds it from prepare until start.
 */

pub mod backing;
pub mod completion;
pub mod traits;
pub mod types;

pub use backing::{Backing, LaunchBody, Launched, LocalThread, ProcessBacking, ThreadBacking};
pub use completion::Completion;
pub use traits::BackingOps;
pub use types::{FinishedCallback, Routine, VicState};

use crate::core::errors::{VicError, VicResult};
use crate::core::types::{BackingHandle, BackingKind, VicId};
use crate::link::LinkInfo;
use crate::runtime::Runtime;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::{Arc, Weak};

/// Shared context state
pub struct VicInner {
    id: VicId,
    state: Arc<Mutex<VicState>>,
    flow: Mutex<Option<Weak<FlowInner>>>,
}

impl VicInner {
    pub(crate) fn new(id: VicId, kind: BackingKind) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(VicState::new(kind))),
            flow: Mutex::new(None),
        }
    }

    pub fn id(&self) -> VicId {
        self.id
    }

    pub(crate) fn state(&self) -> &Arc<Mutex<VicState>> {
        &self.state
    }

    pub(crate) fn has_flow(&self) -> bool {
        self.flow
            .lock()
            .as_ref()
            .map(|weak| weak.strong_count() > 0)
            .unwrap_or(false)
    }

    pub(crate) fn attach_flow(&self, flow: &Arc<FlowInner>) -> VicResult<()> {
        let mut slot = self.flow.lock();
        if slot.as_ref().map(|w| w.strong_count() > 0).unwrap_or(false) {
            return Err(VicError::AlreadyBound(self.id));
        }
        *slot = Some(Arc::downgrade(flow));
        Ok(())
    }

    pub(crate) fn detach_flow(&self) {
        *self.flow.lock() = None;
    }
}

/// Handle to a virtual isolation context
#[derive(Clone)]
pub struct Vic {
    inner: Arc<VicInner>,
}

impl Vic {
    pub(crate) fn from_inner(inner: Arc<VicInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<VicInner> {
        &self.inner
    }

    pub fn id(&self) -> VicId {
        self.inner.id
    }

    /// Current backing kind. Blocks while a transformation pass holds the context.
    pub fn kind(&self) -> BackingKind {
        self.inner.state.lock().kind()
    }

    pub fn handle(&self) -> BackingHandle {
        self.inner.state.lock().backing.handle()
    }

    pub fn links(&self) -> Vec<LinkInfo> {
        self.inner.state.lock().link_infos()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.has_flow()
    }
}

impl fmt::Debug for Vic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vic").field("id", &self.inner.id).finish()
    }
}

/// Shared flow state
pub struct FlowInner {
    vic: Vic,
    routine: Routine,
    finished: Mutex<Option<FinishedCallback>>,
    runtime: Runtime,
}

/// Handle to an execution flow
#[derive(Clone)]
pub struct Flow {
    inner: Arc<FlowInner>,
}

impl Flow {
    pub(crate) fn new(
        vic: Vic,
        routine: Routine,
        finished: Option<FinishedCallback>,
        runtime: Runtime,
    ) -> Self {
        Self {
            inner: Arc::new(FlowInner {
                vic,
                routine,
                finished: Mutex::new(finished),
                runtime,
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<FlowInner> {
        &self.inner
    }

    pub fn id(&self) -> VicId {
        self.inner.vic.id()
    }

    pub fn vic(&self) -> &Vic {
        &self.inner.vic
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Lock hook for external allocation layers; unlocks on drop
    pub fn lock(&self) -> FlowGuard<'_> {
        FlowGuard {
            _guard: self.inner.vic.inner.state.lock(),
        }
    }

    pub fn send(&self, name: &str, payload: &[u8]) -> VicResult<()> {
        self.inner.runtime.send(self, name, payload)
    }

    pub fn send_str(&self, name: &str, text: &str) -> VicResult<()> {
        self.inner.runtime.send_str(self, name, text)
    }

    pub fn recv(&self, name: &str) -> VicResult<Vec<u8>> {
        self.inner.runtime.recv(self, name)
    }

    pub fn recv_string(&self, name: &str) -> VicResult<String> {
        self.inner.runtime.recv_string(self, name)
    }

    pub(crate) fn run_routine(&self) {
        (self.inner.routine)(self)
    }

    pub(crate) fn take_finished(&self) -> Option<FinishedCallback> {
        self.inner.finished.lock().take()
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow").field("vic", &self.id()).finish()
    }
}

/// Held while an allocation layer touches flow-owned memory
pub struct FlowGuard<'a> {
    _guard: MutexGuard<'a, VicState>,
}
