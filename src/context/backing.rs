/*!
 * Backings
 *
 * The OS-level resource executing a context's routine. Dispatch is resolved
 * through the enum on every call, so a transformation pass can swap the
 * variant under the state lock and the next start/wait/teardown follows it.
 */

use super::completion::Completion;
use super::traits::BackingOps;
use crate::core::errors::{VicError, VicResult};
use crate::core::types::{BackingHandle, BackingKind, OsPid, OsTid, RawThread, VicId, WaitStatus};
use crate::platform::{self, Forked, ReapStatus};
use std::os::unix::thread::JoinHandleExt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Work handed to a backing at start
pub type LaunchBody = Box<dyn FnOnce() + Send + 'static>;

/// What `start` produced on the calling side
pub enum Launched {
    /// The routine now runs elsewhere; the caller continues normally
    Here,
    /// The caller is the freshly duplicated child and must run the body itself
    InChild(LaunchBody),
}

/// Thread-backed execution
#[derive(Default)]
pub struct ThreadBacking {
    handle: Option<JoinHandle<()>>,
    raw: Option<RawThread>,
    completion: Option<Arc<Completion>>,
    started: bool,
}

impl ThreadBacking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take over a thread that is already running (merge target)
    pub fn adopt(handle: JoinHandle<()>, completion: Arc<Completion>) -> Self {
        let raw = handle.as_pthread_t();
        Self {
            handle: Some(handle),
            raw: Some(raw),
            completion: Some(completion),
            started: true,
        }
    }

    /// Spawn the thread; `body` must signal `completion` when it returns
    pub fn spawn(
        &mut self,
        name: String,
        completion: Arc<Completion>,
        body: LaunchBody,
    ) -> VicResult<()> {
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(body)
            .map_err(|e| {
                error!(error = %e, "Thread creation failed");
                VicError::ResourceCreation(format!("thread spawn failed: {}", e))
            })?;

        self.raw = Some(handle.as_pthread_t());
        self.handle = Some(handle);
        self.completion = Some(completion);
        self.started = true;
        Ok(())
    }

    pub fn raw(&self) -> Option<RawThread> {
        self.raw
    }
}

/// Thread of this process still executing the routine after a split
pub struct LocalThread {
    pub thread: ThreadBacking,
    pub tid: OsTid,
}

/// Process-backed execution
#[derive(Default)]
pub struct ProcessBacking {
    pid: Option<OsPid>,
    reaped: bool,
    /// Created by a split rather than by forking from this process
    adopted: bool,
    local: Option<LocalThread>,
}

impl ProcessBacking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take over a process that is already running (split target)
    pub fn adopt(pid: OsPid) -> Self {
        Self {
            pid: Some(pid),
            reaped: false,
            adopted: true,
            local: None,
        }
    }

    /// Keep the split thread; waits and teardown go through it
    pub fn with_local(mut self, thread: ThreadBacking, tid: OsTid) -> Self {
        self.local = Some(LocalThread { thread, tid });
        self
    }

    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    pub fn local_tid(&self) -> Option<OsTid> {
        self.local.as_ref().map(|l| l.tid)
    }

    pub fn take_local(&mut self) -> Option<LocalThread> {
        self.local.take()
    }

    /// Whether the reported pid is a process of its own rather than the
    /// split thread itself
    pub fn has_external_pid(&self) -> bool {
        match (self.pid, self.local_tid()) {
            (Some(pid), Some(tid)) => pid != tid,
            (pid, None) => pid.is_some(),
            (None, Some(_)) => false,
        }
    }

    pub fn pid(&self) -> Option<OsPid> {
        self.pid
    }

    pub fn is_adopted(&self) -> bool {
        self.adopted
    }

    /// Duplicate the process. The parent records the child pid.
    pub fn fork(&mut self, body: LaunchBody) -> VicResult<Launched> {
        match platform::duplicate_and_continue() {
            Ok(Forked::Parent(pid)) => {
                self.pid = Some(pid);
                Ok(Launched::Here)
            }
            Ok(Forked::Child) => Ok(Launched::InChild(body)),
            Err(e) => {
                error!(error = %e, "Process duplication failed");
                Err(e)
            }
        }
    }

    /// Non-blocking liveness check used by merge preparation
    pub fn is_running(&mut self) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        if self.reaped {
            return false;
        }
        match platform::try_reap(pid) {
            Ok(ReapStatus::Running) => true,
            Ok(ReapStatus::NotChild) => platform::is_alive(pid),
            Ok(_) => {
                self.reaped = true;
                false
            }
            Err(_) => false,
        }
    }
}

/// Backing of a context
pub enum Backing {
    Thread(ThreadBacking),
    Process(ProcessBacking),
}

impl Backing {
    pub fn new(kind: BackingKind) -> Self {
        match kind {
            BackingKind::Thread => Backing::Thread(ThreadBacking::new()),
            BackingKind::Process => Backing::Process(ProcessBacking::new()),
        }
    }
}

impl BackingOps for ThreadBacking {
    fn kind(&self) -> BackingKind {
        BackingKind::Thread
    }

    fn handle(&self) -> BackingHandle {
        BackingHandle::Thread(self.raw)
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn wait_attempt(
        &mut self,
        id: VicId,
        timeout: Duration,
        _poll: Duration,
        _executing: &dyn Fn() -> bool,
    ) -> VicResult<WaitStatus> {
        let Some(handle) = self.handle.as_ref() else {
            return Ok(WaitStatus::Done);
        };

        let finished = match self.completion.as_ref() {
            Some(completion) => completion.wait_timeout(timeout),
            None => handle.is_finished(),
        };
        if !finished {
            return Ok(WaitStatus::NotDone);
        }

        // Completion is signalled just before the thread returns
        let Some(handle) = self.handle.take() else {
            return Ok(WaitStatus::Done);
        };
        match handle.join() {
            Ok(()) => Ok(WaitStatus::Done),
            Err(_) => Err(VicError::RoutinePanicked(id)),
        }
    }

    fn teardown(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                debug!("Detaching thread still running at teardown");
            }
        }
        self.completion = None;
    }
}

impl BackingOps for ProcessBacking {
    fn kind(&self) -> BackingKind {
        BackingKind::Process
    }

    fn handle(&self) -> BackingHandle {
        BackingHandle::Process(self.pid)
    }

    fn is_started(&self) -> bool {
        self.pid.is_some()
    }

    fn wait_attempt(
        &mut self,
        id: VicId,
        timeout: Duration,
        poll: Duration,
        executing: &dyn Fn() -> bool,
    ) -> VicResult<WaitStatus> {
        if let Some(local) = self.local.as_mut() {
            return local.thread.wait_attempt(id, timeout, poll, executing);
        }
        let Some(pid) = self.pid else {
            return Ok(WaitStatus::Done);
        };
        if self.reaped {
            return Ok(WaitStatus::Done);
        }

        let deadline = Instant::now() + timeout;
        loop {
            match platform::try_reap(pid)? {
                ReapStatus::Exited(code) => {
                    self.reaped = true;
                    if code == 0 {
                        return Ok(WaitStatus::Done);
                    }
                    return Err(VicError::ChildFailed { pid, code });
                }
                ReapStatus::Signaled(signal) => {
                    self.reaped = true;
                    return Err(VicError::ChildSignaled { pid, signal });
                }
                ReapStatus::Running => {}
                ReapStatus::NotChild => {
                    // Adopted by a split: the routine may still run locally
                    if !executing() && !platform::is_alive(pid) {
                        self.reaped = true;
                        return Ok(WaitStatus::Done);
                    }
                }
            }

            if Instant::now() >= deadline {
                return Ok(WaitStatus::NotDone);
            }
            std::thread::sleep(poll);
        }
    }

    fn teardown(&mut self) {
        if let Some(local) = self.local.as_mut() {
            local.thread.teardown();
        }
        if let (Some(pid), false) = (self.pid, self.reaped) {
            match platform::try_reap(pid) {
                Ok(ReapStatus::Running) => {
                    warn!(pid, "Child still running at teardown");
                }
                Ok(_) => self.reaped = true,
                Err(e) => debug!(pid, error = %e, "Reap at teardown failed"),
            }
        }
    }
}

impl BackingOps for Backing {
    fn kind(&self) -> BackingKind {
        match self {
            Backing::Thread(b) => b.kind(),
            Backing::Process(b) => b.kind(),
        }
    }

    fn handle(&self) -> BackingHandle {
        match self {
            Backing::Thread(b) => b.handle(),
            Backing::Process(b) => b.handle(),
        }
    }

    fn is_started(&self) -> bool {
        match self {
            Backing::Thread(b) => b.is_started(),
            Backing::Process(b) => b.is_started(),
        }
    }

    fn wait_attempt(
        &mut self,
        id: VicId,
        timeout: Duration,
        poll: Duration,
        executing: &dyn Fn() -> bool,
    ) -> VicResult<WaitStatus> {
        match self {
            Backing::Thread(b) => b.wait_attempt(id, timeout, poll, executing),
            Backing::Process(b) => b.wait_attempt(id, timeout, poll, executing),
        }
    }

    fn teardown(&mut self) {
        match self {
            Backing::Thread(b) => b.teardown(),
            Backing::Process(b) => b.teardown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATTEMPT: Duration = Duration::from_millis(50);
    const POLL: Duration = Duration::from_millis(2);

    fn never() -> bool {
        false
    }

    #[test]
    fn test_thread_wait_until_done() {
        let mut backing = ThreadBacking::new();
        assert!(!backing.is_started());

        let completion = Arc::new(Completion::new());
        let (tx, rx) = flume::bounded::<()>(0);
        let signal = completion.clone();
        backing
            .spawn(
                "test-thread".into(),
                completion,
                Box::new(move || {
                    let _ = rx.recv();
                    signal.complete();
                }),
            )
            .unwrap();

        assert!(backing.is_started());
        assert!(matches!(backing.handle(), BackingHandle::Thread(Some(_))));
        assert_eq!(
            backing.wait_attempt(1, ATTEMPT, POLL, &never).unwrap(),
            WaitStatus::NotDone
        );

        tx.send(()).unwrap();
        let mut status = WaitStatus::NotDone;
        for _ in 0..20 {
            status = backing.wait_attempt(1, ATTEMPT, POLL, &never).unwrap();
            if status == WaitStatus::Done {
                break;
            }
        }
        assert_eq!(status, WaitStatus::Done);
        assert_eq!(
            backing.wait_attempt(1, ATTEMPT, POLL, &never).unwrap(),
            WaitStatus::Done
        );
    }

    #[test]
    fn test_thread_panic_is_reported() {
        let mut backing = ThreadBacking::new();
        let completion = Arc::new(Completion::new());
        let signal = completion.clone();
        backing
            .spawn(
                "test-panic".into(),
                completion,
                Box::new(move || {
                    let _guard = signal.complete_on_drop();
                    panic!("routine failure");
                }),
            )
            .unwrap();

        let mut result = Ok(WaitStatus::NotDone);
        for _ in 0..20 {
            result = backing.wait_attempt(9, ATTEMPT, POLL, &never);
            if !matches!(result, Ok(WaitStatus::NotDone)) {
                break;
            }
        }
        assert!(matches!(result, Err(VicError::RoutinePanicked(9))));
    }

    #[test]
    fn test_adopted_foreign_process_done_when_gone() {
        // pid 0x7ffffff0 is far above pid_max and never alive
        let mut backing = ProcessBacking::adopt(0x7fff_fff0);
        assert!(backing.is_started());
        assert_eq!(
            backing.wait_attempt(1, ATTEMPT, POLL, &never).unwrap(),
            WaitStatus::Done
        );
    }

    #[test]
    fn test_adopted_process_waits_while_executing() {
        let mut backing = ProcessBacking::adopt(0x7fff_fff0);
        let executing = || true;
        assert_eq!(
            backing.wait_attempt(1, ATTEMPT, POLL, &executing).unwrap(),
            WaitStatus::NotDone
        );
    }

    #[test]
    fn test_split_thread_keeps_process_wait_pending() {
        let mut thread = ThreadBacking::new();
        let completion = Arc::new(Completion::new());
        let (tx, rx) = flume::bounded::<()>(0);
        let signal = completion.clone();
        thread
            .spawn(
                "test-split".into(),
                completion,
                Box::new(move || {
                    let _ = rx.recv();
                    signal.complete();
                }),
            )
            .unwrap();

        let tid = platform::current_tid();
        let mut backing = ProcessBacking::adopt(tid).with_local(thread, tid);
        assert!(backing.has_local());
        assert!(!backing.has_external_pid());
        assert_eq!(
            backing.wait_attempt(1, ATTEMPT, POLL, &never).unwrap(),
            WaitStatus::NotDone
        );

        tx.send(()).unwrap();
        let mut status = WaitStatus::NotDone;
        for _ in 0..20 {
            status = backing.wait_attempt(1, ATTEMPT, POLL, &never).unwrap();
            if status == WaitStatus::Done {
                break;
            }
        }
        assert_eq!(status, WaitStatus::Done);

        let local = backing.take_local().unwrap();
        assert_eq!(local.tid, tid);
        assert!(!backing.has_local());
    }

    #[test]
    fn test_external_pid_with_split_thread() {
        let backing = ProcessBacking::adopt(4242).with_local(ThreadBacking::new(), 17);
        assert!(backing.has_external_pid());
        assert_eq!(backing.local_tid(), Some(17));
        assert!(!ProcessBacking::new().has_external_pid());
    }

    #[test]
    fn test_unstarted_backings_are_done() {
        let mut backing = Backing::new(BackingKind::Process);
        assert_eq!(backing.kind(), BackingKind::Process);
        assert_eq!(backing.handle(), BackingHandle::Process(None));
        assert_eq!(
            backing.wait_attempt(1, ATTEMPT, POLL, &never).unwrap(),
            WaitStatus::Done
        );
    }
}
