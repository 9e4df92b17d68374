/*!
 * Context Lifecycle
 * create, bind, start, wait and destroy
 */

use super::Runtime;
use crate::context::{
    Backing, BackingOps, Completion, FinishedCallback, Flow, LaunchBody, Launched, Vic, VicInner,
    VicState,
};
use crate::core::errors::{fatal, VicError, VicResult};
use crate::core::limits::{CHILD_EXIT_OK, CHILD_EXIT_PANIC};
use crate::core::types::{BackingKind, WaitStatus};
use crate::platform;
use crate::transform::TransformEngine;
use parking_lot::MutexGuard;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl Runtime {
    /// Allocate and register a context. Starts the engine if none is running.
    pub fn create(&self, kind: BackingKind) -> VicResult<Vic> {
        let id = self.next_id();
        let inner = Arc::new(VicInner::new(id, kind));

        let mut engine = self.inner.engine.lock();
        if engine.is_none() {
            let address = self.inner.config.control_address(platform::current_pid());
            *engine = Some(TransformEngine::spawn(self.downgrade(), &address)?);
        }
        self.inner.registry.register(&inner);
        drop(engine);

        debug!(vic = id, kind = %kind, "Context created");
        Ok(Vic::from_inner(inner))
    }

    /// Create from the raw flag encoding; an invalid value terminates the process
    pub fn create_with_flags(&self, flags: u32) -> Vic {
        let kind = match BackingKind::from_flags(flags) {
            Some(kind) => kind,
            None => fatal(VicError::InvalidBacking(flags)),
        };
        match self.create(kind) {
            Ok(vic) => vic,
            Err(e) => fatal(e),
        }
    }

    /// Attach a routine to a context
    pub fn bind_flow<F>(
        &self,
        vic: &Vic,
        routine: F,
        finished: Option<FinishedCallback>,
    ) -> VicResult<Flow>
    where
        F: Fn(&Flow) + Send + Sync + 'static,
    {
        let flow = Flow::new(vic.clone(), Arc::new(routine), finished, self.clone());
        vic.inner().attach_flow(flow.inner())?;
        debug!(vic = vic.id(), "Flow bound");
        Ok(flow)
    }

    /// Run the finished callback and detach the flow from its context
    pub fn unbind_flow(&self, flow: Flow) {
        if let Some(finished) = flow.take_finished() {
            finished(flow.vic());
        }
        flow.vic().inner().detach_flow();
        debug!(vic = flow.id(), "Flow unbound");
    }

    /// Start the flow on its context's current backing
    pub fn start(&self, flow: &Flow) -> VicResult<()> {
        let vic = flow.vic().inner().clone();
        let id = vic.id();
        let mut state = vic.state().lock();
        if state.backing.is_started() {
            return Err(VicError::AlreadyStarted(id));
        }

        let VicState { backing, links } = &mut *state;
        match backing {
            Backing::Thread(thread) => {
                for link in links.iter_mut() {
                    link.connect(&self.inner.hub, &self.inner.config)?;
                }
                let completion = Arc::new(Completion::new());
                let body = self.thread_body(flow.clone(), completion.clone());
                thread.spawn(format!("vic-{}", id), completion, body)?;
                info!(vic = id, "Thread-backed flow started");
                Ok(())
            }
            Backing::Process(process) => {
                let body: LaunchBody = {
                    let runtime = self.clone();
                    let flow = flow.clone();
                    Box::new(move || {
                        runtime.run_child(flow);
                    })
                };

                let mut engine = self.inner.engine.lock();
                let fork_guard = self.inner.registry.lock_for_fork();
                let launched = process.fork(body);
                drop(fork_guard);

                match launched? {
                    Launched::Here => {
                        // The child owns the sockets from here on
                        for link in links.iter_mut() {
                            link.abandon();
                        }
                        drop(engine);
                        info!(vic = id, pid = ?process.pid(), "Process-backed flow started");
                        Ok(())
                    }
                    Launched::InChild(body) => {
                        // The engine thread does not exist in this process
                        if let Some(inherited) = engine.take() {
                            std::mem::forget(inherited);
                        }
                        drop(engine);
                        drop(state);
                        body();
                        std::process::exit(CHILD_EXIT_OK)
                    }
                }
            }
        }
    }

    /// Block until the flow's routine has finished, one bounded attempt at a time
    pub fn wait(&self, flow: &Flow) -> VicResult<()> {
        let vic = flow.vic().inner().clone();
        let id = vic.id();
        let registry = &self.inner.registry;
        let executing = || registry.is_executing(id);
        let timeout = self.inner.config.attempt_timeout();
        let poll = self.inner.config.poll_interval();

        loop {
            let mut state = vic.state().lock();
            match state.backing.wait_attempt(id, timeout, poll, &executing)? {
                WaitStatus::Done => {
                    debug!(vic = id, "Flow finished");
                    return Ok(());
                }
                WaitStatus::NotDone => MutexGuard::unlock_fair(state),
            }
        }
    }

    /// Tear down a context. Destroying an already destroyed context is a no-op.
    pub fn destroy(&self, vic: Vic) -> VicResult<()> {
        let inner = vic.inner();
        let id = inner.id();
        if inner.has_flow() {
            return Err(VicError::FlowAttached(id));
        }
        if !self.inner.registry.deregister(id) {
            return Ok(());
        }
        self.stop_engine_if_idle();

        let mut state = inner.state().lock();
        for link in state.links.drain(..) {
            if !self.inner.registry.contains(link.peer()) {
                self.inner.hub.remove(link.address());
                self.inner.link_names.remove(link.name());
            }
        }
        state.backing.teardown();
        debug!(vic = id, "Context destroyed");
        Ok(())
    }

    fn stop_engine_if_idle(&self) {
        let engine = {
            let mut engine = self.inner.engine.lock();
            if self.inner.registry.is_empty() {
                engine.take()
            } else {
                None
            }
        };
        if let Some(engine) = engine {
            engine.stop();
        }
    }

    /// Run the routine with registry bookkeeping
    fn execute(&self, flow: &Flow) -> std::thread::Result<()> {
        let id = flow.id();
        self.inner.registry.mark_running(
            id,
            platform::current_tid(),
            Some(platform::current_thread()),
        );
        let result = panic::catch_unwind(AssertUnwindSafe(|| flow.run_routine()));
        self.inner.registry.mark_finished(id);
        if result.is_err() {
            error!(vic = id, "Routine panicked");
        }
        result
    }

    fn thread_body(&self, flow: Flow, completion: Arc<Completion>) -> LaunchBody {
        let runtime = self.clone();
        Box::new(move || {
            let _done = completion.complete_on_drop();
            let result = runtime.execute(&flow);

            // Split into a new process: this thread is that process's exit path
            if platform::current_pid() != runtime.root_pid() {
                runtime.exit_forked(flow, result.is_ok());
            }
            if let Err(payload) = result {
                panic::resume_unwind(payload);
            }
        })
    }

    /// Child side of a process-backed start
    fn run_child(&self, flow: Flow) -> ! {
        let id = flow.id();

        for (other, _) in self.inner.registry.snapshot() {
            if other.id() == id {
                continue;
            }
            // Held by a thread that does not exist here; leave it alone
            if let Some(mut state) = other.state().try_lock() {
                state.abandon_links();
            }
        }
        self.inner.registry.retain_only(id);

        {
            let mut state = flow.vic().inner().state().lock();
            state.abandon_links();
            if let Err(e) = state.connect_links(&self.inner.hub, &self.inner.config) {
                warn!(vic = id, error = %e, "Child link connect failed; will retry on use");
            }
        }

        let ok = self.execute(&flow).is_ok();
        self.finish_child(flow, ok)
    }

    fn exit_forked(&self, flow: Flow, ok: bool) -> ! {
        let engine = self.inner.engine.lock().take();
        if let Some(engine) = engine {
            engine.stop();
        }
        self.finish_child(flow, ok)
    }

    fn finish_child(&self, flow: Flow, ok: bool) -> ! {
        let vic = flow.vic().clone();
        self.unbind_flow(flow);
        if let Err(e) = self.destroy(vic) {
            warn!(error = %e, "Child teardown failed");
        }
        std::process::exit(if ok { CHILD_EXIT_OK } else { CHILD_EXIT_PANIC })
    }
}
