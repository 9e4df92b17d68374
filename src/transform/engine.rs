/*!
 * Transformation Engine
 *
 * Background thread serving the control socket of this process. It runs at
 * most one pass at a time and stops cooperatively: every bounded accept or
 * read rechecks the stop flag, and a pass interrupted by a stop is rolled
 * back before the thread exits.
 */

use super::control::{ControlCommand, ControlConnection, ControlError, ControlListener, Direction};
use super::pass::Pass;
use crate::core::errors::{VicError, VicResult};
use crate::core::types::OsPid;
use crate::monitoring::span_pass;
use crate::platform;
use crate::runtime::{Runtime, RuntimeInner};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, error, info, warn};

/// State shared between the engine thread and its handle
#[derive(Debug, Default)]
pub struct EngineShared {
    stop: AtomicBool,
    in_progress: AtomicBool,
    address: Mutex<PathBuf>,
}

impl EngineShared {
    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn address(&self) -> PathBuf {
        self.address.lock().clone()
    }
}

/// Handle to the running engine thread
pub struct TransformEngine {
    shared: Arc<EngineShared>,
    handle: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

impl TransformEngine {
    /// Bind the control socket and start serving it
    pub(crate) fn spawn(runtime: Weak<RuntimeInner>, address: &Path) -> VicResult<Self> {
        let listener = ControlListener::bind(address)?;
        let shared = Arc::new(EngineShared {
            address: Mutex::new(address.to_path_buf()),
            ..Default::default()
        });

        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("vic-transform".to_string())
            .spawn(move || run(runtime, thread_shared, listener))
            .map_err(|e| {
                error!(error = %e, "Transformation engine spawn failed");
                VicError::ResourceCreation(format!("engine spawn failed: {}", e))
            })?;

        info!(address = %address.display(), "Transformation engine started");
        Ok(Self {
            shared,
            thread_id: Some(handle.thread().id()),
            handle: Some(handle),
        })
    }

    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    pub fn in_progress(&self) -> bool {
        self.shared.in_progress()
    }

    pub fn address(&self) -> PathBuf {
        self.shared.address()
    }

    /// Raise the stop flag and wait for the thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        // The last runtime reference can be released on the engine thread itself
        if Some(std::thread::current().id()) == self.thread_id {
            return;
        }
        if handle.join().is_err() {
            warn!("Transformation engine panicked");
        }
        debug!("Transformation engine joined");
    }
}

impl Drop for TransformEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(runtime: Weak<RuntimeInner>, shared: Arc<EngineShared>, mut listener: ControlListener) {
    loop {
        if shared.stop_requested() {
            break;
        }
        let Some((timeout, poll)) = Runtime::upgrade(&runtime).map(|rt| {
            let config = rt.config();
            (config.attempt_timeout(), config.poll_interval())
        }) else {
            break;
        };

        match listener.accept_timeout(timeout, poll, &shared.stop) {
            Ok(Some(conn)) => serve(&runtime, &shared, &mut listener, conn),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Control accept failed");
                std::thread::sleep(poll);
            }
        }
    }
    info!("Transformation engine stopped");
}

/// Handle frames from one controller until it hangs up
fn serve(
    runtime: &Weak<RuntimeInner>,
    shared: &EngineShared,
    listener: &mut ControlListener,
    mut conn: ControlConnection,
) {
    while !shared.stop_requested() {
        let Some(rt) = Runtime::upgrade(runtime) else {
            return;
        };
        let frame = match conn.read_frame(rt.config().attempt_timeout()) {
            Ok(frame) => frame,
            Err(ControlError::Timeout) => continue,
            Err(ControlError::Closed) => return,
            Err(e) => {
                warn!(error = %e, "Control read failed");
                return;
            }
        };
        if frame.is_empty() {
            continue;
        }

        match ControlCommand::parse(&frame) {
            Ok(ControlCommand::Prepare {
                direction,
                stack_size,
            }) => {
                run_pass(&rt, shared, listener, conn, direction, stack_size);
                return;
            }
            Ok(ControlCommand::Start(_)) => {
                warn!("'start' without a prepared pass, ignoring");
            }
            Err(e) => warn!(frame = %frame, error = %e, "Ignoring control frame"),
        }
    }
}

fn run_pass(
    rt: &Runtime,
    shared: &EngineShared,
    listener: &mut ControlListener,
    mut conn: ControlConnection,
    direction: Option<Direction>,
    stack_size: Option<usize>,
) {
    let pid = platform::current_pid();
    let mut pass = match Pass::prepare(rt, direction, stack_size) {
        Ok(pass) => pass,
        Err(e) => {
            warn!(error = %e, "Transformation prepare failed");
            if let Err(write_err) = conn.write_frame(&format!("error {}", e)) {
                warn!(error = %write_err, "Failed to report prepare failure");
            }
            return;
        }
    };

    let span = span_pass(&pass.direction().to_string(), pid);
    let _entered = span.enter();
    span.record_affected(pass.affected_count());
    shared.in_progress.store(true, Ordering::Release);

    if let Err(e) = conn.send_ready(pass.ready()) {
        warn!(error = %e, "Failed to send ready");
        span.record_outcome("rolled_back");
        pass.rollback(rt);
        shared.in_progress.store(false, Ordering::Release);
        return;
    }

    match pass.await_external(rt, &shared.stop) {
        Ok(true) => {}
        Ok(false) => {
            span.record_outcome("rolled_back");
            pass.rollback(rt);
            shared.in_progress.store(false, Ordering::Release);
            return;
        }
        Err(e) => {
            warn!(error = %e, "Lost track of the external action");
            span.record_outcome("rolled_back");
            pass.rollback(rt);
            shared.in_progress.store(false, Ordering::Release);
            return;
        }
    }

    let new_pid = platform::current_pid();
    if new_pid != pid {
        rebind(rt, shared, listener, new_pid);
    }

    match await_start(rt, shared, listener, conn) {
        Some(pids) => {
            span.record_outcome("committed");
            pass.commit(rt, &pids);
        }
        None => {
            span.record_outcome("rolled_back");
            pass.rollback(rt);
        }
    }
    shared.in_progress.store(false, Ordering::Release);
}

/// The process id changed under us: serve the control address of the new one
fn rebind(rt: &Runtime, shared: &EngineShared, listener: &mut ControlListener, pid: OsPid) {
    let address = rt.config().control_address(pid);
    match ControlListener::bind(&address) {
        Ok(new_listener) => {
            info!(pid, address = %address.display(), "Control socket moved to new pid");
            *listener = new_listener;
            *shared.address.lock() = address;
        }
        Err(e) => error!(pid, error = %e, "Control rebind failed"),
    }
}

/// Wait for `start` on the prepare connection or on any later one
fn await_start(
    rt: &Runtime,
    shared: &EngineShared,
    listener: &ControlListener,
    conn: ControlConnection,
) -> Option<Vec<OsPid>> {
    let timeout = rt.config().attempt_timeout();
    let poll = rt.config().poll_interval();
    let mut current = Some(conn);

    while !shared.stop_requested() {
        let Some(conn) = current.as_mut() else {
            match listener.accept_timeout(timeout, poll, &shared.stop) {
                Ok(accepted) => current = accepted,
                Err(e) => {
                    warn!(error = %e, "Control accept failed");
                    std::thread::sleep(poll);
                }
            }
            continue;
        };

        let frame = match conn.read_frame(timeout) {
            Ok(frame) => frame,
            Err(ControlError::Timeout) => continue,
            Err(e) => {
                debug!(error = %e, "Controller connection ended before start");
                current = None;
                continue;
            }
        };
        if frame.is_empty() {
            continue;
        }

        match ControlCommand::parse(&frame) {
            Ok(ControlCommand::Start(pids)) => return Some(pids),
            Ok(ControlCommand::Prepare { .. }) => {
                warn!("'prepare' while a pass is in flight, ignoring");
            }
            Err(e) => warn!(frame = %frame, error = %e, "Ignoring control frame"),
        }
    }
    None
}
