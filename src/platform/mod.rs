/*!
 * Platform Boundary
 *
 * Thin wrappers over the OS primitives the runtime needs: identity queries,
 * process duplication, non-blocking reaping and liveness checks.
 */

use crate::core::errors::{VicError, VicResult};
use crate::core::types::{OsPid, OsTid, RawThread};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus as NixWaitStatus};
use nix::unistd::{fork, getpid, ForkResult, Pid as NixPid};

/// Result of duplicating the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forked {
    /// Still in the original process; carries the child pid
    Parent(OsPid),
    /// Running in the new child process
    Child,
}

/// Outcome of a single non-blocking reap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReapStatus {
    Exited(i32),
    Signaled(String),
    Running,
    /// The pid is not a child of this process
    NotChild,
}

#[inline]
pub fn current_pid() -> OsPid {
    getpid().as_raw()
}

/// Kernel thread id of the calling thread
#[cfg(any(target_os = "linux", target_os = "android"))]
#[inline]
pub fn current_tid() -> OsTid {
    nix::unistd::gettid().as_raw()
}

/// Kernel thread id of the calling thread (the pid where no tid exists)
#[cfg(not(any(target_os = "linux", target_os = "android")))]
#[inline]
pub fn current_tid() -> OsTid {
    current_pid()
}

/// Raw pthread handle of the calling thread
#[inline]
pub fn current_thread() -> RawThread {
    // SAFETY: pthread_self has no preconditions and always succeeds
    unsafe { libc::pthread_self() }
}

/// Number of OS threads in the current process
#[cfg(target_os = "linux")]
pub fn thread_count() -> VicResult<usize> {
    Ok(std::fs::read_dir("/proc/self/task")?.count())
}

#[cfg(not(target_os = "linux"))]
pub fn thread_count() -> VicResult<usize> {
    Err(VicError::NotSupported(
        "thread count requires /proc".to_string(),
    ))
}

/// Duplicate the process image. Both processes return from this call.
///
/// The child only has the calling thread. Callers must not hold locks that
/// other threads could be holding at the moment of the fork.
pub fn duplicate_and_continue() -> VicResult<Forked> {
    // SAFETY: the child side only touches state the caller made consistent
    // (the registry write lock is held across this call) before exiting.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(Forked::Parent(child.as_raw())),
        Ok(ForkResult::Child) => Ok(Forked::Child),
        Err(e) => Err(VicError::ResourceCreation(format!("fork failed: {}", e))),
    }
}

/// Reap `pid` without blocking
pub fn try_reap(pid: OsPid) -> VicResult<ReapStatus> {
    match waitpid(NixPid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(NixWaitStatus::Exited(_, code)) => Ok(ReapStatus::Exited(code)),
        Ok(NixWaitStatus::Signaled(_, signal, _)) => {
            Ok(ReapStatus::Signaled(signal.as_str().to_string()))
        }
        Ok(_) => Ok(ReapStatus::Running),
        Err(Errno::ECHILD) => Ok(ReapStatus::NotChild),
        Err(Errno::EINTR) => Ok(ReapStatus::Running),
        Err(e) => Err(e.into()),
    }
}

/// Whether a process with this pid exists
pub fn is_alive(pid: OsPid) -> bool {
    match kill(NixPid::from_raw(pid), None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        assert!(current_pid() > 0);
        assert!(current_tid() > 0);
        assert!(is_alive(current_pid()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_spawned_thread_has_own_tid() {
        let pid = current_pid();
        let tid = std::thread::spawn(current_tid).join().unwrap();
        assert_ne!(tid, pid);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_thread_count_sees_spawned_thread() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            let _ = rx.recv();
        });
        assert!(thread_count().unwrap() >= 2);
        tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_reap_non_child() {
        assert_eq!(try_reap(1).unwrap(), ReapStatus::NotChild);
    }
}
