/*!
 * Thread Pause
 *
 * Freezes and thaws one specific OS thread. A thread opts in with `enroll`
 * and parks at its next `checkpoint` after `pause` was requested for it.
 * `pause` returns once the target is parked; `resume` releases it.
 */

use crate::core::types::RawThread;
use crate::platform;
use ahash::RandomState;
use dashmap::DashMap;
use miette::Diagnostic;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Pause operation result
pub type PauseResult<T> = Result<T, PauseError>;

#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum PauseError {
    #[error("Thread {0:#x} is not enrolled for pausing")]
    #[diagnostic(
        code(pause::not_enrolled),
        help("The target thread must call PauseTable::enroll first.")
    )]
    NotEnrolled(u64),

    #[error("Thread {0:#x} did not reach a checkpoint in time")]
    #[diagnostic(code(pause::timeout))]
    Timeout(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseState {
    Running,
    Requested,
    Parked,
}

#[derive(Debug)]
struct PauseSlot {
    state: Mutex<PauseState>,
    cond: Condvar,
}

/// Per-runtime table of pausable threads
#[derive(Default)]
pub struct PauseTable {
    slots: DashMap<RawThread, Arc<PauseSlot>, RandomState>,
}

impl PauseTable {
    pub fn new() -> Self {
        Self {
            slots: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Make the calling thread pausable until the returned guard is dropped
    pub fn enroll(self: &Arc<Self>) -> Enrollment {
        let thread = platform::current_thread();
        let slot = Arc::new(PauseSlot {
            state: Mutex::new(PauseState::Running),
            cond: Condvar::new(),
        });
        self.slots.insert(thread, slot);
        trace!(thread = raw_id(thread), "Thread enrolled for pausing");
        Enrollment {
            table: self.clone(),
            thread,
        }
    }

    pub fn is_enrolled(&self, thread: RawThread) -> bool {
        self.slots.contains_key(&thread)
    }

    /// Park the calling thread if a pause is pending. Returns true if it parked.
    pub fn checkpoint(&self) -> bool {
        let Some(slot) = self.slot(platform::current_thread()) else {
            return false;
        };

        let mut state = slot.state.lock();
        if *state != PauseState::Requested {
            return false;
        }

        *state = PauseState::Parked;
        slot.cond.notify_all();
        while *state == PauseState::Parked {
            slot.cond.wait(&mut state);
        }
        true
    }

    /// Request a pause and block until `thread` is parked
    pub fn pause(&self, thread: RawThread, timeout: Duration) -> PauseResult<()> {
        let slot = self
            .slot(thread)
            .ok_or(PauseError::NotEnrolled(raw_id(thread)))?;

        let deadline = Instant::now() + timeout;
        let mut state = slot.state.lock();
        if *state == PauseState::Running {
            *state = PauseState::Requested;
        }
        while *state != PauseState::Parked {
            if slot.cond.wait_until(&mut state, deadline).timed_out() {
                if *state == PauseState::Parked {
                    break;
                }
                *state = PauseState::Running;
                return Err(PauseError::Timeout(raw_id(thread)));
            }
        }
        debug!(thread = raw_id(thread), "Thread paused");
        Ok(())
    }

    /// Release `thread` from its checkpoint, or cancel a pending request
    pub fn resume(&self, thread: RawThread) -> PauseResult<()> {
        let slot = self
            .slot(thread)
            .ok_or(PauseError::NotEnrolled(raw_id(thread)))?;

        let mut state = slot.state.lock();
        *state = PauseState::Running;
        slot.cond.notify_all();
        debug!(thread = raw_id(thread), "Thread resumed");
        Ok(())
    }

    fn slot(&self, thread: RawThread) -> Option<Arc<PauseSlot>> {
        self.slots.get(&thread).map(|s| s.value().clone())
    }
}

/// Enrollment of one thread; dropping it disables pausing for that thread
pub struct Enrollment {
    table: Arc<PauseTable>,
    thread: RawThread,
}

impl Enrollment {
    pub fn thread(&self) -> RawThread {
        self.thread
    }

    /// Checkpoint for the enrolled thread
    pub fn checkpoint(&self) -> bool {
        self.table.checkpoint()
    }
}

impl Drop for Enrollment {
    fn drop(&mut self) {
        if let Some((_, slot)) = self.table.slots.remove(&self.thread) {
            // Never leave a pauser waiting on a thread that is gone
            *slot.state.lock() = PauseState::Running;
            slot.cond.notify_all();
        }
    }
}

#[inline]
fn raw_id(thread: RawThread) -> u64 {
    thread as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_pause_unknown_thread() {
        let table = PauseTable::new();
        assert!(matches!(
            table.pause(platform::current_thread(), Duration::from_millis(1)),
            Err(PauseError::NotEnrolled(_))
        ));
        assert!(!table.checkpoint());
    }

    #[test]
    fn test_pause_and_resume() {
        let table = Arc::new(PauseTable::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = flume::bounded(1);

        let worker = {
            let table = table.clone();
            let counter = counter.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let enrollment = table.enroll();
                tx.send(enrollment.thread()).unwrap();
                while !stop.load(Ordering::SeqCst) {
                    enrollment.checkpoint();
                    counter.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        };

        let thread = rx.recv().unwrap();
        table.pause(thread, Duration::from_secs(5)).unwrap();
        let frozen = counter.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), frozen);

        table.resume(thread).unwrap();
        stop.store(true, Ordering::SeqCst);
        worker.join().unwrap();
        assert!(counter.load(Ordering::SeqCst) > frozen);
        assert!(!table.is_enrolled(thread));
    }

    #[test]
    fn test_pause_times_out_without_checkpoint() {
        let table = Arc::new(PauseTable::new());
        let (tx, rx) = flume::bounded(1);
        let (done_tx, done_rx) = flume::bounded::<()>(1);

        let worker = {
            let table = table.clone();
            std::thread::spawn(move || {
                let enrollment = table.enroll();
                tx.send(enrollment.thread()).unwrap();
                let _ = done_rx.recv();
            })
        };

        let thread = rx.recv().unwrap();
        assert_eq!(
            table.pause(thread, Duration::from_millis(10)),
            Err(PauseError::Timeout(raw_id(thread)))
        );
        done_tx.send(()).unwrap();
        worker.join().unwrap();
    }
}
