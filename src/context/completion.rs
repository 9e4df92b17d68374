/*!
 * Completion Signal
 * One-shot "routine returned" flag with timed waits
 */

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Set once when a thread's body returns; waiters block with a deadline
#[derive(Debug, Default)]
pub struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        *self.done.lock()
    }

    /// Wait up to `timeout`; true once completed
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.cond.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }

    /// Guard that completes when dropped, including during unwinding
    pub fn complete_on_drop(self: &Arc<Self>) -> CompleteOnDrop {
        CompleteOnDrop(self.clone())
    }
}

pub struct CompleteOnDrop(Arc<Completion>);

impl Drop for CompleteOnDrop {
    fn drop(&mut self) {
        self.0.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_times_out_then_completes() {
        let completion = Arc::new(Completion::new());
        assert!(!completion.wait_timeout(Duration::from_millis(5)));

        let signal = completion.clone();
        let handle = std::thread::spawn(move || {
            let _guard = signal.complete_on_drop();
        });
        assert!(completion.wait_timeout(Duration::from_secs(5)));
        assert!(completion.is_complete());
        handle.join().unwrap();
    }
}
