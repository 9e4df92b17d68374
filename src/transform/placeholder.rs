/*!
 * Placeholder Threads
 *
 * A merge pass parks one thread per child process at a pause checkpoint.
 * The controller learns its tid, and on commit the context adopts the thread
 * as its new backing before it is released.
 */

use crate::context::Completion;
use crate::core::errors::{VicError, VicResult};
use crate::core::types::{OsPid, OsTid, RawThread};
use crate::pause::PauseTable;
use crate::platform;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

pub(crate) struct Placeholder {
    pid: OsPid,
    tid: OsTid,
    raw: RawThread,
    handle: JoinHandle<()>,
    completion: Arc<Completion>,
    release: Arc<AtomicBool>,
}

impl Placeholder {
    /// Spawn a placeholder for child `pid` and wait until it is paused
    pub(crate) fn spawn(
        pid: OsPid,
        table: &Arc<PauseTable>,
        stack_size: Option<usize>,
        timeout: Duration,
        poll: Duration,
    ) -> VicResult<Self> {
        let completion = Arc::new(Completion::new());
        let release = Arc::new(AtomicBool::new(false));
        let (tx, rx) = flume::bounded::<(OsTid, RawThread)>(1);

        let handle = {
            let table = table.clone();
            let completion = completion.clone();
            let release = release.clone();
            let mut builder =
                std::thread::Builder::new().name(format!("vic-placeholder-{}", pid));
            if let Some(bytes) = stack_size {
                builder = builder.stack_size(bytes);
            }
            builder
                .spawn(move || {
                    let _done = completion.complete_on_drop();
                    let enrollment = table.enroll();
                    if tx.send((platform::current_tid(), enrollment.thread())).is_err() {
                        return;
                    }
                    while !release.load(Ordering::Acquire) {
                        if enrollment.checkpoint() {
                            break;
                        }
                        std::thread::sleep(poll);
                    }
                })
                .map_err(|e| {
                    VicError::ResourceCreation(format!("placeholder spawn failed: {}", e))
                })?
        };

        let (tid, raw) = match rx.recv_timeout(timeout) {
            Ok(ids) => ids,
            Err(_) => {
                release.store(true, Ordering::Release);
                return Err(VicError::ResourceCreation(format!(
                    "placeholder for pid {} never reported in",
                    pid
                )));
            }
        };

        if let Err(e) = table.pause(raw, timeout) {
            release.store(true, Ordering::Release);
            return Err(e.into());
        }

        debug!(pid, tid, "Placeholder thread parked");
        Ok(Self {
            pid,
            tid,
            raw,
            handle,
            completion,
            release,
        })
    }

    pub(crate) fn pid(&self) -> OsPid {
        self.pid
    }

    pub(crate) fn tid(&self) -> OsTid {
        self.tid
    }

    /// Hand the thread over to a context; resume it with `raw` afterwards
    pub(crate) fn into_parts(self) -> (JoinHandle<()>, Arc<Completion>, RawThread) {
        (self.handle, self.completion, self.raw)
    }

    /// Abandon the pairing and let the thread finish
    pub(crate) fn cancel(self, table: &PauseTable) {
        self.release.store(true, Ordering::Release);
        if let Err(e) = table.resume(self.raw) {
            warn!(pid = self.pid, error = %e, "Placeholder resume failed");
        }
    }
}
