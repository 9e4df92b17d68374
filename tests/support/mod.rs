/*!
 * Shared test helpers
 */

#![allow(dead_code)]

use std::time::{Duration, Instant};
use tempfile::TempDir;
use vic_runtime::{Runtime, RuntimeConfig};

/// Runtime with short timeouts and private socket directories
pub fn runtime() -> (Runtime, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = RuntimeConfig::default()
        .with_socket_dir(dir.path())
        .with_attempt_timeout(Duration::from_millis(50))
        .with_poll_interval(Duration::from_millis(2));
    (Runtime::with_config(config), dir)
}

/// Poll `cond` until it holds or `limit` elapses
pub fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
