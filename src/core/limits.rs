/*!
 * Runtime Limits and Constants
 *
 * Centralized location for timeouts, address prefixes and other magic numbers.
 */

use std::time::Duration;

// =============================================================================
// RETRY LOOPS
// =============================================================================

/// Bound on a single send/recv/wait attempt while the flow lock is held.
/// Every retry loop releases the lock between attempts, so this is also the
/// longest time the transformation engine waits for one flow.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(250);

/// Sleep quantum for polling loops (reaping, accept, thread-count watch)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound for a single control frame read
pub const CONTROL_READ_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// ADDRESSING
// =============================================================================

/// Transport prefix for in-process links
pub const INPROC_PREFIX: &str = "inproc://";

/// Scheme of local-IPC link addresses (followed by the socket directory)
pub const IPC_SCHEME: &str = "ipc://";

/// Default directory for IPC link sockets and control sockets
pub const DEFAULT_SOCKET_DIR: &str = "/tmp";

/// Control socket file name prefix, followed by the process id
pub const CONTROL_SOCKET_PREFIX: &str = "vic_transform_prepare_";

/// Maximum accepted link payload (16MB)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// =============================================================================
// PROCESS EXIT CODES
// =============================================================================

/// Exit code of a child whose routine returned normally
pub const CHILD_EXIT_OK: i32 = 0;

/// Exit code of a child whose routine panicked
pub const CHILD_EXIT_PANIC: i32 = 101;

/// Exit code used by fatal configuration errors
pub const FATAL_EXIT_CODE: i32 = 1;
