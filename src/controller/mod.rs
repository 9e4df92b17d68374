/*!
 * Controller Client
 *
 * The library side of an external controller: asks a process's engine to
 * prepare a pass, performs nothing itself, and tells the engine to start
 * once the OS-level action is done.
 */

use crate::core::config::RuntimeConfig;
use crate::core::limits::CONTROL_READ_TIMEOUT;
use crate::core::types::OsPid;
use crate::transform::{ControlCommand, ControlConnection, ControlResult, Direction, Ready};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Connection to one process's transformation engine
pub struct ControlClient {
    path: PathBuf,
    conn: ControlConnection,
    timeout: Duration,
    stack_size: Option<usize>,
}

impl ControlClient {
    /// Connect to the engine of `pid` using the configured control directory
    pub fn connect(config: &RuntimeConfig, pid: OsPid) -> ControlResult<Self> {
        Self::connect_path(&config.control_address(pid))
    }

    pub fn connect_path(path: &Path) -> ControlResult<Self> {
        let conn = ControlConnection::connect(path)?;
        debug!(address = %path.display(), "Connected to control socket");
        Ok(Self {
            path: path.to_path_buf(),
            conn,
            timeout: CONTROL_READ_TIMEOUT,
            stack_size: None,
        })
    }

    /// How long to wait for the `ready` reply
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stack size for the placeholder threads of a merge
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Request a pass and wait for the participants to act on
    pub fn prepare(&mut self, direction: Option<Direction>) -> ControlResult<Ready> {
        self.conn.send_command(&ControlCommand::Prepare {
            direction,
            stack_size: self.stack_size,
        })?;
        let ready = self.conn.read_ready(direction, self.timeout)?;
        info!(
            direction = %ready.direction,
            count = ready.count(),
            "Engine ready"
        );
        Ok(ready)
    }

    /// Commit the prepared pass; `pids` follow the order of the `ready` list
    pub fn start(&mut self, pids: &[OsPid]) -> ControlResult<()> {
        self.conn
            .send_command(&ControlCommand::Start(pids.to_vec()))?;
        info!(pids = ?pids, "Start sent");
        Ok(())
    }
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient")
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .field("stack_size", &self.stack_size)
            .finish()
    }
}
