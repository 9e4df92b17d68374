/*!
 * Runtime Configuration
 * Timeouts and socket locations, with environment overrides
 */

use super::limits::{
    CONTROL_SOCKET_PREFIX, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_SOCKET_DIR,
    INPROC_PREFIX, IPC_SCHEME,
};
use super::types::OsPid;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Runtime configuration
///
/// Environment variables read by [`RuntimeConfig::from_env`]:
/// - `VIC_ATTEMPT_TIMEOUT_MS`: bound on one send/recv/wait attempt
/// - `VIC_POLL_INTERVAL_MS`: polling quantum
/// - `VIC_IPC_DIR`: directory holding local-IPC link sockets
/// - `VIC_CONTROL_DIR`: directory holding the control socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RuntimeConfig {
    pub attempt_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub ipc_dir: PathBuf,
    pub control_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            ipc_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            control_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `VIC_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_millis("VIC_ATTEMPT_TIMEOUT_MS") {
            config.attempt_timeout_ms = ms;
        }
        if let Some(ms) = env_millis("VIC_POLL_INTERVAL_MS") {
            config.poll_interval_ms = ms;
        }
        if let Ok(dir) = std::env::var("VIC_IPC_DIR") {
            config.ipc_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("VIC_CONTROL_DIR") {
            config.control_dir = PathBuf::from(dir);
        }

        config
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = timeout.as_millis().max(1) as u64;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    pub fn with_ipc_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.ipc_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_control_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.control_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Use one directory for both link and control sockets
    pub fn with_socket_dir(self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.with_ipc_dir(dir).with_control_dir(dir)
    }

    #[inline]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms.max(1))
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Transport prefix of in-process links
    pub fn inproc_prefix(&self) -> String {
        INPROC_PREFIX.to_string()
    }

    /// Transport prefix of local-IPC links, e.g. `ipc:///tmp/`
    pub fn ipc_prefix(&self) -> String {
        format!("{}{}/", IPC_SCHEME, self.ipc_dir.display())
    }

    /// Control socket path for a process
    pub fn control_address(&self, pid: OsPid) -> PathBuf {
        self.control_dir
            .join(format!("{}{}", CONTROL_SOCKET_PREFIX, pid))
    }
}

fn env_millis(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(ms),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "Ignoring invalid duration override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.attempt_timeout(), DEFAULT_ATTEMPT_TIMEOUT);
        assert_eq!(config.ipc_prefix(), "ipc:///tmp/");
        assert_eq!(config.inproc_prefix(), "inproc://");
        assert_eq!(
            config.control_address(42),
            PathBuf::from("/tmp/vic_transform_prepare_42")
        );
    }

    #[test]
    fn test_builder_overrides() {
        let config = RuntimeConfig::default()
            .with_attempt_timeout(Duration::from_millis(20))
            .with_socket_dir("/run/vic");
        assert_eq!(config.attempt_timeout_ms, 20);
        assert_eq!(config.ipc_prefix(), "ipc:///run/vic/");
        assert_eq!(
            config.control_address(7),
            PathBuf::from("/run/vic/vic_transform_prepare_7")
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"attempt_timeout_ms": 75}"#).unwrap();
        assert_eq!(config.attempt_timeout_ms, 75);
        assert_eq!(config.ipc_dir, PathBuf::from(DEFAULT_SOCKET_DIR));
    }
}
