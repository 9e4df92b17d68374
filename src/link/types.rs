/*!
 * Link Types
 * Channel kinds, roles and link errors
 */

use crate::core::types::{BackingKind, VicId};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Link operation result
pub type LinkResult<T> = Result<T, LinkError>;

/// Link errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum LinkError {
    #[error("No link named '{0}' on this context")]
    #[diagnostic(
        code(link::no_such_channel),
        help("Create the link with Runtime::link before sending or receiving on it.")
    )]
    NoSuchChannel(String),

    #[error("Attempt timed out")]
    #[diagnostic(code(link::timeout))]
    Timeout,

    #[error("Peer reset the connection on '{0}'")]
    #[diagnostic(code(link::reset))]
    Reset(String),

    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    #[diagnostic(code(link::frame_too_large))]
    FrameTooLarge { len: usize, max: usize },

    #[error("Invalid address '{0}'")]
    #[diagnostic(code(link::invalid_address))]
    InvalidAddress(String),

    #[error("Link I/O error: {0}")]
    #[diagnostic(code(link::io_error))]
    Io(String),
}

impl LinkError {
    /// Errors a retry loop absorbs by trying again
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, LinkError::Timeout | LinkError::Reset(_))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => LinkError::Timeout,
            _ => LinkError::Io(err.to_string()),
        }
    }
}

/// Transport carrying a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Both ends share an address space
    InProcess,
    /// At least one end lives in another process
    LocalIpc,
}

impl ChannelKind {
    /// Local IPC as soon as either end is process-backed
    pub fn for_backings(a: BackingKind, b: BackingKind) -> Self {
        if a == BackingKind::Process || b == BackingKind::Process {
            ChannelKind::LocalIpc
        } else {
            ChannelKind::InProcess
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProcess => f.write_str("inproc"),
            Self::LocalIpc => f.write_str("ipc"),
        }
    }
}

/// Which side of the pair an endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    Bind,
    Connect,
}

/// Serializable view of one link endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub name: String,
    pub peer: VicId,
    pub kind: ChannelKind,
    pub role: LinkRole,
    pub address: String,
    pub connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_backings() {
        use BackingKind::*;
        assert_eq!(ChannelKind::for_backings(Thread, Thread), ChannelKind::InProcess);
        assert_eq!(ChannelKind::for_backings(Thread, Process), ChannelKind::LocalIpc);
        assert_eq!(ChannelKind::for_backings(Process, Thread), ChannelKind::LocalIpc);
        assert_eq!(ChannelKind::for_backings(Process, Process), ChannelKind::LocalIpc);
    }

    #[test]
    fn test_transient_errors() {
        assert!(LinkError::Timeout.is_transient());
        assert!(LinkError::Reset("x".into()).is_transient());
        assert!(!LinkError::NoSuchChannel("x".into()).is_transient());
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let err: LinkError = std::io::Error::from(std::io::ErrorKind::WouldBlock).into();
        assert_eq!(err, LinkError::Timeout);
    }
}
