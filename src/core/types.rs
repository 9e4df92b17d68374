/*!
 * Core Types
 * Common types used across the runtime
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Virtual isolation context identifier (monotonic per runtime)
pub type VicId = u64;

/// OS process ID
pub type OsPid = i32;

/// OS (kernel) thread ID
pub type OsTid = i32;

/// Raw pthread handle of an OS thread
pub type RawThread = std::os::unix::thread::RawPthread;

/// What an execution unit is backed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackingKind {
    /// OS thread inside the current process
    Thread,
    /// Separate OS process
    Process,
}

impl BackingKind {
    /// Raw flag for thread backing
    pub const THREAD_FLAG: u32 = 0x01;
    /// Raw flag for process backing
    pub const PROCESS_FLAG: u32 = 0x02;

    /// Decode the raw flag encoding. Thread wins when both bits are set.
    pub fn from_flags(flags: u32) -> Option<Self> {
        if flags & Self::THREAD_FLAG != 0 {
            Some(Self::Thread)
        } else if flags & Self::PROCESS_FLAG != 0 {
            Some(Self::Process)
        } else {
            None
        }
    }

    pub fn flag(self) -> u32 {
        match self {
            Self::Thread => Self::THREAD_FLAG,
            Self::Process => Self::PROCESS_FLAG,
        }
    }

    /// The kind a pass converts this backing into
    pub fn opposite(self) -> Self {
        match self {
            Self::Thread => Self::Process,
            Self::Process => Self::Thread,
        }
    }
}

impl fmt::Display for BackingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread => f.write_str("thread"),
            Self::Process => f.write_str("process"),
        }
    }
}

impl FromStr for BackingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(Self::Thread),
            "process" => Ok(Self::Process),
            other => Err(format!("unknown backing kind '{}'", other)),
        }
    }
}

/// Current backing handle of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "handle", rename_all = "snake_case")]
pub enum BackingHandle {
    Thread(Option<RawThread>),
    Process(Option<OsPid>),
}

/// Outcome of one bounded wait attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Done,
    NotDone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags_prefers_thread() {
        assert_eq!(BackingKind::from_flags(0x01), Some(BackingKind::Thread));
        assert_eq!(BackingKind::from_flags(0x02), Some(BackingKind::Process));
        assert_eq!(BackingKind::from_flags(0x03), Some(BackingKind::Thread));
        assert_eq!(BackingKind::from_flags(0x00), None);
        assert_eq!(BackingKind::from_flags(0x04), None);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("Process".parse::<BackingKind>().unwrap(), BackingKind::Process);
        assert_eq!(BackingKind::Thread.to_string(), "thread");
        assert!("fiber".parse::<BackingKind>().is_err());
        assert_eq!(BackingKind::Thread.opposite(), BackingKind::Process);
    }
}
