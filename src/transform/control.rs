/*!
 * Control Channel
 *
 * Newline-delimited text frames over a Unix socket at
 * `<control_dir>/vic_transform_prepare_<pid>`.
 *
 * controller -> engine: `prepare [split|merge] [<stack bytes>]`, `start [pid ...]`
 * engine -> controller: `ready`, `<count>`, then exactly `count` lines: one
 * `<tid>` per thread (split) or one `<pid> <tid>` per child (merge)
 */

use crate::core::types::{OsPid, OsTid};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Control channel result
pub type ControlResult<T> = Result<T, ControlError>;

#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum ControlError {
    #[error("Malformed control frame: {0}")]
    #[diagnostic(
        code(control::malformed),
        help("Expected 'prepare [split|merge] [stack]' or 'start [pid ...]'.")
    )]
    Malformed(String),

    #[error("Control socket {0} is not available")]
    #[diagnostic(
        code(control::unavailable),
        help("Is the target process running a runtime with live contexts?")
    )]
    Unavailable(String),

    #[error("Engine rejected the request: {0}")]
    #[diagnostic(code(control::rejected))]
    Rejected(String),

    #[error("Control channel closed by peer")]
    #[diagnostic(code(control::closed))]
    Closed,

    #[error("Control channel timed out")]
    #[diagnostic(code(control::timeout))]
    Timeout,

    #[error("Control I/O error: {0}")]
    #[diagnostic(code(control::io_error))]
    Io(String),
}

impl From<std::io::Error> for ControlError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => ControlError::Timeout,
            ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
                ControlError::Closed
            }
            _ => ControlError::Io(err.to_string()),
        }
    }
}

/// Direction of a transformation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Thread-backed contexts become process-backed
    Split,
    /// Process-backed contexts become thread-backed
    Merge,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Split => f.write_str("split"),
            Direction::Merge => f.write_str("merge"),
        }
    }
}

impl FromStr for Direction {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "split" => Ok(Direction::Split),
            "merge" => Ok(Direction::Merge),
            other => Err(ControlError::Malformed(format!("unknown direction '{}'", other))),
        }
    }
}

/// Controller request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Prepare {
        /// `None` lets the engine pick from what is running
        direction: Option<Direction>,
        /// Stack size in bytes for merge placeholder threads
        stack_size: Option<usize>,
    },
    /// Optional pids in the order of the `ready` list
    Start(Vec<OsPid>),
}

impl ControlCommand {
    pub fn prepare(direction: Option<Direction>) -> Self {
        ControlCommand::Prepare {
            direction,
            stack_size: None,
        }
    }

    pub fn parse(line: &str) -> ControlResult<Self> {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("prepare") => {
                let mut direction = None;
                let mut stack_size = None;
                for word in words {
                    if direction.is_none() && stack_size.is_none() {
                        if let Ok(d) = word.parse::<Direction>() {
                            direction = Some(d);
                            continue;
                        }
                    }
                    match word.parse::<usize>() {
                        Ok(bytes) if stack_size.is_none() && bytes > 0 => {
                            stack_size = Some(bytes)
                        }
                        _ => {
                            return Err(ControlError::Malformed(format!(
                                "unexpected argument '{}'",
                                word
                            )))
                        }
                    }
                }
                Ok(ControlCommand::Prepare {
                    direction,
                    stack_size,
                })
            }
            Some("start") => {
                let pids = words
                    .map(|w| {
                        w.parse::<OsPid>()
                            .map_err(|_| ControlError::Malformed(format!("bad pid '{}'", w)))
                    })
                    .collect::<ControlResult<Vec<_>>>()?;
                Ok(ControlCommand::Start(pids))
            }
            Some(other) => Err(ControlError::Malformed(format!(
                "unknown command '{}'",
                other
            ))),
            None => Err(ControlError::Malformed("empty frame".to_string())),
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            ControlCommand::Prepare {
                direction,
                stack_size,
            } => {
                let mut line = "prepare".to_string();
                if let Some(d) = direction {
                    line.push_str(&format!(" {}", d));
                }
                if let Some(bytes) = stack_size {
                    line.push_str(&format!(" {}", bytes));
                }
                line
            }
            ControlCommand::Start(pids) if pids.is_empty() => "start".to_string(),
            ControlCommand::Start(pids) => {
                let pids: Vec<String> = pids.iter().map(|p| p.to_string()).collect();
                format!("start {}", pids.join(" "))
            }
        }
    }
}

/// One participant announced in a `ready` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyEntry {
    /// Child pid (merge only)
    pub pid: Option<OsPid>,
    /// Thread id to act on
    pub tid: OsTid,
}

/// Reply to a `prepare`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    pub direction: Direction,
    pub entries: Vec<ReadyEntry>,
}

impl Ready {
    /// Number of identifiers that follow the count line
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn encode(&self) -> String {
        let mut out = format!("ready\n{}\n", self.count());
        for entry in &self.entries {
            match entry.pid {
                Some(pid) => out.push_str(&format!("{} {}\n", pid, entry.tid)),
                None => out.push_str(&format!("{}\n", entry.tid)),
            }
        }
        out
    }

    /// Read a reply. The direction is the one the controller asked for, or
    /// inferred from the entry shape when it let the engine choose.
    pub fn decode<R: BufRead>(reader: &mut R, asked: Option<Direction>) -> ControlResult<Self> {
        Self::decode_lines(|| read_line(reader), asked)
    }

    fn decode_lines<F>(mut next: F, asked: Option<Direction>) -> ControlResult<Self>
    where
        F: FnMut() -> ControlResult<String>,
    {
        let header = next()?;
        if let Some(reason) = header.strip_prefix("error") {
            return Err(ControlError::Rejected(reason.trim().to_string()));
        }
        if header != "ready" {
            return Err(ControlError::Malformed(format!("expected 'ready', got '{}'", header)));
        }
        let count_line = next()?;
        let count: usize = count_line
            .parse()
            .map_err(|_| ControlError::Malformed(format!("bad count '{}'", count_line)))?;

        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let line = next()?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            let entry = match fields.as_slice() {
                [tid] => ReadyEntry {
                    pid: None,
                    tid: parse_id(tid)?,
                },
                [pid, tid] => ReadyEntry {
                    pid: Some(parse_id(pid)?),
                    tid: parse_id(tid)?,
                },
                _ => return Err(ControlError::Malformed(format!("bad entry '{}'", line))),
            };
            entries.push(entry);
        }

        // An engine choosing for itself only splits when a thread is running,
        // which always yields at least one entry
        let direction = asked.unwrap_or(match entries.first() {
            Some(ReadyEntry { pid: None, .. }) => Direction::Split,
            _ => Direction::Merge,
        });
        Ok(Ready { direction, entries })
    }
}

fn parse_id(s: &str) -> ControlResult<i32> {
    s.parse()
        .map_err(|_| ControlError::Malformed(format!("bad id '{}'", s)))
}

fn read_line<R: BufRead>(reader: &mut R) -> ControlResult<String> {
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => Err(ControlError::Closed),
        Ok(_) => Ok(line.trim().to_string()),
        Err(e) => Err(e.into()),
    }
}

/// Engine side of the control socket
pub struct ControlListener {
    path: PathBuf,
    listener: UnixListener,
    owner: OsPid,
}

impl ControlListener {
    pub fn bind(path: &Path) -> ControlResult<Self> {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        debug!(path = %path.display(), "Control socket bound");
        Ok(Self {
            path: path.to_path_buf(),
            listener,
            owner: crate::platform::current_pid(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept one controller, polling until `timeout` or `stop` is raised
    pub fn accept_timeout(
        &self,
        timeout: Duration,
        poll: Duration,
        stop: &AtomicBool,
    ) -> ControlResult<Option<ControlConnection>> {
        let deadline = Instant::now() + timeout;
        loop {
            if stop.load(Ordering::Acquire) {
                return Ok(None);
            }
            match self.listener.accept() {
                Ok((stream, _)) => return ControlConnection::new(stream).map(Some),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(poll);
        }
    }
}

impl Drop for ControlListener {
    fn drop(&mut self) {
        // An inherited copy in a duplicated process leaves the file alone
        if self.owner != crate::platform::current_pid() {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove control socket");
            }
        }
    }
}

/// One accepted controller connection
pub struct ControlConnection {
    stream: UnixStream,
    /// Bytes received past the last complete line
    pending: Vec<u8>,
}

impl ControlConnection {
    fn new(stream: UnixStream) -> ControlResult<Self> {
        stream.set_nonblocking(false)?;
        Ok(Self {
            stream,
            pending: Vec::new(),
        })
    }

    /// Connect to an engine (controller side)
    pub fn connect(path: &Path) -> ControlResult<Self> {
        let stream = UnixStream::connect(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => {
                ControlError::Unavailable(path.display().to_string())
            }
            _ => e.into(),
        })?;
        Self::new(stream)
    }

    /// Next frame; `Timeout` when no complete line arrived within `timeout`.
    /// A partial line is kept for the next call.
    pub fn read_frame(&mut self, timeout: Duration) -> ControlResult<String> {
        self.read_line_until(Instant::now() + timeout)
    }

    pub fn read_ready(
        &mut self,
        asked: Option<Direction>,
        timeout: Duration,
    ) -> ControlResult<Ready> {
        let deadline = Instant::now() + timeout;
        Ready::decode_lines(|| self.read_line_until(deadline), asked)
    }

    fn read_line_until(&mut self, deadline: Instant) -> ControlResult<String> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&line).trim().to_string());
            }

            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(ControlError::Timeout);
            }
            self.stream
                .set_read_timeout(Some(left.max(Duration::from_millis(1))))?;

            let mut chunk = [0u8; 512];
            match self.stream.read(&mut chunk) {
                Ok(0) if self.pending.is_empty() => return Err(ControlError::Closed),
                // Last line without a trailing newline
                Ok(0) => self.pending.push(b'\n'),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn write_frame(&mut self, frame: &str) -> ControlResult<()> {
        self.stream.write_all(frame.as_bytes())?;
        if !frame.ends_with('\n') {
            self.stream.write_all(b"\n")?;
        }
        self.stream.flush()?;
        Ok(())
    }

    pub fn send_command(&mut self, command: &ControlCommand) -> ControlResult<()> {
        self.write_frame(&command.to_line())
    }

    pub fn send_ready(&mut self, ready: &Ready) -> ControlResult<()> {
        self.write_frame(&ready.encode())
    }
}
