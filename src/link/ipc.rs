/*!
 * Local IPC Transport
 *
 * Unix domain stream sockets carrying length-prefixed frames. The bind side
 * owns the socket file and accepts lazily; the connect side connects lazily.
 * Both sides drop a broken stream and pick up a fresh one on the next attempt.
 */

use super::types::{LinkError, LinkResult, LinkRole};
use crate::core::limits::{IPC_SCHEME, MAX_FRAME_LEN};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const LEN_PREFIX: usize = 4;

/// Filesystem path behind an `ipc://` address
pub fn socket_path(address: &str) -> LinkResult<PathBuf> {
    address
        .strip_prefix(IPC_SCHEME)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| LinkError::InvalidAddress(address.to_string()))
}

/// One side of a local-IPC link
pub struct IpcSocket {
    role: LinkRole,
    path: PathBuf,
    listener: Option<UnixListener>,
    stream: Option<UnixStream>,
    inbox: Vec<u8>,
    poll: Duration,
}

impl IpcSocket {
    /// Bind the listening side, replacing a stale socket file
    pub fn bind(address: &str, poll: Duration) -> LinkResult<Self> {
        let path = socket_path(address)?;
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }

        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        debug!(path = %path.display(), "IPC link bound");

        Ok(Self {
            role: LinkRole::Bind,
            path,
            listener: Some(listener),
            stream: None,
            inbox: Vec::new(),
            poll,
        })
    }

    /// Prepare the connecting side; the stream is opened on first use
    pub fn connect(address: &str, poll: Duration) -> LinkResult<Self> {
        let path = socket_path(address)?;
        let mut socket = Self {
            role: LinkRole::Connect,
            path,
            listener: None,
            stream: None,
            inbox: Vec::new(),
            poll,
        };
        let _ = socket.try_open_stream();
        Ok(socket)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn send(&mut self, payload: &[u8], timeout: Duration) -> LinkResult<()> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(LinkError::FrameTooLarge {
                len: payload.len(),
                max: MAX_FRAME_LEN,
            });
        }

        let deadline = Instant::now() + timeout;
        self.ensure_stream(deadline)?;

        let Some(stream) = self.stream.as_mut() else {
            return Err(LinkError::Timeout);
        };
        stream.set_write_timeout(Some(remaining(deadline)))?;

        let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);

        // A partial frame cannot be resumed, so any failure drops the stream
        if let Err(e) = stream.write_all(&frame) {
            debug!(path = %self.path.display(), error = %e, "IPC send failed, dropping stream");
            self.drop_stream();
            return Err(LinkError::Reset(self.path.display().to_string()));
        }
        Ok(())
    }

    pub fn recv(&mut self, timeout: Duration) -> LinkResult<Vec<u8>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(frame);
            }

            self.ensure_stream(deadline)?;
            let Some(stream) = self.stream.as_mut() else {
                return Err(LinkError::Timeout);
            };
            stream.set_read_timeout(Some(remaining(deadline)))?;

            let mut chunk = [0u8; 8192];
            match stream.read(&mut chunk) {
                Ok(0) => {
                    trace!(path = %self.path.display(), "IPC peer closed stream");
                    self.drop_stream();
                    return Err(LinkError::Reset(self.path.display().to_string()));
                }
                Ok(n) => self.inbox.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(&e) => return Err(LinkError::Timeout),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(path = %self.path.display(), error = %e, "IPC recv failed, dropping stream");
                    self.drop_stream();
                    return Err(LinkError::Reset(self.path.display().to_string()));
                }
            }
        }
    }

    /// Every complete frame already delivered to this side, without blocking
    pub fn drain_pending(&mut self) -> Vec<Vec<u8>> {
        if self.stream.is_none() && self.role == LinkRole::Bind {
            let _ = self.try_open_stream();
        }
        if let Some(stream) = self.stream.as_mut() {
            if stream.set_nonblocking(true).is_ok() {
                let mut chunk = [0u8; 8192];
                loop {
                    match stream.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => self.inbox.extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == ErrorKind::Interrupted => {}
                        Err(_) => break,
                    }
                }
                let _ = stream.set_nonblocking(false);
            }
        }

        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.take_frame() {
            frames.push(frame);
        }
        if !self.inbox.is_empty() {
            debug!(path = %self.path.display(), bytes = self.inbox.len(), "Partial frame dropped at drain");
        }
        frames
    }

    /// Close the socket; the bind side also removes its socket file
    pub fn close(mut self) {
        self.drop_stream();
        if self.listener.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove socket file");
                }
            }
        }
    }

    /// Close the socket without touching the filesystem
    pub fn abandon(mut self) {
        self.drop_stream();
        self.listener = None;
    }

    fn take_frame(&mut self) -> LinkResult<Option<Vec<u8>>> {
        if self.inbox.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&self.inbox[..LEN_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > MAX_FRAME_LEN {
            self.drop_stream();
            return Err(LinkError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        if self.inbox.len() < LEN_PREFIX + len {
            return Ok(None);
        }

        let frame = self.inbox[LEN_PREFIX..LEN_PREFIX + len].to_vec();
        self.inbox.drain(..LEN_PREFIX + len);
        Ok(Some(frame))
    }

    /// Get a usable stream before `deadline`, or leave `stream` empty
    fn ensure_stream(&mut self, deadline: Instant) -> LinkResult<()> {
        while self.stream.is_none() {
            if self.try_open_stream()? {
                break;
            }
            if Instant::now() >= deadline {
                return Err(LinkError::Timeout);
            }
            std::thread::sleep(self.poll.min(remaining(deadline)));
        }
        Ok(())
    }

    fn try_open_stream(&mut self) -> LinkResult<bool> {
        match self.role {
            LinkRole::Bind => {
                let Some(listener) = self.listener.as_ref() else {
                    return Err(LinkError::Io("listener closed".to_string()));
                };
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false)?;
                        trace!(path = %self.path.display(), "IPC peer accepted");
                        self.stream = Some(stream);
                        Ok(true)
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
                    Err(e) if e.kind() == ErrorKind::Interrupted => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
            LinkRole::Connect => match UnixStream::connect(&self.path) {
                Ok(stream) => {
                    trace!(path = %self.path.display(), "IPC peer connected");
                    self.stream = Some(stream);
                    Ok(true)
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::Interrupted
                    ) =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    fn drop_stream(&mut self) {
        self.stream = None;
        self.inbox.clear();
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .max(Duration::from_millis(1))
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
