/*!
 * Link Endpoint
 * One side of a named link, owned by its context
 */

use super::inproc::{InprocHub, InprocSocket};
use super::ipc::IpcSocket;
use super::types::{ChannelKind, LinkInfo, LinkResult, LinkRole};
use crate::core::config::RuntimeConfig;
use crate::core::types::VicId;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Live transport behind an endpoint
pub enum Socket {
    InProcess(InprocSocket),
    LocalIpc(IpcSocket),
}

impl Socket {
    fn send(&mut self, payload: &[u8], timeout: Duration) -> LinkResult<()> {
        match self {
            Socket::InProcess(s) => s.send(payload),
            Socket::LocalIpc(s) => s.send(payload, timeout),
        }
    }

    fn recv(&mut self, timeout: Duration) -> LinkResult<Vec<u8>> {
        match self {
            Socket::InProcess(s) => s.recv(timeout),
            Socket::LocalIpc(s) => s.recv(timeout),
        }
    }

    fn drain_pending(&mut self, hub: &InprocHub, address: &str, role: LinkRole) -> Vec<Vec<u8>> {
        match self {
            Socket::InProcess(_) => hub.drain(address, role),
            Socket::LocalIpc(s) => s.drain_pending(),
        }
    }

    fn close(self) {
        match self {
            Socket::InProcess(_) => {}
            Socket::LocalIpc(s) => s.close(),
        }
    }

    fn abandon(self) {
        match self {
            Socket::InProcess(_) => {}
            Socket::LocalIpc(s) => s.abandon(),
        }
    }
}

/// One side of a link: name, peer, transport and the live socket if any
pub struct LinkEndpoint {
    name: String,
    peer: VicId,
    kind: ChannelKind,
    role: LinkRole,
    prefix: String,
    address: String,
    socket: Option<Socket>,
    /// Frames received before a transport switch, delivered first
    backlog: VecDeque<Vec<u8>>,
}

impl LinkEndpoint {
    pub fn new(
        name: &str,
        peer: VicId,
        kind: ChannelKind,
        role: LinkRole,
        config: &RuntimeConfig,
    ) -> Self {
        let prefix = prefix_for(kind, config);
        Self {
            name: name.to_string(),
            peer,
            kind,
            role,
            address: format!("{}{}", prefix, name),
            prefix,
            socket: None,
            backlog: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer(&self) -> VicId {
        self.peer
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn info(&self) -> LinkInfo {
        LinkInfo {
            name: self.name.clone(),
            peer: self.peer,
            kind: self.kind,
            role: self.role,
            address: self.address.clone(),
            connected: self.socket.is_some(),
        }
    }

    /// Open the socket for the current kind if there is none
    pub fn connect(&mut self, hub: &InprocHub, config: &RuntimeConfig) -> LinkResult<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        let socket = match (self.kind, self.role) {
            (ChannelKind::InProcess, role) => Socket::InProcess(hub.open(&self.address, role)),
            (ChannelKind::LocalIpc, LinkRole::Bind) => {
                Socket::LocalIpc(IpcSocket::bind(&self.address, config.poll_interval())?)
            }
            (ChannelKind::LocalIpc, LinkRole::Connect) => {
                Socket::LocalIpc(IpcSocket::connect(&self.address, config.poll_interval())?)
            }
        };

        debug!(link = %self.name, address = %self.address, role = ?self.role, "Link connected");
        self.socket = Some(socket);
        Ok(())
    }

    /// Close the socket, releasing any filesystem name it owns
    pub fn disconnect(&mut self) {
        if let Some(socket) = self.socket.take() {
            debug!(link = %self.name, address = %self.address, "Link disconnected");
            socket.close();
        }
    }

    /// Move every frame already delivered to this side into the backlog,
    /// then disconnect
    pub fn suspend(&mut self, hub: &InprocHub) {
        let queued = match self.socket.as_mut() {
            Some(socket) => socket.drain_pending(hub, &self.address, self.role),
            None if self.kind == ChannelKind::InProcess => hub.drain(&self.address, self.role),
            None => Vec::new(),
        };
        if !queued.is_empty() {
            debug!(link = %self.name, frames = queued.len(), "Queued frames kept across suspend");
        }
        self.backlog.extend(queued);
        self.disconnect();
    }

    /// Drop an inherited socket without side effects on the peer's files
    pub fn abandon(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.abandon();
        }
    }

    /// Switch transport, keeping the name. The socket must be reconnected.
    pub fn rebuild(&mut self, kind: ChannelKind, config: &RuntimeConfig) {
        self.disconnect();
        self.kind = kind;
        self.prefix = prefix_for(kind, config);
        self.address = format!("{}{}", self.prefix, self.name);
    }

    /// One bounded send attempt, connecting lazily
    pub fn send(
        &mut self,
        payload: &[u8],
        hub: &InprocHub,
        config: &RuntimeConfig,
    ) -> LinkResult<()> {
        self.connect(hub, config)?;
        match self.socket.as_mut() {
            Some(socket) => socket.send(payload, config.attempt_timeout()),
            None => Err(super::types::LinkError::Timeout),
        }
    }

    /// One bounded receive attempt, connecting lazily
    pub fn recv(&mut self, hub: &InprocHub, config: &RuntimeConfig) -> LinkResult<Vec<u8>> {
        if let Some(frame) = self.backlog.pop_front() {
            return Ok(frame);
        }
        self.connect(hub, config)?;
        match self.socket.as_mut() {
            Some(socket) => socket.recv(config.attempt_timeout()),
            None => Err(super::types::LinkError::Timeout),
        }
    }
}

impl Drop for LinkEndpoint {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn prefix_for(kind: ChannelKind, config: &RuntimeConfig) -> String {
    match kind {
        ChannelKind::InProcess => config.inproc_prefix(),
        ChannelKind::LocalIpc => config.ipc_prefix(),
    }
}
