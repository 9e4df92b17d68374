/*!
 * Channel Operations
 * link, send and recv on named links
 */

use super::Runtime;
use crate::context::{Flow, Vic};
use crate::core::errors::{VicError, VicResult};
use crate::link::{ChannelKind, LinkEndpoint, LinkRole};
use dashmap::mapref::entry::Entry;
use parking_lot::MutexGuard;
use tracing::{debug, trace};

impl Runtime {
    /// Join two contexts with a named link. `a` connects, `b` binds.
    pub fn link(&self, a: &Vic, b: &Vic, name: &str) -> VicResult<()> {
        if a.id() == b.id() {
            return Err(VicError::InvalidLink(format!(
                "'{}' would link context {} to itself",
                name,
                a.id()
            )));
        }
        if name.is_empty() || name.contains('/') {
            return Err(VicError::InvalidLink(format!("bad link name '{}'", name)));
        }

        let kind = ChannelKind::for_backings(a.kind(), b.kind());
        let config = &self.inner.config;

        // The name is also the transport address, so it is reserved runtime-wide
        match self.inner.link_names.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                let (x, y) = *existing.get();
                return Err(VicError::InvalidLink(format!(
                    "'{}' already links contexts {} and {}",
                    name, x, y
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert((a.id(), b.id()));
            }
        }

        a.inner()
            .state()
            .lock()
            .links
            .push(LinkEndpoint::new(name, b.id(), kind, LinkRole::Connect, config));
        b.inner()
            .state()
            .lock()
            .links
            .push(LinkEndpoint::new(name, a.id(), kind, LinkRole::Bind, config));

        debug!(link = name, a = a.id(), b = b.id(), kind = %kind, "Link created");
        Ok(())
    }

    /// Send one message, retrying bounded attempts until it is delivered
    pub fn send(&self, flow: &Flow, name: &str, payload: &[u8]) -> VicResult<()> {
        let state = flow.vic().inner().state();
        loop {
            let mut guard = state.lock();
            let link = guard.link_mut(name)?;
            match link.send(payload, &self.inner.hub, &self.inner.config) {
                Ok(()) => {
                    trace!(vic = flow.id(), link = name, len = payload.len(), "Sent");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    trace!(vic = flow.id(), link = name, error = %e, "Send attempt retried");
                    MutexGuard::unlock_fair(guard);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn send_str(&self, flow: &Flow, name: &str, text: &str) -> VicResult<()> {
        self.send(flow, name, text.as_bytes())
    }

    /// Receive one message, retrying bounded attempts until one arrives
    pub fn recv(&self, flow: &Flow, name: &str) -> VicResult<Vec<u8>> {
        let state = flow.vic().inner().state();
        loop {
            let mut guard = state.lock();
            let link = guard.link_mut(name)?;
            match link.recv(&self.inner.hub, &self.inner.config) {
                Ok(payload) => {
                    trace!(vic = flow.id(), link = name, len = payload.len(), "Received");
                    return Ok(payload);
                }
                Err(e) if e.is_transient() => MutexGuard::unlock_fair(guard),
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn recv_string(&self, flow: &Flow, name: &str) -> VicResult<String> {
        let payload = self.recv(flow, name)?;
        String::from_utf8(payload).map_err(|e| VicError::Io(format!("non-UTF-8 payload: {}", e)))
    }
}
