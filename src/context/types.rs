/*!
 * Context Types
 * State guarded by a context's flow lock
 */

use super::backing::Backing;
use super::traits::BackingOps;
use crate::core::config::RuntimeConfig;
use crate::core::types::{BackingKind, VicId};
use crate::link::{InprocHub, LinkEndpoint, LinkError, LinkInfo, LinkResult};

/// Routine run by an execution flow
pub type Routine = std::sync::Arc<dyn Fn(&super::Flow) + Send + Sync + 'static>;

/// Invoked with the context when its flow is unbound
pub type FinishedCallback = Box<dyn FnOnce(&super::Vic) + Send + Sync + 'static>;

/// Backing and links of one context
///
/// Everything here is only touched with the context's flow lock held.
pub struct VicState {
    pub(crate) backing: Backing,
    pub(crate) links: Vec<LinkEndpoint>,
}

impl VicState {
    pub fn new(kind: BackingKind) -> Self {
        Self {
            backing: Backing::new(kind),
            links: Vec::new(),
        }
    }

    pub fn kind(&self) -> BackingKind {
        self.backing.kind()
    }

    pub fn has_link(&self, name: &str) -> bool {
        self.links.iter().any(|l| l.name() == name)
    }

    pub fn link_infos(&self) -> Vec<LinkInfo> {
        self.links.iter().map(LinkEndpoint::info).collect()
    }

    pub(crate) fn link_mut(&mut self, name: &str) -> LinkResult<&mut LinkEndpoint> {
        self.links
            .iter_mut()
            .find(|l| l.name() == name)
            .ok_or_else(|| LinkError::NoSuchChannel(name.to_string()))
    }

    /// Links whose other end is `peer`
    pub(crate) fn links_to(&mut self, peer: VicId) -> impl Iterator<Item = &mut LinkEndpoint> {
        self.links.iter_mut().filter(move |l| l.peer() == peer)
    }

    pub(crate) fn connect_links(
        &mut self,
        hub: &InprocHub,
        config: &RuntimeConfig,
    ) -> LinkResult<()> {
        for link in self.links.iter_mut() {
            link.connect(hub, config)?;
        }
        Ok(())
    }

    /// Disconnect every link, keeping frames already delivered here
    pub(crate) fn suspend_links(&mut self, hub: &InprocHub) {
        for link in self.links.iter_mut() {
            link.suspend(hub);
        }
    }

    /// Drop inherited sockets without closing anything the parent owns
    pub(crate) fn abandon_links(&mut self) {
        for link in self.links.iter_mut() {
            link.abandon();
        }
    }
}
