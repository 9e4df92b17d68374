/*!
 * Transformation Pass
 *
 * One prepare -> start span. Every affected context and every peer sharing a
 * link with one stays locked for the whole span, so no sender or receiver
 * ever sees a link between its old and new transport.
 */

use super::control::{Direction, Ready, ReadyEntry};
use super::placeholder::Placeholder;
use crate::context::{Backing, ProcessBacking, ThreadBacking, VicInner, VicState};
use crate::core::errors::VicResult;
use crate::core::types::{BackingKind, OsPid, OsTid, VicId};
use crate::link::ChannelKind;
use crate::platform;
use crate::runtime::Runtime;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::RawMutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type StateGuard = ArcMutexGuard<RawMutex, VicState>;

struct Locked {
    id: VicId,
    guard: StateGuard,
}

impl Locked {
    fn acquire(vic: &Arc<VicInner>) -> Self {
        Self {
            id: vic.id(),
            guard: vic.state().lock_arc(),
        }
    }
}

enum Watch {
    /// OS thread count and pid observed at prepare
    Split { thread_count: usize, pid: OsPid },
    /// Per affected context, in `affected` order: a parked placeholder, or
    /// `None` when the split thread still runs the routine here
    Merge { placeholders: Vec<Option<Placeholder>> },
}

pub(crate) struct Pass {
    direction: Direction,
    affected: Vec<Locked>,
    peers: Vec<Locked>,
    ready: Ready,
    watch: Watch,
}

/// Direction chosen when the controller leaves it open
pub(crate) fn auto_direction(runtime: &Runtime) -> Direction {
    let any_thread_running = runtime
        .registry()
        .snapshot()
        .iter()
        .any(|(_, entry)| entry.executing && entry.thread.is_some());
    if any_thread_running {
        Direction::Split
    } else {
        Direction::Merge
    }
}

impl Pass {
    /// Lock and disconnect everything the pass touches, and build the reply
    pub(crate) fn prepare(
        runtime: &Runtime,
        requested: Option<Direction>,
        stack_size: Option<usize>,
    ) -> VicResult<Self> {
        let direction = requested.unwrap_or_else(|| auto_direction(runtime));
        let snapshot = runtime.registry().snapshot();

        let mut affected = Vec::new();
        let mut tids = Vec::new();
        for (vic, entry) in &snapshot {
            if direction == Direction::Split && !entry.executing {
                continue;
            }
            let mut locked = Locked::acquire(vic);
            let selected = match (direction, &mut locked.guard.backing) {
                (Direction::Split, Backing::Thread(_)) => {
                    runtime.registry().is_executing(locked.id)
                }
                (Direction::Merge, Backing::Process(process)) => {
                    process.has_local() || process.is_running()
                }
                _ => false,
            };
            if selected {
                let tid = runtime.registry().entry(locked.id).map_or(entry.tid, |e| e.tid);
                tids.push(tid);
                affected.push(locked);
            }
        }

        let affected_ids: BTreeSet<VicId> = affected.iter().map(|l| l.id).collect();
        let peer_ids: BTreeSet<VicId> = affected
            .iter()
            .flat_map(|l| l.guard.links.iter().map(|link| link.peer()))
            .filter(|id| !affected_ids.contains(id))
            .collect();
        let peers: Vec<Locked> = snapshot
            .iter()
            .filter(|(vic, _)| peer_ids.contains(&vic.id()))
            .map(|(vic, _)| Locked::acquire(vic))
            .collect();

        let watch = match direction {
            Direction::Split => Watch::Split {
                thread_count: platform::thread_count()?,
                pid: platform::current_pid(),
            },
            Direction::Merge => Watch::Merge {
                placeholders: Vec::with_capacity(affected.len()),
            },
        };

        let mut pass = Self {
            direction,
            affected,
            peers,
            ready: Ready {
                direction,
                entries: Vec::new(),
            },
            watch,
        };

        pass.suspend_links(runtime, &affected_ids);

        match pass.build_ready(runtime, tids, stack_size) {
            Ok(ready) => pass.ready = ready,
            Err(e) => {
                pass.rollback(runtime);
                return Err(e);
            }
        }

        info!(
            direction = %direction,
            affected = pass.affected.len(),
            peers = pass.peers.len(),
            "Transformation prepared"
        );
        Ok(pass)
    }

    /// Disconnect every link touching an affected context. Frames already
    /// delivered to a side stay in that endpoint's backlog.
    fn suspend_links(&mut self, runtime: &Runtime, affected_ids: &BTreeSet<VicId>) {
        let hub = runtime.hub();
        for locked in self.affected.iter_mut() {
            locked.guard.suspend_links(hub);
        }
        for locked in self.peers.iter_mut() {
            for link in locked.guard.links.iter_mut() {
                if affected_ids.contains(&link.peer()) {
                    link.suspend(hub);
                }
            }
        }
    }

    fn build_ready(
        &mut self,
        runtime: &Runtime,
        tids: Vec<OsTid>,
        stack_size: Option<usize>,
    ) -> VicResult<Ready> {
        match &mut self.watch {
            Watch::Split { .. } => Ok(Ready {
                direction: Direction::Split,
                entries: tids
                    .into_iter()
                    .map(|tid| ReadyEntry { pid: None, tid })
                    .collect(),
            }),
            Watch::Merge { placeholders } => {
                let config = runtime.config();
                let mut entries = Vec::with_capacity(self.affected.len());
                for locked in &self.affected {
                    let Backing::Process(process) = &locked.guard.backing else {
                        placeholders.push(None);
                        continue;
                    };
                    let pid = process.pid().unwrap_or_default();
                    if let Some(tid) = process.local_tid() {
                        entries.push(ReadyEntry { pid: Some(pid), tid });
                        placeholders.push(None);
                        continue;
                    }
                    let placeholder = Placeholder::spawn(
                        pid,
                        runtime.pause_table(),
                        stack_size,
                        config.attempt_timeout() * 8,
                        config.poll_interval(),
                    )?;
                    entries.push(ReadyEntry {
                        pid: Some(pid),
                        tid: placeholder.tid(),
                    });
                    placeholders.push(Some(placeholder));
                }
                Ok(Ready {
                    direction: Direction::Merge,
                    entries,
                })
            }
        }
    }

    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn affected_count(&self) -> usize {
        self.affected.len()
    }

    pub(crate) fn ready(&self) -> &Ready {
        &self.ready
    }

    /// Whether the controller's OS action is visible yet
    pub(crate) fn external_action_done(&mut self) -> VicResult<bool> {
        if self.affected.is_empty() {
            return Ok(true);
        }
        match &self.watch {
            Watch::Split { thread_count, pid } => Ok(platform::current_pid() != *pid
                || platform::thread_count()? != *thread_count),
            Watch::Merge { .. } => Ok(self.affected.iter_mut().all(|locked| {
                match &mut locked.guard.backing {
                    Backing::Process(process) => {
                        !process.has_external_pid() || !process.is_running()
                    }
                    Backing::Thread(_) => true,
                }
            })),
        }
    }

    /// Block until the OS action happened; false if `stop` was raised first
    pub(crate) fn await_external(&mut self, runtime: &Runtime, stop: &AtomicBool) -> VicResult<bool> {
        let poll = runtime.config().poll_interval();
        loop {
            if stop.load(Ordering::Acquire) {
                return Ok(false);
            }
            if self.external_action_done()? {
                return Ok(true);
            }
            std::thread::sleep(poll);
        }
    }

    /// Swap backings, rebuild links, rewrite the registry and unlock
    pub(crate) fn commit(mut self, runtime: &Runtime, pids: &[OsPid]) {
        let registry = runtime.registry();
        let mut resume = Vec::new();

        match std::mem::replace(&mut self.watch, Watch::Merge { placeholders: Vec::new() }) {
            Watch::Split { .. } => {
                for (i, locked) in self.affected.iter_mut().enumerate() {
                    let tid = self.ready.entries.get(i).map(|e| e.tid).unwrap_or_default();
                    let pid = pids.get(i).copied().unwrap_or(tid);
                    let mut process = ProcessBacking::adopt(pid);
                    let previous = std::mem::replace(
                        &mut locked.guard.backing,
                        Backing::Thread(ThreadBacking::new()),
                    );
                    if let Backing::Thread(thread) = previous {
                        process = process.with_local(thread, tid);
                    }
                    locked.guard.backing = Backing::Process(process);
                    registry.rewrite(locked.id, pid, None);
                    debug!(vic = locked.id, pid, tid, "Context now process-backed");
                }
            }
            Watch::Merge { placeholders } => {
                for (locked, placeholder) in self.affected.iter_mut().zip(placeholders) {
                    let local = match &mut locked.guard.backing {
                        Backing::Process(process) => process.take_local(),
                        Backing::Thread(_) => None,
                    };
                    match (local, placeholder) {
                        (Some(local), _) => {
                            let raw = local.thread.raw();
                            locked.guard.backing = Backing::Thread(local.thread);
                            registry.rewrite(locked.id, local.tid, raw);
                            debug!(vic = locked.id, tid = local.tid, "Split thread re-adopted");
                        }
                        // The routine ended with the child; the placeholder
                        // finishes as soon as it is resumed
                        (None, Some(placeholder)) => {
                            let tid = placeholder.tid();
                            let (handle, completion, raw) = placeholder.into_parts();
                            locked.guard.backing =
                                Backing::Thread(ThreadBacking::adopt(handle, completion));
                            registry.rewrite(locked.id, tid, Some(raw));
                            resume.push(raw);
                            debug!(vic = locked.id, tid, "Context now thread-backed");
                        }
                        (None, None) => {}
                    }
                }
            }
        }

        self.rebuild_links(runtime);
        self.reconnect(runtime);
        let count = self.affected.len();
        let direction = self.direction;
        drop(self);

        for raw in resume {
            if let Err(e) = runtime.pause_table().resume(raw) {
                warn!(error = %e, "Placeholder resume failed");
            }
        }
        info!(direction = %direction, affected = count, "Transformation committed");
    }

    /// Reconnect with unchanged kinds, release placeholders and unlock
    pub(crate) fn rollback(mut self, runtime: &Runtime) {
        if let Watch::Merge { placeholders } =
            std::mem::replace(&mut self.watch, Watch::Merge { placeholders: Vec::new() })
        {
            for placeholder in placeholders.into_iter().flatten() {
                placeholder.cancel(runtime.pause_table());
            }
        }
        self.reconnect(runtime);
        warn!(direction = %self.direction, "Transformation rolled back");
    }

    fn rebuild_links(&mut self, runtime: &Runtime) {
        let kinds: HashMap<VicId, BackingKind> = self
            .affected
            .iter()
            .chain(self.peers.iter())
            .map(|l| (l.id, l.guard.kind()))
            .collect();
        let affected_ids: BTreeSet<VicId> = self.affected.iter().map(|l| l.id).collect();
        let config = runtime.config();
        let hub = runtime.hub();

        for locked in self.affected.iter_mut().chain(self.peers.iter_mut()) {
            let own = locked.guard.kind();
            let is_affected = affected_ids.contains(&locked.id);
            for link in locked.guard.links.iter_mut() {
                if !is_affected && !affected_ids.contains(&link.peer()) {
                    continue;
                }
                let peer_kind = kinds.get(&link.peer()).copied().unwrap_or(own);
                let kind = ChannelKind::for_backings(own, peer_kind);
                // Both sides were drained at suspend
                if link.kind() == ChannelKind::InProcess && kind != ChannelKind::InProcess {
                    hub.remove(link.address());
                }
                link.rebuild(kind, config);
            }
        }
    }

    fn reconnect(&mut self, runtime: &Runtime) {
        let config = runtime.config();
        let hub = runtime.hub();
        for locked in self.affected.iter_mut().chain(self.peers.iter_mut()) {
            if !executes_here(&locked.guard) {
                continue;
            }
            if let Err(e) = locked.guard.connect_links(hub, config) {
                warn!(vic = locked.id, error = %e, "Link reconnect failed; will retry on use");
            }
        }
    }
}

/// Whether this process owns the context's sockets
fn executes_here(state: &VicState) -> bool {
    match &state.backing {
        Backing::Thread(_) => true,
        Backing::Process(process) => process.is_adopted(),
    }
}

impl std::fmt::Debug for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pass")
            .field("direction", &self.direction)
            .field("affected", &self.affected.iter().map(|l| l.id).collect::<Vec<_>>())
            .field("peers", &self.peers.iter().map(|l| l.id).collect::<Vec<_>>())
            .finish()
    }
}
