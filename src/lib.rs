/*!
 * VIC Runtime Library
 *
 * Virtual execution contexts whose routines run on a thread or a forked
 * process, talk over named links, and can be moved between the two backings
 * while running.
 */

#[cfg(not(unix))]
compile_error!("vic-runtime requires a Unix platform");

pub mod context;
pub mod controller;
pub mod core;
pub mod link;
pub mod memory;
pub mod monitoring;
pub mod pause;
pub mod platform;
pub mod registry;
pub mod runtime;
pub mod transform;

// Re-exports
pub use context::{FinishedCallback, Flow, FlowGuard, Vic};
pub use controller::ControlClient;
pub use crate::core::{
    BackingHandle, BackingKind, OsPid, OsTid, RawThread, RuntimeConfig, VicError, VicId,
    VicResult,
};
pub use link::{ChannelKind, LinkError, LinkInfo, LinkRole};
pub use memory::{Handle, HandleHeap, MemoryError};
pub use monitoring::init_tracing;
pub use pause::{Enrollment, PauseError, PauseTable};
pub use registry::{Registry, RegistryEntry};
pub use runtime::Runtime;
pub use transform::{ControlError, Direction, Ready, ReadyEntry};
