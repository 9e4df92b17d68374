/*!
 * Context Traits
 * Operation table every backing implements
 */

use crate::core::errors::VicResult;
use crate::core::types::{BackingHandle, BackingKind, VicId, WaitStatus};
use std::time::Duration;

/// Per-backing operations, resolved on each call
pub trait BackingOps {
    fn kind(&self) -> BackingKind;

    fn handle(&self) -> BackingHandle;

    fn is_started(&self) -> bool;

    /// One bounded wait. `executing` reports whether the registry still sees
    /// the routine running in this process.
    fn wait_attempt(
        &mut self,
        id: VicId,
        timeout: Duration,
        poll: Duration,
        executing: &dyn Fn() -> bool,
    ) -> VicResult<WaitStatus>;

    /// Release OS resources; the routine must no longer need them
    fn teardown(&mut self);
}
