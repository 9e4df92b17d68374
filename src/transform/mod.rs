/*!
 * Transformation Module
 *
 * Moves running contexts between thread and process backings while an
 * external controller performs the OS-level action (checkpoint/restore of a
 * thread into its own process, or the reverse).
 */

pub mod control;
pub mod engine;
pub(crate) mod pass;
pub(crate) mod placeholder;

pub use control::{
    ControlCommand, ControlConnection, ControlError, ControlListener, ControlResult, Direction,
    Ready, ReadyEntry,
};
pub use engine::{EngineShared, TransformEngine};
