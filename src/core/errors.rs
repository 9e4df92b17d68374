/*!
 * Error Types
 * Centralized error handling with thiserror and miette diagnostics
 */

use super::limits::FATAL_EXIT_CODE;
use super::types::{OsPid, VicId};
use miette::Diagnostic;
use thiserror::Error;

// Re-export subsystem errors
pub use crate::link::types::LinkError;
pub use crate::memory::MemoryError;
pub use crate::pause::PauseError;
pub use crate::transform::control::ControlError;

/// Context lifecycle result
pub type VicResult<T> = Result<T, VicError>;

/// Unified runtime error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum VicError {
    #[error("Invalid backing kind flags: 0x{0:02x}")]
    #[diagnostic(
        code(vic::invalid_backing),
        help("Use 0x01 for a thread-backed or 0x02 for a process-backed context.")
    )]
    InvalidBacking(u32),

    #[error("Context {0} not found")]
    #[diagnostic(
        code(vic::not_found),
        help("The context may have been destroyed. Check the handle's validity.")
    )]
    NotFound(VicId),

    #[error("Context {0} still has an execution flow attached")]
    #[diagnostic(
        code(vic::flow_attached),
        help("Call unbind_flow before destroying the context.")
    )]
    FlowAttached(VicId),

    #[error("Context {0} is already bound to an execution flow")]
    #[diagnostic(code(vic::already_bound), help("A context owns at most one flow."))]
    AlreadyBound(VicId),

    #[error("Context {0} has already been started")]
    #[diagnostic(code(vic::already_started))]
    AlreadyStarted(VicId),

    #[error("Invalid link: {0}")]
    #[diagnostic(
        code(vic::invalid_link),
        help("Link names must be unique per context and join two distinct contexts.")
    )]
    InvalidLink(String),

    #[error("Failed to create OS resource: {0}")]
    #[diagnostic(
        code(vic::resource_creation),
        help("fork or thread creation failed. Check process and thread limits.")
    )]
    ResourceCreation(String),

    #[error("Routine of context {0} panicked")]
    #[diagnostic(code(vic::routine_panicked))]
    RoutinePanicked(VicId),

    #[error("Child process {pid} exited with code {code}")]
    #[diagnostic(code(vic::child_failed))]
    ChildFailed { pid: OsPid, code: i32 },

    #[error("Child process {pid} was killed by {signal}")]
    #[diagnostic(code(vic::child_signaled))]
    ChildSignaled { pid: OsPid, signal: String },

    #[error("Not supported: {0}")]
    #[diagnostic(
        code(vic::not_supported),
        help("This operation is not supported on this platform.")
    )]
    NotSupported(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(vic::io_error))]
    Io(String),

    #[error("Link error: {0}")]
    #[diagnostic(transparent)]
    Link(#[from] LinkError),

    #[error("Control channel error: {0}")]
    #[diagnostic(transparent)]
    Control(#[from] ControlError),

    #[error("Pause error: {0}")]
    #[diagnostic(transparent)]
    Pause(#[from] PauseError),

    #[error("Memory error: {0}")]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),
}

impl From<std::io::Error> for VicError {
    fn from(err: std::io::Error) -> Self {
        VicError::Io(err.to_string())
    }
}

impl From<nix::errno::Errno> for VicError {
    fn from(err: nix::errno::Errno) -> Self {
        VicError::Io(err.desc().to_string())
    }
}

/// Print a diagnostic for an unrecoverable error and terminate the process
pub fn fatal<E>(err: E) -> !
where
    E: Diagnostic + Send + Sync + 'static,
{
    tracing::error!(error = %err, "Fatal error, terminating process");
    eprintln!("{:?}", miette::Report::new(err));
    std::process::exit(FATAL_EXIT_CODE)
}
