/*!
 * Link Module
 * Named bidirectional channels between contexts
 *
 * A link is a pair of endpoints sharing one address. The transport is chosen
 * from both ends' backings: in-process channels when both are threads of the
 * same process, Unix domain sockets otherwise.
 */

pub mod endpoint;
pub mod inproc;
pub mod ipc;
pub mod types;

pub use endpoint::{LinkEndpoint, Socket};
pub use inproc::{InprocHub, InprocSocket};
pub use ipc::IpcSocket;
pub use types::{ChannelKind, LinkError, LinkInfo, LinkResult, LinkRole};
