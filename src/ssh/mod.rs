//! Remote execution: structured commands, pooled SSH connections, retry and
//! privileged-command policy.

mod command;
mod connection;
mod manager;
mod pool;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use command::{quote, Command};
pub use connection::{CommandOutput, Connection, Connector};
pub use manager::{ChannelManager, RemoteHost};
pub use pool::{ChannelPool, Insert, PoolKey, SharedConnection};
pub use session::{SshConnector, SshSession};
