use std::time::Duration;

use crate::config::SshSettings;
use crate::error::Result;
use crate::model::{AuthMethod, TargetHost};

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An authenticated exec + file-transfer session to one host.
///
/// Methods block; the channel manager calls them from blocking tasks and
/// holds the connection's lock for the duration of each call.
pub trait Connection: Send {
    /// Cheap liveness probe used before a pooled connection is reused.
    fn is_alive(&mut self) -> bool;

    fn exec(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    fn upload(&mut self, remote_path: &str, contents: &[u8], mode: i32) -> Result<()>;

    fn download(&mut self, remote_path: &str) -> Result<Vec<u8>>;

    fn exists(&mut self, remote_path: &str) -> Result<bool>;

    fn mkdir_all(&mut self, remote_path: &str) -> Result<()>;

    fn close(&mut self);
}

/// Opens connections. Errors must be `Error::Connectivity` for anything the
/// manager may retry and `Error::Configuration` for anything it must not.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        host: &TargetHost,
        auth: AuthMethod<'_>,
        settings: &SshSettings,
    ) -> Result<Box<dyn Connection>>;
}
