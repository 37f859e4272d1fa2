use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::command::Command;
use super::connection::{CommandOutput, Connection, Connector};
use super::pool::{ChannelPool, Insert, PoolKey, SharedConnection};
use crate::config::{PrivilegedSettings, SshSettings};
use crate::error::{Error, Result};
use crate::model::{Credential, TargetHost};

/// A host together with the credential new connections must use.
#[derive(Debug, Clone)]
pub struct RemoteHost {
    pub host: TargetHost,
    pub credential: Credential,
}

impl RemoteHost {
    /// Pair a host with its active credential.
    pub fn from_host(host: &TargetHost) -> Result<Self> {
        let credential = host.active_credential().cloned().ok_or_else(|| {
            Error::Configuration(format!("host '{}' has no active credential", host.id))
        })?;
        Ok(Self {
            host: host.clone(),
            credential,
        })
    }

    pub fn label(&self) -> String {
        format!("{}@{}", self.host.user, self.host.address())
    }

    fn key(&self) -> PoolKey {
        PoolKey::new(&self.host.id, &self.credential.id)
    }
}

/// Owns every remote connection: pooling, retry, privileged-command policy
/// and file transfer. Safe to share across concurrent per-site workers.
pub struct ChannelManager {
    settings: SshSettings,
    privileged: PrivilegedSettings,
    connector: Arc<dyn Connector>,
    pool: Mutex<ChannelPool>,
}

impl ChannelManager {
    pub fn new(
        settings: SshSettings,
        privileged: PrivilegedSettings,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let pool = ChannelPool::new(settings.pool_capacity);
        Self {
            settings,
            privileged,
            connector,
            pool: Mutex::new(pool),
        }
    }

    fn pool(&self) -> MutexGuard<'_, ChannelPool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pooled(&self) -> usize {
        self.pool().len()
    }

    /// Return a live pooled connection for `target`, reconnecting if the
    /// pooled one has gone away.
    pub async fn open_or_reuse(&self, target: &RemoteHost) -> Result<SharedConnection> {
        let key = target.key();

        let pooled = self.pool().get(&key);
        if let Some(connection) = pooled {
            let alive = with_connection(Arc::clone(&connection), |c| Ok(c.is_alive())).await?;
            if alive {
                self.pool().mark_validated(&key);
                return Ok(connection);
            }

            warn!("Evicting dead connection to {}", target.label());
            let removed = self.pool().remove(&key);
            if let Some(dead) = removed {
                close_connection(dead).await;
            }
        }

        let connection: SharedConnection =
            Arc::new(Mutex::new(self.connect_with_retry(target).await?));

        let outcome = self.pool().insert(key, Arc::clone(&connection));
        match outcome {
            Insert::Inserted { evicted } => {
                if let Some((evicted_key, evicted)) = evicted {
                    debug!(
                        "Pool full, evicting {}/{}",
                        evicted_key.host_id, evicted_key.credential_id
                    );
                    close_connection(evicted).await;
                }
                Ok(connection)
            }
            Insert::Existing(existing) => {
                close_connection(connection).await;
                Ok(existing)
            }
        }
    }

    /// Run `f` on the pooled connection for `target`. A connection that
    /// failed mid-operation or timed out is dropped from the pool, since a
    /// silently broken session can still answer keepalives.
    async fn on_channel<T, F>(&self, target: &RemoteHost, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Connection) -> Result<T> + Send + 'static,
    {
        let connection = self.open_or_reuse(target).await?;
        let result = with_connection(Arc::clone(&connection), f).await;

        if let Err(Error::Connectivity { .. } | Error::Timeout { .. }) = &result {
            let removed = self.pool().remove_if_same(&target.key(), &connection);
            if let Some(broken) = removed {
                warn!("Evicting connection to {} after a failed operation", target.label());
                close_connection(broken).await;
            }
        }
        result
    }

    async fn connect_with_retry(&self, target: &RemoteHost) -> Result<Box<dyn Connection>> {
        // Resolve auth up front: a bad credential kind is never retried.
        target.credential.auth_method()?;

        let attempts = self.settings.connect_attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            debug!(
                "Connecting to {} (attempt {}/{})",
                target.label(),
                attempt,
                attempts
            );

            let connector = Arc::clone(&self.connector);
            let settings = self.settings.clone();
            let remote = target.clone();
            let result = tokio::task::spawn_blocking(move || {
                let auth = remote.credential.auth_method()?;
                connector.connect(&remote.host, auth, &settings)
            })
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

            match result {
                Ok(connection) => {
                    info!("Connected to {}", target.label());
                    return Ok(connection);
                }
                Err(Error::Connectivity { reason, .. }) => {
                    warn!(
                        "Connection to {} failed (attempt {}/{}): {}",
                        target.label(),
                        attempt,
                        attempts,
                        reason
                    );
                    last_reason = reason;
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_delay()).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }

        Err(Error::Connectivity {
            host: target.label(),
            attempts,
            reason: last_reason,
        })
    }

    /// Run a command and return its output whatever the exit code.
    pub async fn execute(&self, target: &RemoteHost, command: &Command) -> Result<CommandOutput> {
        if command.get_run_as().is_some() {
            return Err(Error::Configuration(format!(
                "'{}' switches user; run it through execute_privileged",
                command.program()
            )));
        }
        self.exec_line(target, command).await
    }

    async fn exec_line(&self, target: &RemoteHost, command: &Command) -> Result<CommandOutput> {
        let line = command.to_shell();
        let timeout = command
            .get_timeout()
            .unwrap_or_else(|| self.settings.command_timeout());

        debug!("[{}] exec: {}", target.label(), command);
        self.on_channel(target, move |c| c.exec(&line, timeout))
            .await
            .map_err(|e| match e {
                Error::Timeout { host, timeout, .. } => Error::Timeout {
                    host,
                    command: command.to_string(),
                    timeout,
                },
                other => other,
            })
    }

    /// Run a command and fail with `Error::RemoteCommand` on a non-zero exit.
    pub async fn run(&self, target: &RemoteHost, command: &Command) -> Result<String> {
        let output = self.execute(target, command).await?;
        check(target, command, output)
    }

    /// Run a command, returning whether it exited 0.
    pub async fn run_ok(&self, target: &RemoteHost, command: &Command) -> Result<bool> {
        Ok(self.execute(target, command).await?.success())
    }

    /// Run an allow-listed command, through `sudo -n` when configured.
    pub async fn execute_privileged(
        &self,
        target: &RemoteHost,
        command: &Command,
    ) -> Result<CommandOutput> {
        let command = self.privileged_command(command)?;
        self.exec_line(target, &command).await
    }

    pub async fn run_privileged(&self, target: &RemoteHost, command: &Command) -> Result<String> {
        let command = self.privileged_command(command)?;
        let output = self.exec_line(target, &command).await?;
        check(target, &command, output)
    }

    fn privileged_command(&self, command: &Command) -> Result<Command> {
        let name = command.basename();
        if !self
            .privileged
            .allowed_commands
            .iter()
            .any(|allowed| allowed == name)
        {
            return Err(Error::Configuration(format!(
                "privileged command '{}' is not in the allow-list",
                name
            )));
        }

        // An allowed name is not enough for a path: /tmp/x/nginx is not nginx.
        let program = command.program();
        if program.contains('/') {
            let trusted = program.rsplit_once('/').is_some_and(|(dir, _)| {
                !dir.split('/').any(|part| part == "..")
                    && self.privileged.trusted_dirs.iter().any(|d| d.trim_end_matches('/') == dir)
            });
            if !trusted {
                return Err(Error::Configuration(format!(
                    "privileged command '{}' is outside the trusted directories",
                    program
                )));
            }
        }

        if let Some(user) = command.get_run_as() {
            if !self.privileged.run_as_users.iter().any(|u| u == user) {
                return Err(Error::Configuration(format!(
                    "privileged commands may not run as '{}'",
                    user
                )));
            }
        }

        if self.privileged.use_sudo {
            Ok(command.clone().with_sudo())
        } else {
            Ok(command.clone())
        }
    }

    /// Write in-memory contents to a remote file.
    pub async fn write_file(
        &self,
        target: &RemoteHost,
        remote_path: &str,
        contents: &[u8],
        mode: i32,
    ) -> Result<()> {
        let path = remote_path.to_string();
        let contents = contents.to_vec();
        self.on_channel(target, move |c| c.upload(&path, &contents, mode)).await
    }

    pub async fn upload_file(&self, target: &RemoteHost, local: &Path, remote_path: &str) -> Result<()> {
        let contents = tokio::fs::read(local).await?;
        self.write_file(target, remote_path, &contents, 0o644).await
    }

    pub async fn read_file(&self, target: &RemoteHost, remote_path: &str) -> Result<Vec<u8>> {
        let path = remote_path.to_string();
        self.on_channel(target, move |c| c.download(&path)).await
    }

    pub async fn download_file(&self, target: &RemoteHost, remote_path: &str, local: &Path) -> Result<()> {
        let contents = self.read_file(target, remote_path).await?;
        tokio::fs::write(local, contents).await?;
        Ok(())
    }

    pub async fn exists(&self, target: &RemoteHost, remote_path: &str) -> Result<bool> {
        let path = remote_path.to_string();
        self.on_channel(target, move |c| c.exists(&path)).await
    }

    pub async fn mkdir_all(&self, target: &RemoteHost, remote_path: &str) -> Result<()> {
        let path = remote_path.to_string();
        self.on_channel(target, move |c| c.mkdir_all(&path)).await
    }

    /// Whether a command round-trip to the host succeeds. Never errors.
    pub async fn test_reachability(&self, target: &RemoteHost) -> bool {
        match self.execute(target, &Command::new("true")).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("{} unreachable: {}", target.label(), e);
                false
            }
        }
    }

    /// Close every pooled connection for one host.
    pub async fn close_host(&self, host_id: &str) {
        let removed = self.pool().remove_where(|k| k.host_id == host_id);
        for connection in removed {
            close_connection(connection).await;
        }
    }

    /// Drop pooled connections for `host_id` opened with any credential other
    /// than `active_credential_id`.
    pub async fn invalidate_credential(&self, host_id: &str, active_credential_id: &str) {
        let removed = self
            .pool()
            .remove_where(|k| k.host_id == host_id && k.credential_id != active_credential_id);
        if !removed.is_empty() {
            info!(
                "Closed {} connection(s) to {} after credential switch",
                removed.len(),
                host_id
            );
        }
        for connection in removed {
            close_connection(connection).await;
        }
    }

    pub async fn close_all(&self) {
        let drained = self.pool().drain();
        for connection in drained {
            close_connection(connection).await;
        }
    }
}

fn check(target: &RemoteHost, command: &Command, output: CommandOutput) -> Result<String> {
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(Error::RemoteCommand {
            host: target.label(),
            command: command.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout.trim().to_string(),
            stderr: output.stderr.trim().to_string(),
        })
    }
}

async fn with_connection<T, F>(connection: SharedConnection, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn Connection) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = connection.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut **guard)
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

async fn close_connection(connection: SharedConnection) {
    let _ = with_connection(connection, |c| {
        c.close();
        Ok(())
    })
    .await;
}
