use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, OpenFlags, OpenType, Session};
use tracing::debug;

use super::connection::{CommandOutput, Connection, Connector};
use crate::config::SshSettings;
use crate::error::{Error, Result};
use crate::model::{AuthMethod, TargetHost};

/// libssh2's LIBSSH2_ERROR_EAGAIN, returned by non-blocking calls.
const LIBSSH2_ERROR_EAGAIN: i32 = -37;
/// Pause between polls of an idle non-blocking channel.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 32 * 1024;
/// SFTP status LIBSSH2_FX_NO_SUCH_FILE.
const SFTP_NO_SUCH_FILE: i32 = 2;

/// Production connector: libssh2 sessions with key or password auth.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

impl Connector for SshConnector {
    fn connect(
        &self,
        host: &TargetHost,
        auth: AuthMethod<'_>,
        settings: &SshSettings,
    ) -> Result<Box<dyn Connection>> {
        let session = SshSession::connect(host, auth, settings)?;
        Ok(Box::new(session))
    }
}

pub struct SshSession {
    session: Session,
    host: String,
    closed: bool,
}

fn unreachable(host: &str, reason: impl ToString) -> Error {
    Error::Connectivity {
        host: host.to_string(),
        attempts: 1,
        reason: reason.to_string(),
    }
}

impl SshSession {
    pub fn connect(host: &TargetHost, auth: AuthMethod<'_>, settings: &SshSettings) -> Result<Self> {
        let label = host.address();
        debug!("Connecting to {}@{}", host.user, label);

        let addr = (host.hostname.as_str(), host.port)
            .to_socket_addrs()
            .map_err(|e| unreachable(&label, e))?
            .next()
            .ok_or_else(|| unreachable(&label, "hostname resolved to no addresses"))?;

        let tcp = TcpStream::connect_timeout(&addr, settings.connect_timeout())
            .map_err(|e| unreachable(&label, e))?;

        let mut session = Session::new().map_err(|e| unreachable(&label, e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis(settings.connect_timeout()));
        session.handshake().map_err(|e| unreachable(&label, e))?;

        if settings.strict_host_key_checking {
            verify_host_key(&session, host, settings)?;
        }

        let authenticated = match auth {
            AuthMethod::PrivateKey { path, passphrase } => {
                session.userauth_pubkey_file(&host.user, None, path, passphrase)
            }
            AuthMethod::Password(password) => session.userauth_password(&host.user, password),
        };
        authenticated.map_err(|e| unreachable(&label, format!("authentication failed: {}", e)))?;
        if !session.authenticated() {
            return Err(unreachable(&label, "authentication rejected"));
        }

        session.set_keepalive(true, settings.keepalive_interval_secs);
        session.set_timeout(0);

        Ok(Self {
            session,
            host: label,
            closed: false,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn io_error(&self, context: &str, err: ssh2::Error) -> Error {
        unreachable(&self.host, format!("{}: {}", context, err))
    }

    /// Run `command` on a non-blocking channel so `deadline` bounds the
    /// whole command, not each read.
    fn exec_until(&self, command: &str, deadline: Instant) -> std::result::Result<CommandOutput, ExecFailure> {
        let session = &self.session;
        let mut channel = retry(deadline, || session.channel_session())?;
        retry(deadline, || channel.exec(command))?;

        let (stdout, stderr) = pump_output(
            &mut channel.stream(0),
            &mut channel.stderr(),
            || channel.eof(),
            deadline,
        )?;

        retry(deadline, || channel.wait_close())?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code: channel.exit_status()?,
        })
    }
}

/// Repeat a non-blocking libssh2 call until it stops asking to be retried.
fn retry<T>(
    deadline: Instant,
    mut call: impl FnMut() -> std::result::Result<T, ssh2::Error>,
) -> std::result::Result<T, ExecFailure> {
    loop {
        match call() {
            Err(e) if e.code() == ErrorCode::Session(LIBSSH2_ERROR_EAGAIN) => {
                if Instant::now() >= deadline {
                    return Err(ExecFailure::TimedOut);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            other => return other.map_err(ExecFailure::Ssh),
        }
    }
}

/// Read stdout and stderr in turns until the remote side signals EOF.
/// Alternating keeps a chatty stderr from stalling behind an idle stdout,
/// and the deadline holds even while output keeps arriving.
fn pump_output(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
    mut eof: impl FnMut() -> bool,
    deadline: Instant,
) -> std::result::Result<(Vec<u8>, Vec<u8>), ExecFailure> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let progressed = read_chunk(stdout, &mut buf, &mut out)? | read_chunk(stderr, &mut buf, &mut err)?;
        if eof() {
            // Whatever was buffered before EOF.
            while read_chunk(stdout, &mut buf, &mut out)? | read_chunk(stderr, &mut buf, &mut err)? {}
            return Ok((out, err));
        }
        if Instant::now() >= deadline {
            return Err(ExecFailure::TimedOut);
        }
        if !progressed {
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// One read from a non-blocking stream; `true` when bytes arrived.
fn read_chunk(stream: &mut impl Read, buf: &mut [u8], into: &mut Vec<u8>) -> io::Result<bool> {
    match stream.read(buf) {
        Ok(n) => {
            into.extend_from_slice(&buf[..n]);
            Ok(n > 0)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

enum ExecFailure {
    Ssh(ssh2::Error),
    Io(std::io::Error),
    TimedOut,
}

impl From<ssh2::Error> for ExecFailure {
    fn from(err: ssh2::Error) -> Self {
        ExecFailure::Ssh(err)
    }
}

impl From<std::io::Error> for ExecFailure {
    fn from(err: std::io::Error) -> Self {
        ExecFailure::Io(err)
    }
}

impl std::fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecFailure::Ssh(e) => write!(f, "{}", e),
            ExecFailure::Io(e) => write!(f, "{}", e),
            ExecFailure::TimedOut => f.write_str("deadline passed"),
        }
    }
}

fn verify_host_key(session: &Session, host: &TargetHost, settings: &SshSettings) -> Result<()> {
    let label = host.address();
    let known_hosts_path = match &settings.known_hosts {
        Some(path) => path.clone(),
        None => dirs::home_dir()
            .map(|home| home.join(".ssh").join("known_hosts"))
            .ok_or_else(|| {
                Error::Configuration("ssh.known_hosts is unset and no home directory".into())
            })?,
    };

    let mut known = session
        .known_hosts()
        .map_err(|e| unreachable(&label, e))?;
    known
        .read_file(&known_hosts_path, KnownHostFileKind::OpenSSH)
        .map_err(|e| {
            Error::Configuration(format!(
                "cannot read known hosts {}: {}",
                known_hosts_path.display(),
                e
            ))
        })?;

    let (key, _) = session
        .host_key()
        .ok_or_else(|| unreachable(&label, "server sent no host key"))?;

    match known.check_port(&host.hostname, host.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(Error::Configuration(format!(
            "host key for {} does not match {}",
            label,
            known_hosts_path.display()
        ))),
        CheckResult::NotFound => Err(Error::Configuration(format!(
            "host {} is not in {}",
            label,
            known_hosts_path.display()
        ))),
        CheckResult::Failure => Err(unreachable(&label, "host key check failed")),
    }
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

impl Connection for SshSession {
    fn is_alive(&mut self) -> bool {
        !self.closed
            && self.session.authenticated() && self.session.keepalive_send().is_ok()
    }

    fn exec(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let deadline = Instant::now() + timeout;
        self.session.set_blocking(false);
        let result = self.exec_until(command, deadline);
        self.session.set_blocking(true);

        result.map_err(|failure| match failure {
            ExecFailure::TimedOut => Error::Timeout {
                host: self.host.clone(),
                command: command.to_string(),
                timeout,
            },
            failure => unreachable(&self.host, format!("exec failed: {}", failure)),
        })
    }

    fn upload(&mut self, remote_path: &str, contents: &[u8], mode: i32) -> Result<()> {
        debug!("[{}] upload: {} ({} bytes)", self.host, remote_path, contents.len());

        let sftp = self.session.sftp().map_err(|e| self.io_error("sftp", e))?;
        let mut file = sftp
            .open_mode(
                Path::new(remote_path),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                mode,
                OpenType::File,
            )
            .map_err(|e| self.io_error(&format!("open {}", remote_path), e))?;
        file.write_all(contents)?;
        Ok(())
    }

    fn download(&mut self, remote_path: &str) -> Result<Vec<u8>> {
        debug!("[{}] download: {}", self.host, remote_path);

        let sftp = self.session.sftp().map_err(|e| self.io_error("sftp", e))?;
        let mut file = sftp
            .open(Path::new(remote_path))
            .map_err(|e| self.io_error(&format!("open {}", remote_path), e))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        Ok(contents)
    }

    fn exists(&mut self, remote_path: &str) -> Result<bool> {
        let sftp = self.session.sftp().map_err(|e| self.io_error("sftp", e))?;
        match sftp.stat(Path::new(remote_path)) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => Ok(false),
            Err(e) => Err(self.io_error(&format!("stat {}", remote_path), e)),
        }
    }

    fn mkdir_all(&mut self, remote_path: &str) -> Result<()> {
        debug!("[{}] mkdir -p {}", self.host, remote_path);

        let sftp = self.session.sftp().map_err(|e| self.io_error("sftp", e))?;
        let mut current = PathBuf::new();
        for component in Path::new(remote_path).components() {
            current.push(component);
            if matches!(component, Component::RootDir) {
                continue;
            }
            match sftp.stat(&current) {
                Ok(stat) if stat.is_dir() => continue,
                Ok(_) => {
                    return Err(Error::Validation(format!(
                        "{} exists on {} and is not a directory",
                        current.display(),
                        self.host
                    )))
                }
                Err(e) if e.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => {
                    sftp.mkdir(&current, 0o755)
                        .map_err(|e| self.io_error(&format!("mkdir {}", current.display()), e))?;
                }
                Err(e) => {
                    return Err(self.io_error(&format!("stat {}", current.display()), e));
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        debug!("Closing SSH session to {}", self.host);
        let _ = self.session.disconnect(None, "hostforge: closing", None);
        self.closed = true;
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}
