//! Scripted in-memory remote host for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::connection::{CommandOutput, Connection, Connector};
use crate::config::SshSettings;
use crate::error::{Error, Result};
use crate::model::{AuthMethod, TargetHost};

enum Reply {
    Output(CommandOutput),
    Timeout,
    /// The session dies mid-command but still answers keepalives.
    Broken,
}

#[derive(Default)]
struct State {
    commands: Vec<String>,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    rules: Vec<(String, Reply)>,
    connects: u32,
    failing_connects: u32,
    closed: u32,
    generation: u64,
}

/// A fake host shared by every connection it hands out. Commands are logged,
/// a handful of file commands (`cp`, `mv`, `rm`, `install`, `mkdir`) mutate
/// the in-memory filesystem, and replies are scripted by substring match.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<State>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connection(&self) -> Box<dyn Connection> {
        let generation = self.lock().generation;
        Box::new(FakeConnection {
            remote: self.clone(),
            generation,
        })
    }

    /// Reply to any command containing `pattern`. Later rules win.
    pub fn respond(&self, pattern: &str, exit_code: i32, stdout: &str) {
        self.respond_full(pattern, exit_code, stdout, "");
    }

    pub fn respond_full(&self, pattern: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.lock().rules.push((
            pattern.to_string(),
            Reply::Output(CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            }),
        ));
    }

    pub fn respond_timeout(&self, pattern: &str) {
        self.lock().rules.push((pattern.to_string(), Reply::Timeout));
    }

    pub fn respond_broken(&self, pattern: &str) {
        self.lock().rules.push((pattern.to_string(), Reply::Broken));
    }

    /// The next `n` connection attempts fail with a connectivity error.
    pub fn fail_connects(&self, n: u32) {
        self.lock().failing_connects = n;
    }

    /// Every connection handed out so far reports itself dead.
    pub fn drop_connections(&self) {
        self.lock().generation += 1;
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    pub fn closed(&self) -> u32 {
        self.lock().closed
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.lock().commands.iter().any(|c| c.contains(pattern))
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    pub fn put_file(&self, path: &str, contents: &str) {
        self.lock()
            .files
            .insert(path.to_string(), contents.as_bytes().to_vec());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.lock()
            .files
            .get(path)
            .map(|b| String::from_utf8_lossy(b).to_string())
    }

    pub fn files_under(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .files
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }
}

impl Connector for FakeRemote {
    fn connect(
        &self,
        host: &TargetHost,
        _auth: AuthMethod<'_>,
        _settings: &SshSettings,
    ) -> Result<Box<dyn Connection>> {
        {
            let mut state = self.lock();
            state.connects += 1;
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(Error::Connectivity {
                    host: host.address(),
                    attempts: 1,
                    reason: "connection refused".into(),
                });
            }
        }
        Ok(self.connection())
    }
}

struct FakeConnection {
    remote: FakeRemote,
    generation: u64,
}

fn words(command: &str) -> Vec<String> {
    let line = match command.find(" && ") {
        Some(idx) if command.starts_with("cd ") => &command[idx + 4..],
        _ => command,
    };
    line.split_whitespace()
        .map(|w| w.trim_matches('\'').to_string())
        .skip_while(|w| w == "sudo" || w == "-n")
        .collect()
}

fn apply_file_effects(state: &mut State, command: &str) {
    let words = words(command);
    let Some((program, rest)) = words.split_first() else {
        return;
    };

    let mut operands = Vec::new();
    let mut skip_next = false;
    for word in rest {
        if skip_next {
            skip_next = false;
            continue;
        }
        if word == "-m" {
            skip_next = true;
            continue;
        }
        if word.starts_with('-') {
            continue;
        }
        operands.push(word.clone());
    }

    match (program.as_str(), operands.as_slice()) {
        ("cp" | "install", [src, dst]) => {
            if let Some(contents) = state.files.get(src).cloned() {
                state.files.insert(dst.clone(), contents);
            }
        }
        ("mv", [src, dst]) => {
            if let Some(contents) = state.files.remove(src) {
                state.files.insert(dst.clone(), contents);
            }
        }
        ("rm", paths) => {
            for path in paths {
                let prefix = format!("{}/", path);
                state
                    .files
                    .retain(|k, _| k != path && !k.starts_with(&prefix));
                state.dirs.retain(|d| d != path && !d.starts_with(&prefix));
            }
        }
        ("mkdir", paths) => {
            for path in paths {
                state.dirs.insert(path.clone());
            }
        }
        _ => {}
    }
}

impl Connection for FakeConnection {
    fn is_alive(&mut self) -> bool {
        self.remote.lock().generation == self.generation
    }

    fn exec(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let mut state = self.remote.lock();
        state.commands.push(command.to_string());

        let reply = state
            .rules
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, reply)| match reply {
                Reply::Output(out) => Ok(out.clone()),
                Reply::Timeout => Err(Error::Timeout {
                    host: "fake".into(),
                    command: command.to_string(),
                    timeout,
                }),
                Reply::Broken => Err(Error::Connectivity {
                    host: "fake".into(),
                    attempts: 1,
                    reason: "exec failed: connection reset by peer".into(),
                }),
            });

        match reply {
            Some(Err(e)) => Err(e),
            Some(Ok(out)) => {
                if out.success() {
                    apply_file_effects(&mut state, command);
                }
                Ok(out)
            }
            None => {
                apply_file_effects(&mut state, command);
                Ok(CommandOutput::default())
            }
        }
    }

    fn upload(&mut self, remote_path: &str, contents: &[u8], _mode: i32) -> Result<()> {
        let mut state = self.remote.lock();
        state
            .commands
            .push(format!("<upload {}>", remote_path));
        state.files.insert(remote_path.to_string(), contents.to_vec());
        Ok(())
    }

    fn download(&mut self, remote_path: &str) -> Result<Vec<u8>> {
        self.remote
            .lock()
            .files
            .get(remote_path)
            .cloned()
            .ok_or_else(|| Error::NotFound(remote_path.to_string()))
    }

    fn exists(&mut self, remote_path: &str) -> Result<bool> {
        let state = self.remote.lock();
        Ok(state.files.contains_key(remote_path) || state.dirs.contains(remote_path))
    }

    fn mkdir_all(&mut self, remote_path: &str) -> Result<()> {
        self.remote.lock().dirs.insert(remote_path.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.remote.lock().closed += 1;
    }
}
