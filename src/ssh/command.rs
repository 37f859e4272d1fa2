use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

/// A remote command as a program plus an argument vector.
///
/// Arguments are never spliced into shell text by callers: the remote side
/// runs commands through a shell, so [`Command::to_shell`] quotes every word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<String>,
    cwd: Option<String>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
    sudo: bool,
    run_as: Option<String>,
    sensitive: bool,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
            sudo: false,
            run_as: None,
            sensitive: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Overrides the channel manager's default command timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Arguments carry secrets: logs and errors show only the program.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Run as another local user. Only honoured on the privileged path,
    /// and only for users the privileged settings list.
    pub fn run_as(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    pub(crate) fn with_sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    pub fn get_run_as(&self) -> Option<&str> {
        self.run_as.as_deref()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The program name without any directory part, as matched against the
    /// privileged allow-list.
    pub fn basename(&self) -> &str {
        self.program.rsplit('/').next().unwrap_or(&self.program)
    }

    pub fn to_shell(&self) -> String {
        let mut words: Vec<Cow<'_, str>> = Vec::new();
        match (self.sudo, &self.run_as) {
            (true, None) => words.extend(["sudo", "-n"].map(Cow::Borrowed)),
            (true, Some(user)) => {
                words.extend(["sudo", "-n", "-u"].map(Cow::Borrowed));
                words.push(quote(user));
            }
            // Already root: switch user without sudo.
            (false, Some(user)) => {
                words.extend(["runuser", "-u"].map(Cow::Borrowed));
                words.push(quote(user));
                words.push("--".into());
            }
            (false, None) => {}
        }
        if (self.sudo || self.run_as.is_some()) && !self.env.is_empty() {
            words.push("env".into());
        }
        for (key, value) in &self.env {
            words.push(format!("{}={}", key, quote(value)).into());
        }
        words.push(quote(&self.program));
        words.extend(self.args.iter().map(|a| quote(a)));

        let line = words.join(" ");
        match &self.cwd {
            Some(dir) => format!("cd {} && {}", quote(dir), line),
            None => line,
        }
    }
}

/// Safe for logs: sensitive commands print their program only.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sensitive {
            write!(f, "{} <{} argument(s) redacted>", self.program, self.args.len())
        } else {
            f.write_str(&self.to_shell())
        }
    }
}

/// Quote one word for a POSIX shell. Words made only of safe characters pass
/// through unchanged so logged commands stay readable.
pub fn quote(word: &str) -> Cow<'_, str> {
    let safe = !word.is_empty()
        && word.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(b, b'-' | b'_' | b'.' | b'/' | b':' | b'=' | b',' | b'@' | b'+' | b'%')
        });
    if safe {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', "'\\''")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_are_not_quoted() {
        let cmd = Command::new("docker").args(["network", "create", "site-net"]);
        assert_eq!(cmd.to_shell(), "docker network create site-net");
    }

    #[test]
    fn hostile_arguments_stay_single_words() {
        let cmd = Command::new("mkdir").arg("-p").arg("/var/www/x; rm -rf /");
        assert_eq!(cmd.to_shell(), "mkdir -p '/var/www/x; rm -rf /'");

        let cmd = Command::new("echo").arg("it's");
        assert_eq!(cmd.to_shell(), "echo 'it'\\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn cwd_env_and_sudo_are_rendered() {
        let cmd = Command::new("docker")
            .args(["compose", "up", "-d"])
            .current_dir("/srv/my site")
            .env("COMPOSE_PROJECT_NAME", "shop")
            .with_sudo();
        assert_eq!(
            cmd.to_shell(),
            "cd '/srv/my site' && sudo -n env COMPOSE_PROJECT_NAME=shop docker compose up -d"
        );
    }

    #[test]
    fn run_as_switches_user_with_or_without_sudo() {
        let psql = Command::new("psql").args(["-c", "SELECT 1"]).run_as("postgres");
        assert_eq!(psql.clone().with_sudo().to_shell(), "sudo -n -u postgres psql -c 'SELECT 1'");
        assert_eq!(psql.to_shell(), "runuser -u postgres -- psql -c 'SELECT 1'");
    }

    #[test]
    fn sensitive_commands_hide_arguments_in_display() {
        let cmd = Command::new("mysql").args(["-e", "IDENTIFIED BY 'hunter2'"]).sensitive();
        assert!(cmd.to_shell().contains("hunter2"));
        assert_eq!(cmd.to_string(), "mysql <2 argument(s) redacted>");
    }

    #[test]
    fn basename_strips_directories() {
        assert_eq!(Command::new("/usr/sbin/nginx").basename(), "nginx");
        assert_eq!(Command::new("systemctl").basename(), "systemctl");
    }
}
