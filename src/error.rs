//! Error taxonomy shared by the channel manager, generators and strategies.

use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing settings, unknown credential kind, disallowed privileged
    /// command. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connect or authentication failure after the retry budget was spent.
    #[error("cannot reach {host} after {attempts} attempt(s): {reason}")]
    Connectivity {
        host: String,
        attempts: u32,
        reason: String,
    },

    #[error("command on {host} timed out after {}s: {command}", .timeout.as_secs())]
    Timeout {
        host: String,
        command: String,
        timeout: Duration,
    },

    #[error("command failed on {host} (exit {exit_code}): {command}\nstdout: {stdout}\nstderr: {stderr}")]
    RemoteCommand {
        host: String,
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// A generated artifact was rejected before anything service-affecting ran.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A lifecycle operation was requested from a state that does not allow it.
    #[error("{domain} is {from}; cannot move to {to}")]
    InvalidTransition {
        domain: String,
        from: String,
        to: String,
    },

    #[error("failed to render {artifact}: {reason}")]
    Render { artifact: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn render(artifact: impl Into<String>, reason: impl ToString) -> Self {
        Error::Render {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<minijinja::Error> for Error {
    fn from(err: minijinja::Error) -> Self {
        let name = err.name().unwrap_or("template").to_string();
        Error::render(name, err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::render("manifest", err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_errors_name_the_template() {
        let mut env = minijinja::Environment::new();
        let err = env
            .add_template("vhost.conf", "server {% if %}")
            .unwrap_err();

        match Error::from(err) {
            Error::Render { artifact, .. } => assert_eq!(artifact, "vhost.conf"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
