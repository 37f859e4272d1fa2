use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::Topology;
use crate::error::{Error, Result};

/// A reachable machine. Sites reference hosts by id; hosts outlive sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHost {
    pub id: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    pub topology: Option<Topology>,
    /// Free-form provider hint, e.g. `hetzner`.
    pub cloud: Option<String>,
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

impl TargetHost {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            port: default_port(),
            user: default_user(),
            topology: None,
            cloud: None,
            credentials: Vec::new(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn active_credential(&self) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.active)
    }

    /// Mark `credential_id` active and every other credential inactive in one
    /// mutation. Returns the id that was active before, if any.
    pub fn activate_credential(&mut self, credential_id: &str) -> Result<Option<String>> {
        if !self.credentials.iter().any(|c| c.id == credential_id) {
            return Err(Error::NotFound(format!(
                "credential '{}' on host '{}'",
                credential_id, self.id
            )));
        }

        let previous = self.active_credential().map(|c| c.id.clone());
        for credential in &mut self.credentials {
            credential.active = credential.id == credential_id;
        }
        Ok(previous)
    }
}

/// SSH login material for one host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    /// `key` or `password`. Kept as written so a bad value surfaces as a
    /// configuration error at connect time instead of failing the whole
    /// inventory load.
    pub kind: Option<String>,
    pub private_key: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub active: bool,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("private_key", &self.private_key)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// The authentication method a credential resolves to.
#[derive(Debug, Clone, Copy)]
pub enum AuthMethod<'a> {
    PrivateKey {
        path: &'a Path,
        passphrase: Option<&'a str>,
    },
    Password(&'a str),
}

impl Credential {
    pub fn key(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind: Some("key".to_string()),
            private_key: Some(path.into()),
            passphrase: None,
            password: None,
            active: true,
        }
    }

    pub fn password(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: Some("password".to_string()),
            private_key: None,
            passphrase: None,
            password: Some(password.into()),
            active: true,
        }
    }

    pub fn auth_method(&self) -> Result<AuthMethod<'_>> {
        match self.kind.as_deref() {
            Some("key") => {
                let path = self.private_key.as_deref().ok_or_else(|| {
                    Error::Configuration(format!(
                        "credential '{}' is a key credential without private_key",
                        self.id
                    ))
                })?;
                Ok(AuthMethod::PrivateKey {
                    path,
                    passphrase: self.passphrase.as_deref(),
                })
            }
            Some("password") => {
                let password = self.password.as_deref().ok_or_else(|| {
                    Error::Configuration(format!(
                        "credential '{}' is a password credential without password",
                        self.id
                    ))
                })?;
                Ok(AuthMethod::Password(password))
            }
            Some(other) => Err(Error::Configuration(format!(
                "credential '{}' has unknown kind '{}'. Supported: key, password",
                self.id, other
            ))),
            None => Err(Error::Configuration(format!(
                "credential '{}' has no kind",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with_two_credentials() -> TargetHost {
        let mut host = TargetHost::new("web1", "10.0.0.5");
        host.credentials.push(Credential::key("deploy-key", "/keys/id_ed25519"));
        let mut pw = Credential::password("root-pw", "s3cret");
        pw.active = false;
        host.credentials.push(pw);
        host
    }

    #[test]
    fn activation_leaves_exactly_one_active() {
        let mut host = host_with_two_credentials();
        let previous = host.activate_credential("root-pw").unwrap();

        assert_eq!(previous.as_deref(), Some("deploy-key"));
        assert_eq!(host.active_credential().unwrap().id, "root-pw");
        assert_eq!(host.credentials.iter().filter(|c| c.active).count(), 1);
    }

    #[test]
    fn activating_unknown_credential_changes_nothing() {
        let mut host = host_with_two_credentials();
        assert!(host.activate_credential("nope").is_err());
        assert_eq!(host.active_credential().unwrap().id, "deploy-key");
    }

    #[test]
    fn unknown_or_missing_kind_is_a_configuration_error() {
        let mut cred = Credential::password("c", "pw");
        cred.kind = Some("kerberos".into());
        assert!(matches!(cred.auth_method(), Err(Error::Configuration(_))));

        cred.kind = None;
        assert!(matches!(cred.auth_method(), Err(Error::Configuration(_))));
    }

    #[test]
    fn key_credential_resolves_passphrase() {
        let mut cred = Credential::key("k", "/keys/id_rsa");
        cred.passphrase = Some("open sesame".into());
        match cred.auth_method().unwrap() {
            AuthMethod::PrivateKey { path, passphrase } => {
                assert_eq!(path, Path::new("/keys/id_rsa"));
                assert_eq!(passphrase, Some("open sesame"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cred = Credential::password("c", "topsecret");
        assert!(!format!("{:?}", cred).contains("topsecret"));
    }
}
