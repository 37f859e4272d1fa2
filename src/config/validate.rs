use anyhow::{bail, Result};

use super::Settings;

/// Programs that run other programs or switch users; allowing one would
/// allow everything.
const WRAPPERS: &[&str] = &[
    "sudo", "su", "runuser", "doas", "env", "sh", "bash", "dash", "zsh", "xargs", "nohup",
    "setsid", "chroot", "nice", "timeout", "stdbuf",
];

pub fn validate(settings: &Settings) -> Result<()> {
    let ssh = &settings.ssh;
    if ssh.pool_capacity == 0 {
        bail!("ssh.pool_capacity must be at least 1");
    }
    if ssh.connect_attempts == 0 {
        bail!("ssh.connect_attempts must be at least 1");
    }
    if ssh.command_timeout_secs == 0 {
        bail!("ssh.command_timeout_secs must be greater than 0");
    }

    for cmd in &settings.privileged.allowed_commands {
        if cmd.is_empty() || cmd.contains('/') || cmd.contains(char::is_whitespace) {
            bail!(
                "privileged.allowed_commands entry '{}' must be a bare command name",
                cmd
            );
        }
        if WRAPPERS.contains(&cmd.as_str()) {
            bail!(
                "privileged.allowed_commands cannot contain '{}'; it would run arbitrary commands",
                cmd
            );
        }
    }
    for user in &settings.privileged.run_as_users {
        let well_formed = !user.is_empty()
            && user
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !well_formed || user == "root" {
            bail!("privileged.run_as_users entry '{}' is not a valid non-root user name", user);
        }
    }
    for dir in &settings.privileged.trusted_dirs {
        if !dir.starts_with('/') || dir.split('/').any(|part| part == "..") {
            bail!("privileged.trusted_dirs entry '{}' must be an absolute path", dir);
        }
    }

    let detector = &settings.detector;
    if detector.metadata_timeout_ms == 0 || detector.metadata_timeout_ms > 1000 {
        bail!(
            "detector.metadata_timeout_ms has invalid value {}. Must be between 1 and 1000",
            detector.metadata_timeout_ms
        );
    }

    let k8s = &settings.kubernetes;
    if k8s.ingress_class.is_empty() {
        bail!("kubernetes.ingress_class cannot be empty");
    }
    if k8s.field_manager.is_empty() {
        bail!("kubernetes.field_manager cannot be empty");
    }

    for (key, path) in [
        ("compose.projects_dir", &settings.compose.projects_dir),
        ("standalone.web_root", &settings.standalone.web_root),
        ("standalone.staging_dir", &settings.standalone.staging_dir),
        ("kubernetes.staging_dir", &k8s.staging_dir),
    ] {
        if !path.starts_with('/') || path.len() < 2 {
            bail!("{} must be an absolute path below /, got '{}'", key, path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::Settings;

    #[test]
    fn rejects_zero_attempts() {
        let err = Settings::from_toml("[ssh]\nconnect_attempts = 0\n").unwrap_err();
        assert!(format!("{:#}", err).contains("connect_attempts"));
    }

    #[test]
    fn rejects_paths_in_allow_list() {
        let err = Settings::from_toml("[privileged]\nallowed_commands = [\"/bin/sh\"]\n")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("bare command name"));
    }

    #[test]
    fn rejects_user_switching_wrappers_in_allow_list() {
        for wrapper in ["runuser", "sudo", "sh", "env"] {
            let toml = format!("[privileged]\nallowed_commands = [\"nginx\", \"{}\"]\n", wrapper);
            let err = Settings::from_toml(&toml).unwrap_err();
            assert!(format!("{:#}", err).contains("arbitrary commands"), "{}", wrapper);
        }
    }

    #[test]
    fn default_allow_list_has_no_wrappers() {
        let settings = Settings::default();
        assert!(!settings.privileged.allowed_commands.iter().any(|c| c == "runuser"));
        assert!(settings.privileged.allowed_commands.iter().any(|c| c == "psql"));
        assert!(super::validate(&settings).is_ok());
    }

    #[test]
    fn rejects_root_as_run_as_user() {
        assert!(Settings::from_toml("[privileged]\nrun_as_users = [\"root\"]\n").is_err());
    }

    #[test]
    fn rejects_slow_metadata_timeout() {
        assert!(Settings::from_toml("[detector]\nmetadata_timeout_ms = 5000\n").is_err());
    }

    #[test]
    fn rejects_relative_web_root() {
        assert!(Settings::from_toml("[standalone]\nweb_root = \"www\"\n").is_err());
    }
}
