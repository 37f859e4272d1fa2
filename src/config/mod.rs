use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::WebServer;

mod validate;

/// Process-wide settings. Loaded once, then shared read-only.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub privileged: PrivilegedSettings,
    #[serde(default)]
    pub kubernetes: KubernetesSettings,
    #[serde(default)]
    pub compose: ComposeSettings,
    #[serde(default)]
    pub standalone: StandaloneSettings,
    #[serde(default)]
    pub detector: DetectorSettings,
    #[serde(default)]
    pub state: StateSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshSettings {
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u32,
    /// Reject hosts missing from `known_hosts` instead of accepting them.
    #[serde(default)]
    pub strict_host_key_checking: bool,
    pub known_hosts: Option<PathBuf>,
}

fn default_pool_capacity() -> usize {
    16
}
fn default_connect_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_command_timeout_secs() -> u64 {
    300
}
fn default_keepalive_interval_secs() -> u32 {
    30
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            strict_host_key_checking: false,
            known_hosts: None,
        }
    }
}

impl SshSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrivilegedSettings {
    /// Prefix privileged commands with `sudo -n` (off when logging in as root).
    #[serde(default = "default_true")]
    pub use_sudo: bool,
    /// Program names allowed through `execute_privileged`.
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    /// Local users a privileged command may switch to.
    #[serde(default = "default_run_as_users")]
    pub run_as_users: Vec<String>,
    /// Directories an absolute privileged program path may live in.
    #[serde(default = "default_trusted_dirs")]
    pub trusted_dirs: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_allowed_commands() -> Vec<String> {
    [
        "nginx",
        "apachectl",
        "a2ensite",
        "a2dissite",
        "systemctl",
        "certbot",
        "install",
        "cp",
        "mv",
        "rm",
        "ln",
        "mkdir",
        "chown",
        "mysql",
        "psql",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_run_as_users() -> Vec<String> {
    vec!["postgres".to_string()]
}

fn default_trusted_dirs() -> Vec<String> {
    ["/usr/sbin", "/usr/bin", "/sbin", "/bin"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for PrivilegedSettings {
    fn default() -> Self {
        Self {
            use_sudo: true,
            allowed_commands: default_allowed_commands(),
            run_as_users: default_run_as_users(),
            trusted_dirs: default_trusted_dirs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KubernetesSettings {
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,
    pub storage_class: Option<String>,
    #[serde(default = "default_cluster_issuer")]
    pub cluster_issuer: String,
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
    /// Namespace the ingress controller runs in; admitted by the site's
    /// network policies.
    #[serde(default = "default_ingress_namespace")]
    pub ingress_namespace: String,
    #[serde(default = "default_nginx_image")]
    pub nginx_image: String,
    /// `{version}` is replaced with the plan's PHP version.
    #[serde(default = "default_php_image")]
    pub php_image: String,
    #[serde(default = "default_redis_image")]
    pub redis_image: String,
    #[serde(default = "default_rollout_timeout_secs")]
    pub rollout_timeout_secs: u64,
    /// Remote directory manifests are staged in before `kubectl apply`.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}
fn default_ingress_class() -> String {
    "nginx".to_string()
}
fn default_cluster_issuer() -> String {
    "letsencrypt-prod".to_string()
}
fn default_field_manager() -> String {
    "hostforge".to_string()
}
fn default_ingress_namespace() -> String {
    "ingress-nginx".to_string()
}
fn default_nginx_image() -> String {
    "nginx:1.27-alpine".to_string()
}
fn default_php_image() -> String {
    "php:{version}-fpm-alpine".to_string()
}
fn default_redis_image() -> String {
    "redis:7-alpine".to_string()
}
fn default_rollout_timeout_secs() -> u64 {
    300
}
fn default_staging_dir() -> String {
    "/tmp/hostforge".to_string()
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            ingress_class: default_ingress_class(),
            storage_class: None,
            cluster_issuer: default_cluster_issuer(),
            field_manager: default_field_manager(),
            ingress_namespace: default_ingress_namespace(),
            nginx_image: default_nginx_image(),
            php_image: default_php_image(),
            redis_image: default_redis_image(),
            rollout_timeout_secs: default_rollout_timeout_secs(),
            staging_dir: default_staging_dir(),
        }
    }
}

impl KubernetesSettings {
    pub fn php_image_for(&self, version: &str) -> String {
        self.php_image.replace("{version}", version)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComposeSettings {
    /// Each site gets `<projects_dir>/<project>/docker-compose.yml`.
    #[serde(default = "default_projects_dir")]
    pub projects_dir: String,
    #[serde(default = "default_nginx_image")]
    pub nginx_image: String,
    #[serde(default = "default_php_image")]
    pub php_image: String,
    #[serde(default = "default_redis_image")]
    pub redis_image: String,
    /// External network the web container also joins so a shared reverse
    /// proxy can route to it.
    pub proxy_network: Option<String>,
}

fn default_projects_dir() -> String {
    "/srv/hostforge".to_string()
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            nginx_image: default_nginx_image(),
            php_image: default_php_image(),
            redis_image: default_redis_image(),
            proxy_network: None,
        }
    }
}

impl ComposeSettings {
    pub fn php_image_for(&self, version: &str) -> String {
        self.php_image.replace("{version}", version)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StandaloneSettings {
    #[serde(default = "default_web_server")]
    pub web_server: WebServer,
    #[serde(default = "default_web_root")]
    pub web_root: String,
    /// Owner of each document root, as `user[:group]`.
    #[serde(default = "default_web_user")]
    pub web_user: String,
    #[serde(default = "default_nginx_sites_available")]
    pub nginx_sites_available: String,
    #[serde(default = "default_nginx_sites_enabled")]
    pub nginx_sites_enabled: String,
    #[serde(default = "default_apache_sites_available")]
    pub apache_sites_available: String,
    #[serde(default = "default_apache_sites_enabled")]
    pub apache_sites_enabled: String,
    /// `{version}` is replaced with the plan's PHP version.
    #[serde(default = "default_php_fpm_socket")]
    pub php_fpm_socket: String,
    #[serde(default = "default_php_fpm_unit")]
    pub php_fpm_unit: String,
    #[serde(default = "default_letsencrypt_live")]
    pub letsencrypt_live: String,
    pub certbot_email: Option<String>,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
}

fn default_web_server() -> WebServer {
    WebServer::Nginx
}
fn default_web_root() -> String {
    "/var/www".to_string()
}
fn default_web_user() -> String {
    "www-data:www-data".to_string()
}
fn default_nginx_sites_available() -> String {
    "/etc/nginx/sites-available".to_string()
}
fn default_nginx_sites_enabled() -> String {
    "/etc/nginx/sites-enabled".to_string()
}
fn default_apache_sites_available() -> String {
    "/etc/apache2/sites-available".to_string()
}
fn default_apache_sites_enabled() -> String {
    "/etc/apache2/sites-enabled".to_string()
}
fn default_php_fpm_socket() -> String {
    "/run/php/php{version}-fpm.sock".to_string()
}
fn default_php_fpm_unit() -> String {
    "php{version}-fpm".to_string()
}
fn default_letsencrypt_live() -> String {
    "/etc/letsencrypt/live".to_string()
}

impl Default for StandaloneSettings {
    fn default() -> Self {
        Self {
            web_server: default_web_server(),
            web_root: default_web_root(),
            web_user: default_web_user(),
            nginx_sites_available: default_nginx_sites_available(),
            nginx_sites_enabled: default_nginx_sites_enabled(),
            apache_sites_available: default_apache_sites_available(),
            apache_sites_enabled: default_apache_sites_enabled(),
            php_fpm_socket: default_php_fpm_socket(),
            php_fpm_unit: default_php_fpm_unit(),
            letsencrypt_live: default_letsencrypt_live(),
            certbot_email: None,
            staging_dir: default_staging_dir(),
        }
    }
}

impl StandaloneSettings {
    pub fn php_fpm_socket_for(&self, version: &str) -> String {
        self.php_fpm_socket.replace("{version}", version)
    }

    pub fn php_fpm_unit_for(&self, version: &str) -> String {
        self.php_fpm_unit.replace("{version}", version)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectorSettings {
    /// Filesystem root the marker paths are resolved against.
    #[serde(default = "default_detector_root")]
    pub root: PathBuf,
    #[serde(default = "default_true")]
    pub probe_metadata: bool,
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
    /// Upper bound for local `kubectl` probes.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_detector_root() -> PathBuf {
    PathBuf::from("/")
}
fn default_metadata_timeout_ms() -> u64 {
    1000
}
fn default_probe_timeout_secs() -> u64 {
    5
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            root: default_detector_root(),
            probe_metadata: true,
            metadata_timeout_ms: default_metadata_timeout_ms(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl DetectorSettings {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StateSettings {
    /// Where deployment records are kept. Defaults to the user data dir.
    pub dir: Option<PathBuf>,
}

impl StateSettings {
    pub fn dir(&self) -> Result<PathBuf> {
        match &self.dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let base = dirs::data_local_dir().context("Could not determine data directory")?;
                Ok(base.join("hostforge"))
            }
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        validate::validate(&settings)?;
        Ok(settings)
    }
}
