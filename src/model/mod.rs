mod host;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub use host::{AuthMethod, Credential, TargetHost};

/// The execution environment a site is deployed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    Kubernetes,
    ContainerHost,
    Standalone,
}

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Kubernetes => "kubernetes",
            Topology::ContainerHost => "container-host",
            Topology::Standalone => "standalone",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topology {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kubernetes" | "k8s" => Ok(Topology::Kubernetes),
            "container-host" | "docker" | "compose" => Ok(Topology::ContainerHost),
            "standalone" => Ok(Topology::Standalone),
            other => Err(Error::Configuration(format!(
                "unknown topology '{}'. Supported: kubernetes, container-host, standalone",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudProvider {
    Aws,
    Gcp,
    Azure,
    DigitalOcean,
    Hetzner,
    Oracle,
    Alibaba,
    OnPremise,
    Unknown,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Gcp => "gcp",
            CloudProvider::Azure => "azure",
            CloudProvider::DigitalOcean => "digitalocean",
            CloudProvider::Hetzner => "hetzner",
            CloudProvider::Oracle => "oracle",
            CloudProvider::Alibaba => "alibaba",
            CloudProvider::OnPremise => "on-premise",
            CloudProvider::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource limits and runtime choices attached to a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostingPlan {
    #[serde(default = "default_plan_name")]
    pub name: String,
    /// CPU limit in millicores.
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_storage_gb")]
    pub storage_gb: u32,
    #[serde(default = "default_php_version")]
    pub php_version: String,
    #[serde(default)]
    pub addons: BTreeSet<String>,
    #[serde(default = "default_max_pods")]
    pub max_pods: u32,
}

fn default_plan_name() -> String {
    "basic".to_string()
}
fn default_cpu() -> u32 {
    500
}
fn default_memory_mb() -> u32 {
    512
}
fn default_storage_gb() -> u32 {
    5
}
fn default_php_version() -> String {
    "8.2".to_string()
}
fn default_max_pods() -> u32 {
    10
}

impl Default for HostingPlan {
    fn default() -> Self {
        Self {
            name: default_plan_name(),
            cpu: default_cpu(),
            memory_mb: default_memory_mb(),
            storage_gb: default_storage_gb(),
            php_version: default_php_version(),
            addons: BTreeSet::new(),
            max_pods: default_max_pods(),
        }
    }
}

impl HostingPlan {
    pub fn has_addon(&self, name: &str) -> bool {
        self.addons.contains(name)
    }

    /// CPU limit in the Kubernetes quantity format, e.g. `500m`.
    pub fn cpu_quantity(&self) -> String {
        format!("{}m", self.cpu)
    }

    /// CPU limit as fractional cores, e.g. `0.5`, for Compose.
    pub fn cpu_cores(&self) -> String {
        let whole = self.cpu / 1000;
        let frac = self.cpu % 1000;
        if frac == 0 {
            format!("{}.0", whole)
        } else {
            let digits = format!("{:03}", frac);
            format!("{}.{}", whole, digits.trim_end_matches('0'))
        }
    }

    pub fn memory_quantity(&self) -> String {
        format!("{}Mi", self.memory_mb)
    }

    pub fn storage_quantity(&self) -> String {
        format!("{}Gi", self.storage_gb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Mysql,
    Mariadb,
    Postgres,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::Mysql => "mysql",
            DatabaseEngine::Mariadb => "mariadb",
            DatabaseEngine::Postgres => "postgres",
        }
    }

    pub fn image(&self) -> &'static str {
        match self {
            DatabaseEngine::Mysql => "mysql:8.0",
            DatabaseEngine::Mariadb => "mariadb:11",
            DatabaseEngine::Postgres => "postgres:16-alpine",
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            DatabaseEngine::Mysql | DatabaseEngine::Mariadb => 3306,
            DatabaseEngine::Postgres => 5432,
        }
    }

    pub fn data_dir(&self) -> &'static str {
        match self {
            DatabaseEngine::Mysql | DatabaseEngine::Mariadb => "/var/lib/mysql",
            DatabaseEngine::Postgres => "/var/lib/postgresql/data",
        }
    }

    /// Environment variable names the official image reads, as
    /// (database, user, password, root-password).
    pub fn env_names(&self) -> (&'static str, &'static str, &'static str, Option<&'static str>) {
        match self {
            DatabaseEngine::Mysql => (
                "MYSQL_DATABASE",
                "MYSQL_USER",
                "MYSQL_PASSWORD",
                Some("MYSQL_ROOT_PASSWORD"),
            ),
            DatabaseEngine::Mariadb => (
                "MARIADB_DATABASE",
                "MARIADB_USER",
                "MARIADB_PASSWORD",
                Some("MARIADB_ROOT_PASSWORD"),
            ),
            DatabaseEngine::Postgres => ("POSTGRES_DB", "POSTGRES_USER", "POSTGRES_PASSWORD", None),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub engine: DatabaseEngine,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DatabaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSpec")
            .field("engine", &self.engine)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebServer {
    Nginx,
    Apache,
}

impl WebServer {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebServer::Nginx => "nginx",
            WebServer::Apache => "apache",
        }
    }
}

/// A domain plus its hosting plan and deployment options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub domain: String,
    /// Id of the target host the site lives on.
    pub host: String,
    #[serde(default)]
    pub plan: HostingPlan,
    #[serde(default)]
    pub ssl: bool,
    pub ssl_email: Option<String>,
    pub database: Option<DatabaseSpec>,
    /// Explicit topology override; wins over the host tag and detection.
    pub topology: Option<Topology>,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub web_server: Option<WebServer>,
}

impl Site {
    pub fn new(domain: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            host: host.into(),
            plan: HostingPlan::default(),
            ssl: false,
            ssl_email: None,
            database: None,
            topology: None,
            aliases: Vec::new(),
            web_server: None,
        }
    }

    /// Every name the site answers to, primary domain first.
    pub fn server_names(&self) -> Vec<&str> {
        std::iter::once(self.domain.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .collect()
    }
}

/// Backend-specific correlation handles, persisted with the deployment record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHandles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose_project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vhost_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_root: Option<String>,
}

impl BackendHandles {
    pub fn is_empty(&self) -> bool {
        *self == BackendHandles::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_round_trips_through_str() {
        for t in [Topology::Kubernetes, Topology::ContainerHost, Topology::Standalone] {
            assert_eq!(t.as_str().parse::<Topology>().unwrap(), t);
        }
        assert!("swarm".parse::<Topology>().is_err());
    }

    #[test]
    fn plan_quantities() {
        let plan = HostingPlan {
            cpu: 1250,
            memory_mb: 1024,
            storage_gb: 20,
            ..HostingPlan::default()
        };
        assert_eq!(plan.cpu_quantity(), "1250m");
        assert_eq!(plan.cpu_cores(), "1.25");
        assert_eq!(plan.memory_quantity(), "1024Mi");
        assert_eq!(plan.storage_quantity(), "20Gi");

        let whole = HostingPlan {
            cpu: 2000,
            ..HostingPlan::default()
        };
        assert_eq!(whole.cpu_cores(), "2.0");
    }

    #[test]
    fn database_password_is_not_debug_printed() {
        let db = DatabaseSpec {
            engine: DatabaseEngine::Mysql,
            name: "shop".into(),
            user: "shop".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", db).contains("hunter2"));
    }

    #[test]
    fn server_names_puts_domain_first() {
        let mut site = Site::new("example.com", "web1");
        site.aliases = vec!["www.example.com".into()];
        assert_eq!(site.server_names(), vec!["example.com", "www.example.com"]);
    }
}
