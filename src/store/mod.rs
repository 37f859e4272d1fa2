//! Persistence for sites, hosts and deployment records.

mod file;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::deploy::DeploymentRecord;
use crate::error::{Error, Result};
use crate::model::{Credential, Site, TargetHost};

pub use file::FileStore;

/// Sites and hosts as written in `inventory.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub hosts: Vec<TargetHost>,
    #[serde(default)]
    pub sites: Vec<Site>,
}

impl Inventory {
    pub fn from_toml(content: &str) -> Result<Self> {
        let inventory: Self = toml::from_str(content)
            .map_err(|e| Error::Store(format!("invalid inventory: {}", e)))?;
        inventory.check()?;
        Ok(inventory)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Store(e.to_string()))
    }

    /// Unique ids, sites pointing at known hosts, at most one active
    /// credential per host.
    pub fn check(&self) -> Result<()> {
        let mut hosts = HashMap::new();
        for host in &self.hosts {
            if hosts.insert(host.id.as_str(), host).is_some() {
                return Err(Error::Store(format!("duplicate host id '{}'", host.id)));
            }
            let active = host.credentials.iter().filter(|c| c.active).count();
            if active > 1 {
                return Err(Error::Store(format!(
                    "host '{}' has {} active credentials; at most one is allowed",
                    host.id, active
                )));
            }
        }

        let mut domains = HashMap::new();
        for site in &self.sites {
            crate::render::validate_site_names(site)?;
            if domains.insert(site.domain.as_str(), ()).is_some() {
                return Err(Error::Store(format!("duplicate site '{}'", site.domain)));
            }
            if !hosts.contains_key(site.host.as_str()) {
                return Err(Error::Store(format!(
                    "site '{}' references unknown host '{}'",
                    site.domain, site.host
                )));
            }
        }
        Ok(())
    }

    pub fn site(&self, domain: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.domain == domain)
    }

    pub fn host(&self, id: &str) -> Option<&TargetHost> {
        self.hosts.iter().find(|h| h.id == id)
    }

    fn host_mut(&mut self, id: &str) -> Result<&mut TargetHost> {
        self.hosts
            .iter_mut()
            .find(|h| h.id == id)
            .ok_or_else(|| Error::NotFound(format!("host '{}'", id)))
    }
}

/// What the orchestrator reads and writes. Implementations must be safe to
/// share across per-site workers.
pub trait Store: Send + Sync {
    fn site(&self, domain: &str) -> Result<Option<Site>>;

    fn sites(&self) -> Result<Vec<Site>>;

    fn host(&self, id: &str) -> Result<Option<TargetHost>>;

    fn hosts(&self) -> Result<Vec<TargetHost>>;

    fn active_credential(&self, host_id: &str) -> Result<Option<Credential>> {
        Ok(self
            .host(host_id)?
            .and_then(|h| h.active_credential().cloned()))
    }

    /// Make `credential_id` the only active credential of `host_id`.
    /// Returns the previously active credential id.
    fn activate_credential(&self, host_id: &str, credential_id: &str) -> Result<Option<String>>;

    fn record(&self, domain: &str) -> Result<Option<DeploymentRecord>>;

    fn save_record(&self, record: &DeploymentRecord) -> Result<()>;
}

/// Keeps everything in memory. Used by tests and when embedding.
#[derive(Default)]
pub struct MemoryStore {
    inventory: Mutex<Inventory>,
    records: Mutex<HashMap<String, DeploymentRecord>>,
}

impl MemoryStore {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            records: Mutex::new(HashMap::new()),
        }
    }

    fn inventory(&self) -> MutexGuard<'_, Inventory> {
        self.inventory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, DeploymentRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_host(&self, host: TargetHost) {
        self.inventory().hosts.push(host);
    }

    pub fn add_site(&self, site: Site) {
        self.inventory().sites.push(site);
    }
}

impl Store for MemoryStore {
    fn site(&self, domain: &str) -> Result<Option<Site>> {
        Ok(self.inventory().site(domain).cloned())
    }

    fn sites(&self) -> Result<Vec<Site>> {
        Ok(self.inventory().sites.clone())
    }

    fn host(&self, id: &str) -> Result<Option<TargetHost>> {
        Ok(self.inventory().host(id).cloned())
    }

    fn hosts(&self) -> Result<Vec<TargetHost>> {
        Ok(self.inventory().hosts.clone())
    }

    fn activate_credential(&self, host_id: &str, credential_id: &str) -> Result<Option<String>> {
        self.inventory()
            .host_mut(host_id)?
            .activate_credential(credential_id)
    }

    fn record(&self, domain: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self.records().get(domain).cloned())
    }

    fn save_record(&self, record: &DeploymentRecord) -> Result<()> {
        self.records().insert(record.domain.clone(), record.clone());
        Ok(())
    }
}
