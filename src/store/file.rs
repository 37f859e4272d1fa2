use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{Inventory, Store};
use crate::deploy::DeploymentRecord;
use crate::error::{Error, Result};
use crate::model::{Site, TargetHost};
use crate::render::validate_domain;

/// `inventory.toml` for sites and hosts, one pretty-printed JSON file per
/// site under `{state_dir}/records` for deployment records.
pub struct FileStore {
    inventory_path: PathBuf,
    records_dir: PathBuf,
    inventory: Mutex<Inventory>,
}

impl FileStore {
    pub fn open(inventory_path: impl Into<PathBuf>, state_dir: impl AsRef<Path>) -> Result<Self> {
        let inventory_path = inventory_path.into();
        let content = fs::read_to_string(&inventory_path).map_err(|e| {
            Error::Store(format!(
                "cannot read inventory {}: {}",
                inventory_path.display(),
                e
            ))
        })?;
        let inventory = Inventory::from_toml(&content)?;

        let records_dir = state_dir.as_ref().join("records");
        fs::create_dir_all(&records_dir)?;

        Ok(Self {
            inventory_path,
            records_dir,
            inventory: Mutex::new(inventory),
        })
    }

    fn inventory(&self) -> MutexGuard<'_, Inventory> {
        self.inventory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_path(&self, domain: &str) -> Result<PathBuf> {
        // Domains become file names; only well-formed ones get that far.
        validate_domain(domain)?;
        Ok(self.records_dir.join(format!("{}.json", domain)))
    }
}

/// Write via a temp file in the same directory and rename over the target,
/// so readers never see a half-written file.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Store(format!("{} has no parent directory", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

impl Store for FileStore {
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

    /// Updates memory and disk under one lock; on a failed write the
    /// in-memory inventory is left as it was.
    fn activate_credential(&self, host_id: &str, credential_id: &str) -> Result<Option<String>> {
        let mut inventory = self.inventory();
        let mut updated = inventory.clone();
        let previous = updated.host_mut(host_id)?.activate_credential(credential_id)?;

        write_atomic(&self.inventory_path, updated.to_toml()?.as_bytes())?;
        *inventory = updated;
        debug!(
            "Activated credential {} on {} in {}",
            credential_id,
            host_id,
            self.inventory_path.display()
        );
        Ok(previous)
    }

    fn record(&self, domain: &str) -> Result<Option<DeploymentRecord>> {
        let path = self.record_path(domain)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let record = serde_json::from_str(&content)
            .map_err(|e| Error::Store(format!("corrupt record {}: {}", path.display(), e)))?;
        Ok(Some(record))
    }

    fn save_record(&self, record: &DeploymentRecord) -> Result<()> {
        let path = self.record_path(&record.domain)?;
        let content = serde_json::to_string_pretty(record)?;
        write_atomic(&path, content.as_bytes())?;
        debug!("Saved record {} ({})", path.display(), record.state);
        Ok(())
    }
}
