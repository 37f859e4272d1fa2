//! Drives each site through its lifecycle and keeps the deployment record
//! in step with what the backend reported.

mod state;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Settings;
use crate::detect::Detector;
use crate::error::{Error, Result};
use crate::model::{Site, TargetHost, Topology};
use crate::ssh::{ChannelManager, RemoteHost};
use crate::store::Store;
use crate::strategy::{Outcome, SiteState, StatusReport, Strategy};

pub use state::{DeploymentRecord, DeploymentState, LogEntry};

/// The normalized answer every lifecycle call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub success: bool,
    pub message: String,
}

impl Report {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Provision,
    Update,
    Restart,
    Delete,
}

impl Operation {
    /// The transient state and the state a success lands in.
    fn states(self) -> (DeploymentState, DeploymentState) {
        match self {
            Operation::Provision => (DeploymentState::Provisioning, DeploymentState::Active),
            Operation::Update => (DeploymentState::Updating, DeploymentState::Active),
            Operation::Restart => (DeploymentState::Restarting, DeploymentState::Active),
            Operation::Delete => (DeploymentState::Deleting, DeploymentState::Deleted),
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Operation::Provision => "provision",
            Operation::Update => "update",
            Operation::Restart => "restart",
            Operation::Delete => "delete",
        }
    }
}

/// Everything one operation needs, loaded up front.
struct Plan {
    site: Site,
    target: RemoteHost,
    record: DeploymentRecord,
    topology: Topology,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    manager: Arc<ChannelManager>,
    settings: Arc<Settings>,
    detector: Detector,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        manager: Arc<ChannelManager>,
        settings: Arc<Settings>,
        detector: Detector,
    ) -> Self {
        Self {
            store,
            manager,
            settings,
            detector,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn manager(&self) -> &Arc<ChannelManager> {
        &self.manager
    }

    /// Explicit site override, then the host's tag, then live detection.
    pub async fn resolve_topology(&self, site: &Site, host: &TargetHost) -> Topology {
        if let Some(topology) = site.topology {
            return topology;
        }
        if let Some(topology) = host.topology {
            return topology;
        }
        self.detector.detect_topology().await
    }

    fn strategy(&self, topology: Topology) -> Strategy {
        Strategy::for_topology(topology, Arc::clone(&self.manager), Arc::clone(&self.settings))
    }

    /// Missing site or host data is the only hard error.
    async fn plan(&self, domain: &str, fresh_topology: bool) -> Result<Plan> {
        let site = self
            .store
            .site(domain)?
            .ok_or_else(|| Error::NotFound(format!("site '{}'", domain)))?;
        let host = self
            .store
            .host(&site.host)?
            .ok_or_else(|| Error::NotFound(format!("host '{}' of site '{}'", site.host, domain)))?;
        let target = RemoteHost::from_host(&host)?;
        let record = self
            .store
            .record(domain)?
            .unwrap_or_else(|| DeploymentRecord::new(domain));

        // Provisioning may switch topology; later operations act on what was
        // actually provisioned.
        let topology = match record.topology {
            Some(recorded) if !fresh_topology => recorded,
            _ => self.resolve_topology(&site, &host).await,
        };

        Ok(Plan {
            site,
            target,
            record,
            topology,
        })
    }

    pub async fn deploy(&self, domain: &str) -> Result<Report> {
        self.run(domain, Operation::Provision).await
    }

    pub async fn update(&self, domain: &str) -> Result<Report> {
        self.run(domain, Operation::Update).await
    }

    pub async fn restart(&self, domain: &str) -> Result<Report> {
        self.run(domain, Operation::Restart).await
    }

    pub async fn delete(&self, domain: &str) -> Result<Report> {
        self.run(domain, Operation::Delete).await
    }

    async fn run(&self, domain: &str, op: Operation) -> Result<Report> {
        let Plan {
            site,
            target,
            mut record,
            topology,
        } = self.plan(domain, op == Operation::Provision).await?;
        let (transient, settled) = op.states();

        if let Err(e) = record.transition(transient) {
            warn!("Refusing to {} {}: {}", op.verb(), domain, e);
            if record.state.is_in_flight() {
                return Ok(Report::failed(format!(
                    "{}; if no other run is working on it, reset the record and retry",
                    e
                )));
            }
            return Ok(Report::failed(e.to_string()));
        }
        record.append(format!("{} on {} via {}", op.verb(), site.host, topology));
        self.store.save_record(&record)?;

        let strategy = self.strategy(topology);
        let outcome = match op {
            Operation::Provision => strategy.provision(&site, &target).await,
            Operation::Update => strategy.update(&site, &target).await,
            Operation::Restart => strategy.restart(&site, &target, &record.handles).await,
            Operation::Delete => strategy.delete(&site, &target, &record.handles).await,
        };

        let report = Self::settle(&mut record, topology, settled, outcome)?;
        self.store.save_record(&record)?;
        Ok(report)
    }

    /// Fold a strategy outcome into the record: success moves to `settled`,
    /// anything else to `failed`.
    fn settle(
        record: &mut DeploymentRecord,
        topology: Topology,
        settled: DeploymentState,
        outcome: Outcome,
    ) -> Result<Report> {
        let Outcome {
            success,
            log,
            handles,
            error,
        } = outcome;
        record.extend(log);

        if success {
            if let Some(handles) = handles {
                record.handles = handles;
            }
            record.topology = match settled {
                DeploymentState::Deleted => None,
                _ => Some(topology),
            };
            record.last_error = None;
            record.transition(settled)?;
            info!("{} is {}", record.domain, record.state);
            Ok(Report::ok(format!("{} is {} on {}", record.domain, record.state, topology)))
        } else {
            let error = error.unwrap_or_else(|| "operation failed".to_string());
            record.last_error = Some(error.clone());
            record.transition(DeploymentState::Failed)?;
            warn!("{} failed: {}", record.domain, error);
            Ok(Report::failed(format!("{} failed: {}", record.domain, error)))
        }
    }

    /// Live backend state. Sites never provisioned, or deleted, report
    /// `stopped` without touching the host.
    pub async fn status(&self, domain: &str) -> Result<StatusReport> {
        let Plan {
            site,
            target,
            record,
            topology,
        } = self.plan(domain, false).await?;

        match record.state {
            DeploymentState::Pending | DeploymentState::Deleted => Ok(StatusReport {
                state: SiteState::Stopped,
                detail: format!("{} is {}", domain, record.state),
            }),
            _ => Ok(self
                .strategy(topology)
                .status(&site, &target, &record.handles)
                .await),
        }
    }

    pub async fn record(&self, domain: &str) -> Result<Option<DeploymentRecord>> {
        self.store.record(domain)
    }

    /// Move a record stranded mid-operation to `failed` so deploy, update
    /// and delete accept it again. Nothing on the host is touched.
    pub async fn reset(&self, domain: &str) -> Result<Report> {
        let mut record = self
            .store
            .record(domain)?
            .ok_or_else(|| Error::NotFound(format!("deployment record for '{}'", domain)))?;

        match record.mark_interrupted() {
            Ok(()) => {
                self.store.save_record(&record)?;
                warn!("{} reset to failed after an interrupted run", domain);
                Ok(Report::ok(format!("{} is {}; it can be retried", domain, record.state)))
            }
            Err(e) => Ok(Report::failed(e.to_string())),
        }
    }

    /// Switch a host to another credential and drop pooled connections
    /// opened with the old one.
    pub async fn activate_credential(&self, host_id: &str, credential_id: &str) -> Result<Option<String>> {
        let previous = self.store.activate_credential(host_id, credential_id)?;
        self.manager.invalidate_credential(host_id, credential_id).await;
        Ok(previous)
    }

    /// Reachability of every host in the inventory, checked concurrently.
    pub async fn check_hosts(&self, only: Option<&str>) -> Result<Vec<(String, bool)>> {
        let hosts: Vec<TargetHost> = self
            .store
            .hosts()?
            .into_iter()
            .filter(|h| only.map_or(true, |id| h.id == id))
            .collect();
        if let Some(id) = only {
            if hosts.is_empty() {
                return Err(Error::NotFound(format!("host '{}'", id)));
            }
        }

        let checks = hosts.iter().map(|host| async move {
            let reachable = match RemoteHost::from_host(host) {
                Ok(target) => self.manager.test_reachability(&target).await,
                Err(e) => {
                    warn!("{}: {}", host.id, e);
                    false
                }
            };
            (host.id.clone(), reachable)
        });
        Ok(futures::future::join_all(checks).await)
    }
}
