//! Backend-specific site lifecycles behind one closed enum.

mod compose;
mod kubernetes;
mod standalone;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::model::{BackendHandles, Site, Topology};
use crate::ssh::{ChannelManager, RemoteHost};

pub use compose::ComposeStrategy;
pub use kubernetes::KubernetesStrategy;
pub use standalone::StandaloneStrategy;

/// Result of one lifecycle operation. Strategies never return errors; every
/// failure is folded into `success: false` plus the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    /// Ordered record of the steps taken.
    pub log: Vec<String>,
    /// Handles to persist. `None` leaves the stored handles untouched.
    pub handles: Option<BackendHandles>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteState {
    Running,
    /// Some tracked components run, others don't.
    Degraded,
    Stopped,
    Unknown,
}

impl fmt::Display for SiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SiteState::Running => "running",
            SiteState::Degraded => "degraded",
            SiteState::Stopped => "stopped",
            SiteState::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: SiteState,
    pub detail: String,
}

impl StatusReport {
    fn new(state: SiteState, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: detail.into(),
        }
    }

    fn unknown(err: impl fmt::Display) -> Self {
        Self::new(SiteState::Unknown, err.to_string())
    }
}

/// Step log shared by every strategy operation.
#[derive(Debug, Default)]
struct StepLog {
    entries: Vec<String>,
}

impl StepLog {
    fn step(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        info!("{}", msg);
        self.entries.push(msg);
    }

    fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("{}", msg);
        self.entries.push(format!("warning: {}", msg));
    }

    fn finish(mut self, result: Result<BackendHandles>) -> Outcome {
        match result {
            Ok(handles) => Outcome {
                success: true,
                log: self.entries,
                handles: Some(handles),
                error: None,
            },
            Err(e) => {
                let error = e.to_string();
                self.entries.push(format!("failed: {}", error));
                Outcome {
                    success: false,
                    log: self.entries,
                    handles: None,
                    error: Some(error),
                }
            }
        }
    }
}

/// One lifecycle implementation per topology, selected once per attempt.
pub enum Strategy {
    Kubernetes(KubernetesStrategy),
    Compose(ComposeStrategy),
    Standalone(StandaloneStrategy),
}

impl Strategy {
    pub fn for_topology(
        topology: Topology,
        manager: Arc<ChannelManager>,
        settings: Arc<Settings>,
    ) -> Self {
        match topology {
            Topology::Kubernetes => Strategy::Kubernetes(KubernetesStrategy::new(manager, settings)),
            Topology::ContainerHost => Strategy::Compose(ComposeStrategy::new(manager, settings)),
            Topology::Standalone => Strategy::Standalone(StandaloneStrategy::new(manager, settings)),
        }
    }

    pub fn topology(&self) -> Topology {
        match self {
            Strategy::Kubernetes(_) => Topology::Kubernetes,
            Strategy::Compose(_) => Topology::ContainerHost,
            Strategy::Standalone(_) => Topology::Standalone,
        }
    }

    pub async fn provision(&self, site: &Site, target: &RemoteHost) -> Outcome {
        match self {
            Strategy::Kubernetes(s) => s.provision(site, target).await,
            Strategy::Compose(s) => s.provision(site, target).await,
            Strategy::Standalone(s) => s.provision(site, target).await,
        }
    }

    pub async fn update(&self, site: &Site, target: &RemoteHost) -> Outcome {
        match self {
            Strategy::Kubernetes(s) => s.update(site, target).await,
            Strategy::Compose(s) => s.update(site, target).await,
            Strategy::Standalone(s) => s.update(site, target).await,
        }
    }

    pub async fn restart(&self, site: &Site, target: &RemoteHost, handles: &BackendHandles) -> Outcome {
        match self {
            Strategy::Kubernetes(s) => s.restart(site, target, handles).await,
            Strategy::Compose(s) => s.restart(site, target, handles).await,
            Strategy::Standalone(s) => s.restart(site, target).await,
        }
    }

    pub async fn delete(&self, site: &Site, target: &RemoteHost, handles: &BackendHandles) -> Outcome {
        match self {
            Strategy::Kubernetes(s) => s.delete(site, target, handles).await,
            Strategy::Compose(s) => s.delete(site, target, handles).await,
            Strategy::Standalone(s) => s.delete(site, target, handles).await,
        }
    }

    pub async fn status(
        &self,
        site: &Site,
        target: &RemoteHost,
        handles: &BackendHandles,
    ) -> StatusReport {
        match self {
            Strategy::Kubernetes(s) => s.status(site, target, handles).await,
            Strategy::Compose(s) => s.status(site, target, handles).await,
            Strategy::Standalone(s) => s.status(site, target, handles).await,
        }
    }
}
