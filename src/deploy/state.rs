use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{BackendHandles, Topology};

/// Oldest entries are dropped beyond this many.
const MAX_LOG_ENTRIES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    Pending,
    Provisioning,
    Active,
    Updating,
    Restarting,
    Failed,
    Deleting,
    Deleted,
}

impl DeploymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::Pending => "pending",
            DeploymentState::Provisioning => "provisioning",
            DeploymentState::Active => "active",
            DeploymentState::Updating => "updating",
            DeploymentState::Restarting => "restarting",
            DeploymentState::Failed => "failed",
            DeploymentState::Deleting => "deleting",
            DeploymentState::Deleted => "deleted",
        }
    }

    pub fn can_transition_to(self, to: DeploymentState) -> bool {
        use DeploymentState::*;
        matches!(
            (self, to),
            (Pending | Failed | Active | Deleted, Provisioning)
                | (Provisioning, Active | Failed)
                | (Active | Failed, Updating)
                | (Updating, Active | Failed)
                | (Active, Restarting)
                | (Restarting, Active | Failed)
                | (Active | Failed, Deleting)
                | (Deleting, Deleted | Failed)
        )
    }

    /// An operation is running (or was interrupted while running).
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            DeploymentState::Provisioning
                | DeploymentState::Updating
                | DeploymentState::Restarting
                | DeploymentState::Deleting
        )
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Authoritative lifecycle state of one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub domain: String,
    pub state: DeploymentState,
    /// Topology of the last provisioning; later operations reuse it.
    pub topology: Option<Topology>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    /// Entries ever appended, including ones since dropped from `log`.
    #[serde(default)]
    pub appended: u64,
    pub last_error: Option<String>,
    #[serde(default)]
    pub handles: BackendHandles,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn new(domain: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            domain: domain.into(),
            state: DeploymentState::Pending,
            topology: None,
            log: Vec::new(),
            appended: 0,
            last_error: None,
            handles: BackendHandles::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, logging the edge. Edges outside the lifecycle graph are
    /// rejected and leave the record untouched.
    pub fn transition(&mut self, to: DeploymentState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                domain: self.domain.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        info!("{}: {} -> {}", self.domain, self.state, to);
        let edge = format!("{} -> {}", self.state, to);
        self.state = to;
        self.append(edge);
        Ok(())
    }

    /// Settle a record stranded in an in-flight state (the process died
    /// before the outcome was saved) as `failed`, so it can be retried.
    pub fn mark_interrupted(&mut self) -> Result<()> {
        if !self.state.is_in_flight() {
            return Err(Error::Validation(format!(
                "{} is {}; only an interrupted operation can be reset",
                self.domain, self.state
            )));
        }
        let interrupted = self.state;
        self.transition(DeploymentState::Failed)?;
        self.last_error = Some(format!("interrupted while {}", interrupted));
        self.append(format!("reset after an interrupted {} run", interrupted));
        Ok(())
    }

    pub fn append(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.log.push(LogEntry {
            at: now,
            message: message.into(),
        });
        self.appended += 1;
        if self.log.len() > MAX_LOG_ENTRIES {
            let excess = self.log.len() - MAX_LOG_ENTRIES;
            self.log.drain(..excess);
        }
        self.updated_at = now;
    }

    pub fn extend<I, S>(&mut self, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for message in messages {
            self.append(message);
        }
    }

    /// Entries appended after the record had seen `appended_before` of them.
    /// Entries already dropped from the bounded log are not returned.
    pub fn entries_since(&self, appended_before: u64) -> &[LogEntry] {
        let new = self.appended.saturating_sub(appended_before);
        let new = usize::try_from(new).unwrap_or(usize::MAX).min(self.log.len());
        &self.log[self.log.len() - new..]
    }

    /// Most recent `n` log messages, oldest first.
    pub fn tail(&self, n: usize) -> Vec<&str> {
        let start = self.log.len().saturating_sub(n);
        self.log[start..].iter().map(|e| e.message.as_str()).collect()
    }

    /// The sequence of states this record passed through, read back from
    /// its log.
    pub fn history(&self) -> Vec<&str> {
        let mut states = Vec::new();
        for entry in &self.log {
            if let Some((from, to)) = entry.message.split_once(" -> ") {
                if states.is_empty() {
                    states.push(from);
                }
                states.push(to);
            }
        }
        states
    }
}
