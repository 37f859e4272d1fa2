use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hostforge::config::Settings;
use hostforge::deploy::Orchestrator;
use hostforge::detect::Detector;
use hostforge::ssh::{ChannelManager, SshConnector};
use hostforge::store::FileStore;

pub mod detect;
pub mod hosts;
pub mod init;
pub mod records;
pub mod render;
pub mod site;

#[derive(Parser)]
#[command(
    name = "hostforge",
    version,
    about = "Provision sites on Kubernetes, Docker Compose or plain Linux hosts"
)]
pub struct Cli {
    /// Path to hostforge.toml
    #[arg(short, long, default_value = "hostforge.toml")]
    pub config: PathBuf,

    /// Path to the host and site inventory
    #[arg(short, long, default_value = "inventory.toml")]
    pub inventory: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scaffold hostforge.toml and inventory.toml in the current directory
    Init,

    /// Classify this machine's topology and cloud provider
    Detect {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the artifacts a site would be deployed with
    Render {
        /// Site domain
        domain: String,
        /// Which generator to run (defaults to the site's topology)
        #[arg(short, long, value_enum)]
        kind: Option<RenderKind>,
        /// Render the TLS variant of a virtual host
        #[arg(long)]
        tls: bool,
        /// Write one file per artifact into this directory instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Provision a site (safe to re-run)
    Deploy {
        /// Site domain
        domain: String,
    },

    /// Re-render and re-apply a deployed site
    Update {
        /// Site domain
        domain: String,
    },

    /// Restart a site's services
    Restart {
        /// Site domain
        domain: String,
    },

    /// Tear a site down
    Delete {
        /// Site domain
        domain: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show live status of a site
    Status {
        /// Site domain
        domain: String,
    },

    /// Inspect hosts
    Hosts {
        #[command(subcommand)]
        action: HostsAction,
    },

    /// Manage host credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },

    /// Inspect deployment records
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },
}

#[derive(Subcommand)]
pub enum HostsAction {
    /// Check SSH reachability (all hosts when none is given)
    Check {
        /// Host id
        host: Option<String>,
    },
    /// List hosts and their active credentials
    List,
}

#[derive(Subcommand)]
pub enum CredentialsAction {
    /// Make a credential the only active one on its host
    Activate {
        /// Host id
        host: String,
        /// Credential id
        credential: String,
    },
}

#[derive(Subcommand)]
pub enum RecordsAction {
    /// Show a site's deployment record
    Show {
        /// Site domain
        domain: String,
        /// Number of log entries to show
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a record left mid-operation by an interrupted run as failed
    Reset {
        /// Site domain
        domain: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RenderKind {
    /// Kubernetes manifests (security objects included)
    K8s,
    /// Docker Compose definition
    Compose,
    /// nginx or Apache virtual host
    Vhost,
}

/// Settings from `path`, or defaults when the file does not exist.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if path.exists() {
        Settings::load(path)
    } else {
        tracing::debug!("{} not found, using defaults", path.display());
        Ok(Settings::default())
    }
}

pub fn open_store(settings: &Settings, inventory: &Path) -> Result<FileStore> {
    let state_dir = settings.state.dir()?;
    FileStore::open(inventory, &state_dir)
        .with_context(|| format!("Failed to open inventory {}", inventory.display()))
}

/// Wire the orchestrator the way every lifecycle command needs it.
pub fn orchestrator(settings: Settings, inventory: &Path) -> Result<Orchestrator> {
    let store = open_store(&settings, inventory)?;
    let settings = Arc::new(settings);
    let manager = Arc::new(ChannelManager::new(
        settings.ssh.clone(),
        settings.privileged.clone(),
        Arc::new(SshConnector),
    ));
    let detector = Detector::new(settings.detector.clone(), &settings.kubernetes.kubectl);
    Ok(Orchestrator::new(Arc::new(store), manager, settings, detector))
}
