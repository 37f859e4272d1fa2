//! Classify the local installation: which topology it runs on and, best
//! effort, which cloud it runs in.

mod cloud;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::DetectorSettings;
use crate::model::{CloudProvider, Topology};

const SERVICE_ACCOUNT_DIR: &str = "var/run/secrets/kubernetes.io/serviceaccount";
const CONTAINER_MARKERS: &[&str] = &[".dockerenv", "run/.containerenv"];
const CGROUP_FILE: &str = "proc/1/cgroup";
const CGROUP_KEYWORDS: &[&str] = &["docker", "containerd", "kubepods", "lxc", "podman"];
const CONTAINER_OVERRIDE: &str = "HOSTFORGE_CONTAINER";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub topology: Topology,
    pub cloud: CloudProvider,
}

/// Reads marker files under a configurable root and an environment snapshot
/// taken at construction. Never fails; missing signals fall through.
pub struct Detector {
    settings: DetectorSettings,
    env: HashMap<String, String>,
    kubectl: Option<PathBuf>,
}

impl Detector {
    /// Snapshot the process environment and locate `kubectl` on `PATH`.
    pub fn new(settings: DetectorSettings, kubectl: &str) -> Self {
        Self {
            settings,
            env: std::env::vars().collect(),
            kubectl: which::which(kubectl).ok(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_kubectl(mut self, kubectl: Option<PathBuf>) -> Self {
        self.kubectl = kubectl;
        self
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.settings.root.join(relative)
    }

    fn env_set(&self, name: &str) -> bool {
        self.env.get(name).is_some_and(|v| !v.is_empty())
    }

    pub async fn detect(&self) -> Detection {
        let topology = self.detect_topology().await;
        let cloud = self.detect_cloud_provider(topology).await;
        info!("Detected topology {} on {}", topology, cloud);
        Detection { topology, cloud }
    }

    pub async fn detect_topology(&self) -> Topology {
        if self.kubernetes_signals().await {
            return Topology::Kubernetes;
        }
        if self.container_signals() {
            return Topology::ContainerHost;
        }
        Topology::Standalone
    }

    async fn kubernetes_signals(&self) -> bool {
        if self.path(SERVICE_ACCOUNT_DIR).is_dir() {
            debug!("Found Kubernetes service account directory");
            return true;
        }
        if self.env_set("KUBERNETES_SERVICE_HOST") {
            debug!("KUBERNETES_SERVICE_HOST is set");
            return true;
        }
        match &self.kubectl {
            Some(kubectl) => self.run_kubectl(kubectl, &["cluster-info"]).await.is_some(),
            None => false,
        }
    }

    fn container_signals(&self) -> bool {
        if CONTAINER_MARKERS.iter().any(|m| self.path(m).exists()) {
            debug!("Found container marker file");
            return true;
        }
        if self.env.get(CONTAINER_OVERRIDE).map(String::as_str) == Some("1") {
            debug!("{}=1", CONTAINER_OVERRIDE);
            return true;
        }
        cgroup_mentions_container(&self.path(CGROUP_FILE))
    }

    /// Best effort: node metadata (in a cluster), then instance metadata
    /// endpoints, then environment hints.
    pub async fn detect_cloud_provider(&self, topology: Topology) -> CloudProvider {
        if topology == Topology::Kubernetes {
            if let Some(provider) = self.provider_from_cluster().await {
                return provider;
            }
        }

        if self.settings.probe_metadata {
            if let Some(provider) = cloud::query_metadata(self.settings.metadata_timeout()).await {
                return provider;
            }
        }

        if let Some(provider) = cloud::provider_from_env(&self.env) {
            return provider;
        }

        match topology {
            Topology::Kubernetes | Topology::ContainerHost => CloudProvider::OnPremise,
            Topology::Standalone => CloudProvider::Unknown,
        }
    }

    async fn provider_from_cluster(&self) -> Option<CloudProvider> {
        let kubectl = self.kubectl.as_ref()?;
        let stdout = self.run_kubectl(kubectl, &["get", "nodes", "-o", "json"]).await?;
        let nodes: serde_json::Value = serde_json::from_slice(&stdout).ok()?;
        cloud::provider_from_nodes(&nodes)
    }

    /// Run a local kubectl command bounded by the probe timeout, returning
    /// stdout on success.
    async fn run_kubectl(&self, kubectl: &Path, args: &[&str]) -> Option<Vec<u8>> {
        let mut command = Command::new(kubectl);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.settings.probe_timeout(), command.output()).await {
            Ok(Ok(output)) if output.status.success() => Some(output.stdout),
            Ok(Ok(output)) => {
                debug!("kubectl {} exited with {}", args.join(" "), output.status);
                None
            }
            Ok(Err(e)) => {
                debug!("kubectl {} failed: {}", args.join(" "), e);
                None
            }
            Err(_) => {
                debug!("kubectl {} timed out", args.join(" "));
                None
            }
        }
    }
}

fn cgroup_mentions_container(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(content) => CGROUP_KEYWORDS.iter().any(|k| content.contains(k)),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn detector(root: &TempDir, env: &[(&str, &str)]) -> Detector {
        let settings = DetectorSettings {
            root: root.path().to_path_buf(),
            probe_metadata: false,
            ..DetectorSettings::default()
        };
        let env = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Detector::new(settings, "kubectl")
            .with_env(env)
            .with_kubectl(None)
    }

    fn touch(root: &TempDir, relative: &str) {
        let path = root.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "").unwrap();
    }

    #[tokio::test]
    async fn kubernetes_outranks_docker_markers() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join(SERVICE_ACCOUNT_DIR)).unwrap();
        touch(&root, ".dockerenv");

        let d = detector(&root, &[]);
        assert_eq!(d.detect_topology().await, Topology::Kubernetes);
    }

    #[tokio::test]
    async fn service_host_env_means_kubernetes() {
        let root = TempDir::new().unwrap();
        let d = detector(&root, &[("KUBERNETES_SERVICE_HOST", "10.0.0.1")]);
        assert_eq!(d.detect_topology().await, Topology::Kubernetes);
    }

    #[tokio::test]
    async fn container_markers() {
        let root = TempDir::new().unwrap();
        touch(&root, "run/.containerenv");
        assert_eq!(detector(&root, &[]).detect_topology().await, Topology::ContainerHost);

        let root = TempDir::new().unwrap();
        let d = detector(&root, &[("HOSTFORGE_CONTAINER", "1")]);
        assert_eq!(d.detect_topology().await, Topology::ContainerHost);
    }

    #[tokio::test]
    async fn cgroup_keywords_mean_container() {
        let root = TempDir::new().unwrap();
        let cgroup = root.path().join(CGROUP_FILE);
        fs::create_dir_all(cgroup.parent().unwrap()).unwrap();
        fs::write(&cgroup, "0::/system.slice/containerd.service\n").unwrap();
        assert_eq!(detector(&root, &[]).detect_topology().await, Topology::ContainerHost);

        fs::write(&cgroup, "0::/init.scope\n").unwrap();
        assert_eq!(detector(&root, &[]).detect_topology().await, Topology::Standalone);
    }

    #[tokio::test]
    async fn bare_root_is_standalone_and_unknown() {
        let root = TempDir::new().unwrap();
        let detection = detector(&root, &[]).detect().await;
        assert_eq!(detection.topology, Topology::Standalone);
        assert_eq!(detection.cloud, CloudProvider::Unknown);
    }

    #[tokio::test]
    async fn cloud_falls_back_to_on_premise_inside_containers() {
        let root = TempDir::new().unwrap();
        touch(&root, ".dockerenv");
        let detection = detector(&root, &[]).detect().await;
        assert_eq!(detection.topology, Topology::ContainerHost);
        assert_eq!(detection.cloud, CloudProvider::OnPremise);
    }

    #[tokio::test]
    async fn env_hint_identifies_cloud() {
        let root = TempDir::new().unwrap();
        let d = detector(&root, &[("GOOGLE_CLOUD_PROJECT", "my-project")]);
        assert_eq!(d.detect_cloud_provider(Topology::Standalone).await, CloudProvider::Gcp);
    }
}
