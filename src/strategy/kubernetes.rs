use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{Outcome, SiteState, StatusReport, StepLog};
use crate::config::Settings;
use crate::error::Result;
use crate::model::{BackendHandles, Site};
use crate::render::{self, Bundle, SiteNames};
use crate::ssh::{ChannelManager, Command, RemoteHost};

const DEPLOYMENT: &str = "web";

/// Applies rendered manifests with `kubectl` on the target host.
pub struct KubernetesStrategy {
    manager: Arc<ChannelManager>,
    settings: Arc<Settings>,
}

impl KubernetesStrategy {
    pub fn new(manager: Arc<ChannelManager>, settings: Arc<Settings>) -> Self {
        Self { manager, settings }
    }

    fn kubectl(&self) -> Command {
        Command::new(&self.settings.kubernetes.kubectl)
    }

    fn rollout_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.kubernetes.rollout_timeout_secs)
    }

    /// Rollout waits run server-side; give the SSH command some slack on top.
    fn rollout_command_timeout(&self) -> Duration {
        self.rollout_timeout() + Duration::from_secs(30)
    }

    pub async fn provision(&self, site: &Site, target: &RemoteHost) -> Outcome {
        let mut log = StepLog::default();
        let result = self.converge(site, target, &mut log).await;
        log.finish(result)
    }

    /// Re-render and re-apply; server-side apply makes this identical to
    /// provisioning.
    pub async fn update(&self, site: &Site, target: &RemoteHost) -> Outcome {
        let mut log = StepLog::default();
        let result = self.converge(site, target, &mut log).await;
        log.finish(result)
    }

    async fn converge(&self, site: &Site, target: &RemoteHost, log: &mut StepLog) -> Result<BackendHandles> {
        let k8s = &self.settings.kubernetes;
        let names = SiteNames::for_site(site);
        let ns = names.namespace().to_string();

        let security = render::security_objects(site, k8s)?;
        let workload = render::kubernetes_manifests(site, k8s)?;
        log.step(format!(
            "Rendered {} manifests for {}",
            security.len() + workload.len(),
            site.domain
        ));

        let staging = format!("{}/{}", k8s.staging_dir.trim_end_matches('/'), ns);
        self.manager
            .run(target, &Command::new("rm").args(["-rf", &staging]))
            .await?;
        self.manager.mkdir_all(target, &staging).await?;

        let (namespace, rest): (Vec<_>, Vec<_>) = workload
            .artifacts()
            .iter()
            .cloned()
            .partition(|a| a.kind == render::ArtifactKind::Namespace);

        log.step(format!("Ensuring namespace {}", ns));
        self.apply(target, &staging, &Bundle::new(namespace), 0, log).await?;

        log.step("Applying security objects");
        self.apply(target, &staging, &security, 1, log).await?;

        log.step("Applying site resources");
        self.apply(target, &staging, &Bundle::new(rest), 1 + security.len(), log)
            .await?;

        log.step(format!("Waiting for deployment/{} to roll out", DEPLOYMENT));
        self.wait_for_rollout(target, &ns).await?;

        self.manager
            .run(target, &Command::new("rm").args(["-rf", &staging]))
            .await?;

        Ok(BackendHandles {
            namespace: Some(ns),
            deployment: Some(DEPLOYMENT.to_string()),
            ..BackendHandles::default()
        })
    }

    /// Stage each document and apply it, strictly in bundle order.
    async fn apply(
        &self,
        target: &RemoteHost,
        staging: &str,
        bundle: &Bundle,
        offset: usize,
        log: &mut StepLog,
    ) -> Result<()> {
        let k8s = &self.settings.kubernetes;
        for (i, artifact) in bundle.artifacts().iter().enumerate() {
            let path = format!("{}/{}", staging, artifact.file_name(offset + i));
            self.manager
                .write_file(target, &path, artifact.content.as_bytes(), 0o600)
                .await?;

            let apply = self.kubectl().args([
                "apply",
                "--server-side",
                "--force-conflicts",
                &format!("--field-manager={}", k8s.field_manager),
                "-f",
                &path,
            ]);
            self.manager.run(target, &apply).await?;
            log.step(format!("Applied {}/{}", artifact.kind, artifact.name));
        }
        Ok(())
    }

    async fn wait_for_rollout(&self, target: &RemoteHost, ns: &str) -> Result<()> {
        let status = self
            .kubectl()
            .args([
                "rollout",
                "status",
                &format!("deployment/{}", DEPLOYMENT),
                "-n",
                ns,
                &format!("--timeout={}s", self.rollout_timeout().as_secs()),
            ])
            .timeout(self.rollout_command_timeout());
        self.manager.run(target, &status).await?;
        Ok(())
    }

    pub async fn restart(&self, site: &Site, target: &RemoteHost, handles: &BackendHandles) -> Outcome {
        let mut log = StepLog::default();
        let ns = namespace_of(site, handles);
        let result: Result<BackendHandles> = async {
            log.step(format!("Restarting deployment/{} in {}", DEPLOYMENT, ns));
            let restart = self.kubectl().args([
                "rollout",
                "restart",
                &format!("deployment/{}", DEPLOYMENT),
                "-n",
                &ns,
            ]);
            self.manager.run(target, &restart).await?;

            log.step("Waiting for rollout");
            self.wait_for_rollout(target, &ns).await?;
            Ok(handles.clone())
        }
        .await;
        log.finish(result)
    }

    pub async fn delete(&self, site: &Site, target: &RemoteHost, handles: &BackendHandles) -> Outcome {
        let mut log = StepLog::default();
        let ns = namespace_of(site, handles);
        let result: Result<BackendHandles> = async {
            log.step(format!("Deleting namespace {}", ns));
            let delete = self
                .kubectl()
                .args([
                    "delete",
                    "namespace",
                    &ns,
                    "--ignore-not-found",
                    "--wait=true",
                    &format!("--timeout={}s", self.rollout_timeout().as_secs()),
                ])
                .timeout(self.rollout_command_timeout());
            self.manager.run(target, &delete).await?;
            Ok(BackendHandles::default())
        }
        .await;
        log.finish(result)
    }

    /// `running` when at least one pod in the namespace is Running.
    pub async fn status(&self, site: &Site, target: &RemoteHost, handles: &BackendHandles) -> StatusReport {
        let ns = namespace_of(site, handles);
        let get = self.kubectl().args(["get", "pods", "-n", &ns, "-o", "json"]);
        let stdout = match self.manager.run(target, &get).await {
            Ok(stdout) => stdout,
            Err(e) => return StatusReport::unknown(e),
        };
        let pods: Value = match serde_json::from_str(&stdout) {
            Ok(pods) => pods,
            Err(e) => return StatusReport::unknown(format!("unreadable pod list: {}", e)),
        };

        let phases: Vec<&str> = pods
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|p| p.pointer("/status/phase").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        let running = phases.iter().filter(|p| **p == "Running").count();
        let detail = format!("{}/{} pod(s) running in {}", running, phases.len(), ns);

        if running > 0 {
            StatusReport::new(SiteState::Running, detail)
        } else {
            StatusReport::new(SiteState::Stopped, detail)
        }
    }
}

fn namespace_of(site: &Site, handles: &BackendHandles) -> String {
    handles
        .namespace
        .clone()
        .unwrap_or_else(|| SiteNames::for_site(site).slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::fixture;

    fn ssl_site() -> Site {
        let mut site = Site::new("example.com", "web1");
        site.ssl = true;
        site
    }

    #[tokio::test]
    async fn provision_applies_in_order_with_server_side_apply() {
        let (remote, manager, settings, target) = fixture();
        let strategy = KubernetesStrategy::new(manager, settings);

        let outcome = strategy.provision(&ssl_site(), &target).await;
        assert!(outcome.success, "{:?}", outcome.log);

        let applies: Vec<String> = remote
            .commands()
            .into_iter()
            .filter(|c| c.contains("kubectl apply"))
            .collect();
        assert!(applies.iter().all(|c| c.contains("--server-side")
            && c.contains("--field-manager=hostforge")));

        let position = |needle: &str| applies.iter().position(|c| c.contains(needle)).unwrap();
        assert_eq!(position("-namespace-"), 0);
        assert!(position("-networkpolicy-") < position("-secret-site-env"));
        assert!(position("-secret-site-env") < position("-configmap-web-config"));
        assert!(position("-configmap-web-config") < position("-persistentvolumeclaim-content"));
        assert!(position("-persistentvolumeclaim-content") < position("-deployment-web"));
        assert!(position("-deployment-web") < position("-service-web"));
        assert!(position("-service-web") < position("-ingress-web"));
        assert!(remote.ran("kubectl rollout status deployment/web"));

        let handles = outcome.handles.unwrap();
        assert_eq!(handles.namespace, Some(SiteNames::for_site(&ssl_site()).slug));
        assert_eq!(handles.deployment.as_deref(), Some("web"));
    }

    #[tokio::test]
    async fn staged_ingress_carries_tls() {
        let (remote, manager, settings, target) = fixture();
        let strategy = KubernetesStrategy::new(manager, settings);
        strategy.provision(&ssl_site(), &target).await;

        let uploads: Vec<String> = remote
            .commands()
            .into_iter()
            .filter(|c| c.starts_with("<upload") && c.contains("-ingress-web.yaml"))
            .collect();
        assert_eq!(uploads.len(), 1);
    }

    #[tokio::test]
    async fn failed_apply_stops_the_sequence() {
        let (remote, manager, settings, target) = fixture();
        remote.respond_full("-secret-", 1, "", "admission webhook denied");
        let strategy = KubernetesStrategy::new(manager, settings);

        let outcome = strategy.provision(&ssl_site(), &target).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("admission webhook denied"));
        assert!(!remote.ran("-deployment-web.yaml"));
    }

    #[tokio::test]
    async fn status_counts_running_pods() {
        let (remote, manager, settings, target) = fixture();
        remote.respond(
            "kubectl get pods",
            0,
            r#"{"items":[{"status":{"phase":"Running"}},{"status":{"phase":"Pending"}}]}"#,
        );
        let strategy = KubernetesStrategy::new(manager, settings);
        let report = strategy
            .status(&ssl_site(), &target, &BackendHandles::default())
            .await;
        assert_eq!(report.state, SiteState::Running);
        assert!(report.detail.starts_with("1/2"));
    }

    #[tokio::test]
    async fn status_without_running_pods_is_stopped() {
        let (remote, manager, settings, target) = fixture();
        remote.respond("kubectl get pods", 0, r#"{"items":[]}"#);
        let strategy = KubernetesStrategy::new(manager, settings);
        let report = strategy
            .status(&ssl_site(), &target, &BackendHandles::default())
            .await;
        assert_eq!(report.state, SiteState::Stopped);
    }

    #[tokio::test]
    async fn restart_and_delete_use_recorded_namespace() {
        let (remote, manager, settings, target) = fixture();
        let strategy = KubernetesStrategy::new(manager, settings);
        let handles = BackendHandles {
            namespace: Some("legacy-ns".into()),
            deployment: Some("web".into()),
            ..BackendHandles::default()
        };

        assert!(strategy.restart(&ssl_site(), &target, &handles).await.success);
        assert!(remote.ran("kubectl rollout restart deployment/web -n legacy-ns"));

        let outcome = strategy.delete(&ssl_site(), &target, &handles).await;
        assert!(outcome.success);
        assert!(remote.ran("kubectl delete namespace legacy-ns --ignore-not-found"));
        assert_eq!(outcome.handles, Some(BackendHandles::default()));
    }
}
