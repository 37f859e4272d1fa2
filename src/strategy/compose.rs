use std::sync::Arc;

use super::{Outcome, SiteState, StatusReport, StepLog};
use crate::config::Settings;
use crate::error::Result;
use crate::model::{BackendHandles, Site};
use crate::render::{self, SiteNames};
use crate::ssh::{ChannelManager, Command, RemoteHost};

const COMPOSE_FILE: &str = "docker-compose.yml";
const NGINX_CONF: &str = "nginx.conf";

/// Runs each site as a Compose project on a Docker host.
pub struct ComposeStrategy {
    manager: Arc<ChannelManager>,
    settings: Arc<Settings>,
}

impl ComposeStrategy {
    pub fn new(manager: Arc<ChannelManager>, settings: Arc<Settings>) -> Self {
        Self { manager, settings }
    }

    fn project_dir(&self, project: &str) -> String {
        format!(
            "{}/{}",
            self.settings.compose.projects_dir.trim_end_matches('/'),
            project
        )
    }

    fn compose(&self, project: &str) -> Command {
        Command::new("docker")
            .args(["compose", "-p", project])
            .current_dir(self.project_dir(project))
    }

    pub async fn provision(&self, site: &Site, target: &RemoteHost) -> Outcome {
        let mut log = StepLog::default();
        let result = self.converge(site, target, &mut log).await;
        log.finish(result)
    }

    pub async fn update(&self, site: &Site, target: &RemoteHost) -> Outcome {
        let mut log = StepLog::default();
        let result = self.converge(site, target, &mut log).await;
        log.finish(result)
    }

    async fn converge(&self, site: &Site, target: &RemoteHost, log: &mut StepLog) -> Result<BackendHandles> {
        let settings = &self.settings.compose;
        let names = SiteNames::for_site(site);
        let project = &names.compose_project;

        let definition = render::compose_definition(site, settings)?;
        let web_config = render::nginx_pod_config(site, "php:9000")?;
        log.step(format!("Rendered Compose project {}", project));

        let inspect = Command::new("docker").args(["network", "inspect", &names.network]);
        if self.manager.run_ok(target, &inspect).await? {
            log.step(format!("Network {} exists", names.network));
        } else {
            let create = Command::new("docker").args(["network", "create", &names.network]);
            self.manager.run(target, &create).await?;
            log.step(format!("Created network {}", names.network));
        }

        let dir = self.project_dir(project);
        self.manager.mkdir_all(target, &dir).await?;
        self.manager
            .write_file(target, &format!("{}/{}", dir, COMPOSE_FILE), definition.as_bytes(), 0o600)
            .await?;
        self.manager
            .write_file(target, &format!("{}/{}", dir, NGINX_CONF), web_config.as_bytes(), 0o644)
            .await?;
        log.step(format!("Wrote {}/{}", dir, COMPOSE_FILE));

        let up = self
            .compose(project)
            .args(["-f", COMPOSE_FILE, "up", "-d", "--remove-orphans"]);
        self.manager.run(target, &up).await?;
        log.step(format!("Started project {}", project));

        let containers = render::compose_services(site, settings)
            .into_iter()
            .map(|s| s.container_name)
            .collect::<Vec<_>>();
        for container in &containers {
            log.step(format!("Tracking container {}", container));
        }

        Ok(BackendHandles {
            compose_project: Some(project.clone()),
            network: Some(names.network.clone()),
            containers,
            ..BackendHandles::default()
        })
    }

    pub async fn restart(&self, site: &Site, target: &RemoteHost, handles: &BackendHandles) -> Outcome {
        let mut log = StepLog::default();
        let project = project_of(site, handles);
        let result: Result<BackendHandles> = async {
            let restart = self.compose(&project).args(["-f", COMPOSE_FILE, "restart"]);
            self.manager.run(target, &restart).await?;
            log.step(format!("Restarted project {}", project));
            Ok(handles.clone())
        }
        .await;
        log.finish(result)
    }

    /// Tear the project down with its volumes, remove the network and the
    /// project directory, and clear every tracked container.
    pub async fn delete(&self, site: &Site, target: &RemoteHost, handles: &BackendHandles) -> Outcome {
        let mut log = StepLog::default();
        let names = SiteNames::for_site(site);
        let project = project_of(site, handles);
        let network = handles.network.clone().unwrap_or(names.network);

        let result: Result<BackendHandles> = async {
            // `down` by project name works even if the file is already gone.
            let down = Command::new("docker").args([
                "compose",
                "-p",
                &project,
                "down",
                "--volumes",
                "--remove-orphans",
            ]);
            self.manager.run(target, &down).await?;
            log.step(format!("Stopped project {} and removed its volumes", project));

            let inspect = Command::new("docker").args(["network", "inspect", &network]);
            if self.manager.run_ok(target, &inspect).await? {
                let rm = Command::new("docker").args(["network", "rm", &network]);
                self.manager.run(target, &rm).await?;
                log.step(format!("Removed network {}", network));
            }

            let dir = self.project_dir(&project);
            self.manager
                .run(target, &Command::new("rm").args(["-rf", &dir]))
                .await?;
            log.step(format!("Removed {}", dir));
            Ok(BackendHandles::default())
        }
        .await;
        log.finish(result)
    }

    /// Inspect every tracked container; all running is `running`, none is
    /// `stopped`, anything in between is `degraded`.
    pub async fn status(&self, site: &Site, target: &RemoteHost, handles: &BackendHandles) -> StatusReport {
        let containers = if handles.containers.is_empty() {
            render::compose_services(site, &self.settings.compose)
                .into_iter()
                .map(|s| s.container_name)
                .collect()
        } else {
            handles.containers.clone()
        };

        let mut running = Vec::new();
        let mut down = Vec::new();
        for container in &containers {
            let inspect = Command::new("docker").args([
                "inspect",
                "-f",
                "{{.State.Running}}",
                container.as_str(),
            ]);
            match self.manager.execute(target, &inspect).await {
                Ok(out) if out.success() && out.stdout.trim() == "true" => running.push(container.as_str()),
                Ok(_) => down.push(container.as_str()),
                Err(e) => return StatusReport::unknown(e),
            }
        }

        let detail = if down.is_empty() {
            format!("{}/{} container(s) running", running.len(), containers.len())
        } else {
            format!(
                "{}/{} container(s) running; not running: {}",
                running.len(),
                containers.len(),
                down.join(", ")
            )
        };

        let state = match (running.len(), down.len()) {
            (0, _) => SiteState::Stopped,
            (_, 0) => SiteState::Running,
            _ => SiteState::Degraded,
        };
        StatusReport::new(state, detail)
    }
}

fn project_of(site: &Site, handles: &BackendHandles) -> String {
    handles
        .compose_project
        .clone()
        .unwrap_or_else(|| SiteNames::for_site(site).compose_project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::fixture;

    fn site() -> Site {
        let mut site = Site::new("shop.example", "web1");
        site.plan.addons.insert("redis".into());
        site
    }

    #[tokio::test]
    async fn provision_creates_network_writes_file_and_starts() {
        let (remote, manager, settings, target) = fixture();
        remote.respond("docker network inspect", 1, "");
        let strategy = ComposeStrategy::new(manager, settings);
        let names = SiteNames::for_site(&site());

        let outcome = strategy.provision(&site(), &target).await;
        assert!(outcome.success, "{:?}", outcome.log);

        assert!(remote.ran(&format!("docker network create {}", names.network)));
        let file = format!("/srv/hostforge/{}/docker-compose.yml", names.compose_project);
        assert!(remote.file(&file).unwrap().contains("redis:7-alpine"));
        assert!(remote.ran("up -d --remove-orphans"));

        let handles = outcome.handles.unwrap();
        assert_eq!(handles.compose_project.as_deref(), Some(names.compose_project.as_str()));
        assert_eq!(handles.containers.len(), 3);
    }

    #[tokio::test]
    async fn existing_network_is_reused() {
        let (remote, manager, settings, target) = fixture();
        let strategy = ComposeStrategy::new(manager, settings);

        assert!(strategy.provision(&site(), &target).await.success);
        assert!(strategy.provision(&site(), &target).await.success);
        assert_eq!(remote.count("docker network create"), 0);
    }

    #[tokio::test]
    async fn failed_up_is_reported() {
        let (remote, manager, settings, target) = fixture();
        remote.respond_full("up -d", 1, "", "pull access denied");
        let strategy = ComposeStrategy::new(manager, settings);

        let outcome = strategy.provision(&site(), &target).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("pull access denied"));
    }

    #[tokio::test]
    async fn delete_removes_volumes_network_and_records() {
        let (remote, manager, settings, target) = fixture();
        let strategy = ComposeStrategy::new(manager, settings);
        let provisioned = strategy.provision(&site(), &target).await.handles.unwrap();

        let outcome = strategy.delete(&site(), &target, &provisioned).await;
        assert!(outcome.success);
        assert!(remote.ran("down --volumes"));
        assert!(remote.ran("docker network rm"));
        assert!(remote.files_under("/srv/hostforge/").is_empty());
        assert_eq!(outcome.handles, Some(BackendHandles::default()));
    }

    #[tokio::test]
    async fn status_reports_partial_failure() {
        let (remote, manager, settings, target) = fixture();
        remote.respond("docker inspect", 0, "true\n");
        let names = SiteNames::for_site(&site());
        remote.respond(&names.container("redis"), 0, "false\n");
        let strategy = ComposeStrategy::new(manager, settings);

        let handles = BackendHandles {
            containers: vec![names.container("web"), names.container("redis")],
            ..BackendHandles::default()
        };
        let report = strategy.status(&site(), &target, &handles).await;
        assert_eq!(report.state, SiteState::Degraded);
        assert!(report.detail.contains(&names.container("redis")));
    }

    #[tokio::test]
    async fn restart_uses_compose_restart() {
        let (remote, manager, settings, target) = fixture();
        let strategy = ComposeStrategy::new(manager, settings);
        let outcome = strategy.restart(&site(), &target, &BackendHandles::default()).await;
        assert!(outcome.success);
        assert!(remote.ran("docker-compose.yml restart"));
    }
}
