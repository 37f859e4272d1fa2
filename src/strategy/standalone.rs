use std::sync::Arc;

use super::{Outcome, SiteState, StatusReport, StepLog};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::model::{BackendHandles, DatabaseEngine, DatabaseSpec, Site, WebServer};
use crate::render::{self, VhostTarget};
use crate::ssh::{ChannelManager, Command, RemoteHost};

const BACKUP_SUFFIX: &str = ".hostforge-bak";

/// Serves sites from a bare Linux host: document root, nginx or Apache
/// virtual host, PHP-FPM, optional certbot certificate and local database.
pub struct StandaloneStrategy {
    manager: Arc<ChannelManager>,
    settings: Arc<Settings>,
}

impl StandaloneStrategy {
    pub fn new(manager: Arc<ChannelManager>, settings: Arc<Settings>) -> Self {
        Self { manager, settings }
    }

    fn target_for(&self, site: &Site) -> VhostTarget {
        VhostTarget::for_site(site, &self.settings.standalone)
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

    /// Web server first, database last. The database step runs whether or
    /// not the web server converged; either failure fails the outcome.
    async fn converge(&self, site: &Site, target: &RemoteHost, log: &mut StepLog) -> Result<BackendHandles> {
        let vhost = self.target_for(site);

        // Render both variants up front so a template error touches nothing.
        let plain = render::virtual_host(site, &vhost, false)?;
        let tls = if site.ssl {
            Some(render::virtual_host(site, &vhost, true)?)
        } else {
            None
        };

        let web = self
            .converge_web(site, target, &vhost, &plain, tls.as_deref(), log)
            .await;

        let Some(db) = &site.database else {
            return web;
        };
        match (web, self.create_database(target, db).await) {
            (Ok(handles), Ok(())) => {
                log.step(format!("Database {} ready", db.name));
                Ok(handles)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => {
                log.step(format!("Database {} ready", db.name));
                Err(e)
            }
            (Err(web), Err(db_err)) => {
                log.warn(format!("database {} not created: {}", db.name, db_err));
                Err(web)
            }
        }
    }

    async fn converge_web(
        &self,
        site: &Site,
        target: &RemoteHost,
        vhost: &VhostTarget,
        plain: &str,
        tls: Option<&str>,
        log: &mut StepLog,
    ) -> Result<BackendHandles> {
        self.privileged(target, Command::new("mkdir").args(["-p", &vhost.document_root]))
            .await?;
        self.privileged(
            target,
            Command::new("chown").args([&self.settings.standalone.web_user, &vhost.document_root]),
        )
        .await?;
        log.step(format!("Document root {}", vhost.document_root));

        // Keep serving TLS if a certificate was already issued on a previous
        // run. The live directory is often unreadable to the login user; that
        // reads as "no certificate" and certbot keeps the existing one.
        let has_cert = site.ssl
            && self
                .manager
                .exists(target, &format!("{}/fullchain.pem", vhost.cert_dir))
                .await
                .unwrap_or(false);
        let first = match (tls, has_cert) {
            (Some(tls), true) => tls,
            _ => plain,
        };

        self.install_vhost(site, target, vhost, first, log).await?;
        self.reload(target, vhost).await?;
        log.step(format!("Reloaded {}", vhost.service_unit()));

        if let (Some(tls), false) = (tls, has_cert) {
            match self.request_certificate(site, target, vhost).await {
                Ok(()) => {
                    log.step(format!("Issued certificate for {}", site.domain));
                    self.install_vhost(site, target, vhost, tls, log).await?;
                    self.reload(target, vhost).await?;
                    log.step(format!("Reloaded {} with TLS", vhost.service_unit()));
                }
                Err(e) => log.warn(format!(
                    "certificate request for {} failed, serving plain HTTP: {}",
                    site.domain, e
                )),
            }
        }

        Ok(BackendHandles {
            vhost_path: Some(vhost.config_path.clone()),
            document_root: Some(vhost.document_root.clone()),
            ..BackendHandles::default()
        })
    }

    async fn privileged(&self, target: &RemoteHost, command: Command) -> Result<String> {
        self.manager.run_privileged(target, &command).await
    }

    /// Stage, back up, install, enable and syntax-check a vhost. On a failed
    /// check the previous file (or no file) is restored and nothing reloads.
    async fn install_vhost(
        &self,
        site: &Site,
        target: &RemoteHost,
        vhost: &VhostTarget,
        content: &str,
        log: &mut StepLog,
    ) -> Result<()> {
        let staging_dir = self.settings.standalone.staging_dir.trim_end_matches('/');
        let staged = format!("{}/{}.conf", staging_dir, site.domain);
        let backup = format!("{}{}", vhost.config_path, BACKUP_SUFFIX);

        self.manager.mkdir_all(target, staging_dir).await?;
        self.manager
            .write_file(target, &staged, content.as_bytes(), 0o644)
            .await?;

        let had_previous = self.manager.exists(target, &vhost.config_path).await?;
        if had_previous {
            self.privileged(target, Command::new("cp").args(["-p", &vhost.config_path, &backup]))
                .await?;
        }

        self.privileged(
            target,
            Command::new("install").args(["-m", "0644", &staged, &vhost.config_path]),
        )
        .await?;
        self.enable(target, vhost).await?;
        log.step(format!("Installed {}", vhost.config_path));

        let check = self.manager.execute_privileged(target, &check_command(vhost)).await?;
        if !check.success() {
            self.restore(target, vhost, had_previous, &backup).await?;
            let reason = if check.stderr.trim().is_empty() {
                check.stdout.trim().to_string()
            } else {
                check.stderr.trim().to_string()
            };
            return Err(Error::Validation(format!(
                "{} rejected the config for {}; previous config restored: {}",
                vhost.service_unit(),
                site.domain,
                reason
            )));
        }
        log.step("Configuration check passed");

        if had_previous {
            self.privileged(target, Command::new("rm").args(["-f", &backup]))
                .await?;
        }
        Ok(())
    }

    async fn enable(&self, target: &RemoteHost, vhost: &VhostTarget) -> Result<()> {
        let command = match vhost.web_server {
            WebServer::Nginx => {
                Command::new("ln").args(["-sfn", &vhost.config_path, &vhost.enabled_path])
            }
            WebServer::Apache => Command::new("a2ensite").args(["-q", vhost.site_name()]),
        };
        self.privileged(target, command).await.map(|_| ())
    }

    async fn restore(
        &self,
        target: &RemoteHost,
        vhost: &VhostTarget,
        had_previous: bool,
        backup: &str,
    ) -> Result<()> {
        if had_previous {
            self.privileged(target, Command::new("mv").args([backup, &vhost.config_path]))
                .await?;
        } else {
            if vhost.web_server == WebServer::Apache {
                let disable = Command::new("a2dissite").args(["-q", vhost.site_name()]);
                self.manager.execute_privileged(target, &disable).await?;
            }
            self.privileged(
                target,
                Command::new("rm").args(["-f", &vhost.enabled_path, &vhost.config_path]),
            )
            .await?;
        }
        Ok(())
    }

    async fn reload(&self, target: &RemoteHost, vhost: &VhostTarget) -> Result<()> {
        self.privileged(
            target,
            Command::new("systemctl").args(["reload", vhost.service_unit()]),
        )
        .await
        .map(|_| ())
    }

    async fn request_certificate(&self, site: &Site, target: &RemoteHost, vhost: &VhostTarget) -> Result<()> {
        let mut certbot = Command::new("certbot").args([
            "certonly",
            "--webroot",
            "-w",
            &vhost.document_root,
            "--cert-name",
            &site.domain,
            "--non-interactive",
            "--agree-tos",
            "--keep-until-expiring",
        ]);
        for name in site.server_names() {
            certbot = certbot.args(["-d", name]);
        }
        certbot = match site.ssl_email.as_ref().or(self.settings.standalone.certbot_email.as_ref()) {
            Some(email) => certbot.args(["-m", email]),
            None => certbot.arg("--register-unsafely-without-email"),
        };
        self.privileged(target, certbot).await.map(|_| ())
    }

    async fn create_database(&self, target: &RemoteHost, db: &DatabaseSpec) -> Result<()> {
        check_identifier("database name", &db.name)?;
        check_identifier("database user", &db.user)?;

        match db.engine {
            DatabaseEngine::Mysql | DatabaseEngine::Mariadb => {
                let sql = mysql_statements(db);
                self.privileged(target, Command::new("mysql").args(["-e", &sql]).sensitive())
                    .await?;
            }
            DatabaseEngine::Postgres => {
                let exists = psql(&format!(
                    "SELECT 1 FROM pg_database WHERE datname = '{}'",
                    db.name
                ))
                .arg("-tA");
                self.privileged(target, postgres_role(db)).await?;
                let found = self.privileged(target, exists).await?;
                if found.trim() != "1" {
                    self.privileged(
                        target,
                        psql(&format!("CREATE DATABASE \"{}\" OWNER \"{}\"", db.name, db.user)),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Reload the web server and restart PHP-FPM.
    pub async fn restart(&self, site: &Site, target: &RemoteHost) -> Outcome {
        let mut log = StepLog::default();
        let vhost = self.target_for(site);
        let result: Result<BackendHandles> = async {
            self.reload(target, &vhost).await?;
            log.step(format!("Reloaded {}", vhost.service_unit()));
            self.privileged(
                target,
                Command::new("systemctl").args(["restart", &vhost.php_fpm_unit]),
            )
            .await?;
            log.step(format!("Restarted {}", vhost.php_fpm_unit));
            Ok(BackendHandles {
                vhost_path: Some(vhost.config_path.clone()),
                document_root: Some(vhost.document_root.clone()),
                ..BackendHandles::default()
            })
        }
        .await;
        log.finish(result)
    }

    /// Remove vhost and link, check and reload, then remove the document root.
    pub async fn delete(&self, site: &Site, target: &RemoteHost, handles: &BackendHandles) -> Outcome {
        let mut log = StepLog::default();
        let mut vhost = self.target_for(site);
        if let Some(path) = &handles.vhost_path {
            vhost.config_path = path.clone();
        }
        if let Some(root) = &handles.document_root {
            vhost.document_root = root.clone();
        }

        let result: Result<BackendHandles> = async {
            if vhost.web_server == WebServer::Apache {
                let disable = Command::new("a2dissite").args(["-q", vhost.site_name()]);
                self.manager.execute_privileged(target, &disable).await?;
            }
            self.privileged(
                target,
                Command::new("rm").args(["-f", &vhost.enabled_path, &vhost.config_path]),
            )
            .await?;
            log.step(format!("Removed {}", vhost.config_path));

            let check = self.manager.execute_privileged(target, &check_command(&vhost)).await?;
            if check.success() {
                self.reload(target, &vhost).await?;
                log.step(format!("Reloaded {}", vhost.service_unit()));
            } else {
                log.warn(format!(
                    "{} config check failed after removal; not reloading: {}",
                    vhost.service_unit(),
                    check.stderr.trim()
                ));
            }

            self.privileged(target, Command::new("rm").args(["-rf", &vhost.document_root]))
                .await?;
            log.step(format!("Removed {}", vhost.document_root));
            Ok(BackendHandles::default())
        }
        .await;
        log.finish(result)
    }

    /// Web server unit state plus vhost presence.
    pub async fn status(&self, site: &Site, target: &RemoteHost, handles: &BackendHandles) -> StatusReport {
        let vhost = self.target_for(site);
        let config_path = handles.vhost_path.clone().unwrap_or(vhost.config_path.clone());

        let active = Command::new("systemctl").args(["is-active", "--quiet", vhost.service_unit()]);
        let active = match self.manager.run_ok(target, &active).await {
            Ok(active) => active,
            Err(e) => return StatusReport::unknown(e),
        };
        let present = match self.manager.exists(target, &config_path).await {
            Ok(present) => present,
            Err(e) => return StatusReport::unknown(e),
        };

        match (active, present) {
            (true, true) => StatusReport::new(
                SiteState::Running,
                format!("{} active, {} present", vhost.service_unit(), config_path),
            ),
            (true, false) => StatusReport::new(
                SiteState::Stopped,
                format!("{} active but {} is missing", vhost.service_unit(), config_path),
            ),
            (false, _) => StatusReport::new(
                SiteState::Stopped,
                format!("{} is not active", vhost.service_unit()),
            ),
        }
    }
}

fn check_command(vhost: &VhostTarget) -> Command {
    match vhost.web_server {
        WebServer::Nginx => Command::new("nginx").arg("-t"),
        WebServer::Apache => Command::new("apachectl").arg("configtest"),
    }
}

/// Names are spliced into SQL, so only plain identifiers are accepted.
fn check_identifier(what: &str, value: &str) -> Result<()> {
    let ok = !value.is_empty()
        && value.len() <= 63
        && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{} '{}' may only contain letters, digits and '_'",
            what, value
        )))
    }
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn mysql_statements(db: &DatabaseSpec) -> String {
    let user = format!("{}@'localhost'", sql_literal(&db.user));
    let password = sql_literal(&db.password);
    [
        format!("CREATE DATABASE IF NOT EXISTS `{}`", db.name),
        format!("CREATE USER IF NOT EXISTS {} IDENTIFIED BY {}", user, password),
        format!("ALTER USER {} IDENTIFIED BY {}", user, password),
        format!("GRANT ALL PRIVILEGES ON `{}`.* TO {}", db.name, user),
        "FLUSH PRIVILEGES".to_string(),
    ]
    .join("; ")
        + ";"
}

fn psql(sql: &str) -> Command {
    Command::new("psql")
        .args(["-v", "ON_ERROR_STOP=1", "-c", sql])
        .run_as("postgres")
}

fn postgres_role(db: &DatabaseSpec) -> Command {
    // Postgres literals take backslashes verbatim with standard_conforming_strings.
    let password = format!("'{}'", db.password.replace('\'', "''"));
    psql(&format!(
        "DO $$BEGIN \
         IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = '{user}') THEN \
         CREATE ROLE \"{user}\" LOGIN PASSWORD {pw}; \
         ELSE ALTER ROLE \"{user}\" LOGIN PASSWORD {pw}; \
         END IF; END$$",
        user = db.user,
        pw = password
    ))
    .sensitive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::fixture;

    const VHOST: &str = "/etc/nginx/sites-available/shop.test.conf";

    fn shop(ssl: bool) -> Site {
        let mut site = Site::new("shop.test", "web1");
        site.ssl = ssl;
        site
    }

    #[tokio::test]
    async fn failed_check_keeps_previous_vhost_and_never_reloads() {
        let (remote, manager, settings, target) = fixture();
        remote.put_file(VHOST, "# previous config\n");
        remote.respond_full("nginx -t", 1, "", "nginx: [emerg] unexpected \"}\"");
        let strategy = StandaloneStrategy::new(manager, settings);

        let outcome = strategy.provision(&shop(true), &target).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("unexpected"));
        assert_eq!(remote.file(VHOST).as_deref(), Some("# previous config\n"));
        assert!(!remote.ran("systemctl reload"));
        assert!(!remote.ran("certbot"));
    }

    #[tokio::test]
    async fn failed_check_without_previous_removes_new_files() {
        let (remote, manager, settings, target) = fixture();
        remote.respond("nginx -t", 1, "");
        let strategy = StandaloneStrategy::new(manager, settings);

        let outcome = strategy.provision(&shop(false), &target).await;
        assert!(!outcome.success);
        assert!(remote.file(VHOST).is_none());
        assert!(remote.ran("rm -f /etc/nginx/sites-enabled/shop.test.conf"));
    }

    #[tokio::test]
    async fn plain_provision_installs_checks_and_reloads() {
        let (remote, manager, settings, target) = fixture();
        let strategy = StandaloneStrategy::new(manager, settings);

        let outcome = strategy.provision(&shop(false), &target).await;
        assert!(outcome.success, "{:?}", outcome.log);

        let commands = remote.commands();
        let position = |needle: &str| commands.iter().position(|c| c.contains(needle)).unwrap();
        assert!(position("mkdir -p /var/www/shop.test") < position("install -m 0644"));
        assert!(position("install -m 0644") < position("nginx -t"));
        assert!(position("nginx -t") < position("systemctl reload nginx"));
        assert!(commands.iter().all(|c| !c.contains("certbot")));

        let installed = remote.file(VHOST).unwrap();
        assert!(installed.contains("server_name shop.test;"));
        assert!(!installed.contains("ssl_certificate"));

        let handles = outcome.handles.unwrap();
        assert_eq!(handles.vhost_path.as_deref(), Some(VHOST));
        assert_eq!(handles.document_root.as_deref(), Some("/var/www/shop.test"));
    }

    #[tokio::test]
    async fn ssl_provision_switches_to_tls_after_certificate() {
        let (remote, manager, settings, target) = fixture();
        let strategy = StandaloneStrategy::new(manager, settings);

        let outcome = strategy.provision(&shop(true), &target).await;
        assert!(outcome.success, "{:?}", outcome.log);
        assert!(remote.ran("certbot certonly --webroot -w /var/www/shop.test"));
        assert_eq!(remote.count("systemctl reload nginx"), 2);
        assert!(remote.file(VHOST).unwrap().contains("ssl_certificate"));
    }

    #[tokio::test]
    async fn certificate_failure_leaves_plain_http_running() {
        let (remote, manager, settings, target) = fixture();
        remote.respond_full("certbot", 1, "", "too many certificates already issued");
        let strategy = StandaloneStrategy::new(manager, settings);

        let outcome = strategy.provision(&shop(true), &target).await;
        assert!(outcome.success);
        assert!(outcome.log.iter().any(|l| l.starts_with("warning:")));
        assert!(!remote.file(VHOST).unwrap().contains("ssl_certificate"));
        assert_eq!(remote.count("systemctl reload nginx"), 1);
    }

    #[tokio::test]
    async fn apache_sites_are_enabled_and_config_tested() {
        let (remote, manager, settings, target) = fixture();
        let mut site = shop(false);
        site.web_server = Some(WebServer::Apache);
        let strategy = StandaloneStrategy::new(manager, settings);

        assert!(strategy.provision(&site, &target).await.success);
        assert!(remote.ran("a2ensite -q shop.test"));
        assert!(remote.ran("apachectl configtest"));
        assert!(remote.ran("systemctl reload apache2"));
        assert!(remote
            .file("/etc/apache2/sites-available/shop.test.conf")
            .unwrap()
            .contains("ServerName shop.test"));
    }

    #[tokio::test]
    async fn reprovision_converges_without_duplicates() {
        let (remote, manager, settings, target) = fixture();
        let strategy = StandaloneStrategy::new(manager, settings);

        assert!(strategy.provision(&shop(false), &target).await.success);
        let first = remote.file(VHOST).unwrap();
        assert!(strategy.provision(&shop(false), &target).await.success);

        assert_eq!(remote.file(VHOST).unwrap(), first);
        assert_eq!(remote.files_under("/etc/nginx/sites-available/").len(), 1);
        assert!(remote.file(&format!("{}{}", VHOST, BACKUP_SUFFIX)).is_none());
    }

    #[tokio::test]
    async fn existing_certificate_goes_straight_to_tls() {
        let (remote, manager, settings, target) = fixture();
        remote.put_file("/etc/letsencrypt/live/shop.test/fullchain.pem", "cert");
        let strategy = StandaloneStrategy::new(manager, settings);

        assert!(strategy.provision(&shop(true), &target).await.success);
        assert!(!remote.ran("certbot"));
        assert!(remote.file(VHOST).unwrap().contains("ssl_certificate"));
    }

    #[tokio::test]
    async fn database_is_created_last() {
        let (remote, manager, settings, target) = fixture();
        let mut site = shop(false);
        site.database = Some(DatabaseSpec {
            engine: DatabaseEngine::Mysql,
            name: "shop".into(),
            user: "shop".into(),
            password: "it's secret".into(),
        });
        let strategy = StandaloneStrategy::new(manager, settings);

        assert!(strategy.provision(&site, &target).await.success);
        let commands = remote.commands();
        let last = commands.last().unwrap();
        assert!(last.contains("mysql -e"));
        assert!(last.contains("CREATE DATABASE IF NOT EXISTS `shop`"));
    }

    #[tokio::test]
    async fn database_is_created_even_when_the_web_server_fails() {
        let (remote, manager, settings, target) = fixture();
        remote.put_file(VHOST, "# live config\n");
        remote.respond_full("nginx -t", 1, "", "nginx: [emerg] unexpected end of file");
        let mut site = shop(false);
        site.database = Some(DatabaseSpec {
            engine: DatabaseEngine::Mysql,
            name: "shop".into(),
            user: "shop".into(),
            password: "pw".into(),
        });
        let strategy = StandaloneStrategy::new(manager, settings);

        let outcome = strategy.provision(&site, &target).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("unexpected end of file"));
        assert!(remote.ran("mysql -e"));
        assert!(outcome.log.iter().any(|l| l == "Database shop ready"));
        assert!(!remote.ran("systemctl reload"));
        assert_eq!(remote.file(VHOST).as_deref(), Some("# live config\n"));
    }

    #[tokio::test]
    async fn postgres_statements_run_as_the_postgres_user() {
        let (remote, manager, settings, target) = fixture();
        let mut site = shop(false);
        site.database = Some(DatabaseSpec {
            engine: DatabaseEngine::Postgres,
            name: "shop".into(),
            user: "shop".into(),
            password: "pw".into(),
        });
        let strategy = StandaloneStrategy::new(manager, settings);

        let outcome = strategy.provision(&site, &target).await;
        assert!(outcome.success, "{:?}", outcome.log);
        assert!(remote.ran("sudo -n -u postgres psql -v ON_ERROR_STOP=1 -c"));
        assert!(remote.ran("CREATE DATABASE"));
        assert!(!remote.ran("runuser"));
    }

    #[tokio::test]
    async fn invalid_database_identifier_fails_the_outcome() {
        let (remote, manager, settings, target) = fixture();
        let mut site = shop(false);
        site.database = Some(DatabaseSpec {
            engine: DatabaseEngine::Postgres,
            name: "shop; DROP".into(),
            user: "shop".into(),
            password: "pw".into(),
        });
        let strategy = StandaloneStrategy::new(manager, settings);

        let outcome = strategy.provision(&site, &target).await;
        assert!(!outcome.success);
        assert!(!remote.ran("psql"));
        // Web config stays in place.
        assert!(remote.file(VHOST).is_some());
    }

    #[tokio::test]
    async fn delete_removes_vhost_and_document_root() {
        let (remote, manager, settings, target) = fixture();
        let strategy = StandaloneStrategy::new(manager, settings);
        let handles = strategy.provision(&shop(false), &target).await.handles.unwrap();

        let outcome = strategy.delete(&shop(false), &target, &handles).await;
        assert!(outcome.success);
        assert!(remote.file(VHOST).is_none());
        assert!(remote.ran("rm -rf /var/www/shop.test"));
        assert_eq!(outcome.handles, Some(BackendHandles::default()));
    }

    #[tokio::test]
    async fn status_combines_unit_and_vhost() {
        let (remote, manager, settings, target) = fixture();
        let strategy = StandaloneStrategy::new(manager, settings);
        let handles = BackendHandles::default();

        let report = strategy.status(&shop(false), &target, &handles).await;
        assert_eq!(report.state, SiteState::Stopped);

        remote.put_file(VHOST, "server {}");
        let report = strategy.status(&shop(false), &target, &handles).await;
        assert_eq!(report.state, SiteState::Running);

        remote.respond("systemctl is-active", 3, "");
        let report = strategy.status(&shop(false), &target, &handles).await;
        assert_eq!(report.state, SiteState::Stopped);
    }

    #[tokio::test]
    async fn restart_reloads_and_restarts_php_fpm() {
        let (remote, manager, settings, target) = fixture();
        let strategy = StandaloneStrategy::new(manager, settings);
        assert!(strategy.restart(&shop(false), &target).await.success);
        assert!(remote.ran("systemctl reload nginx"));
        assert!(remote.ran("systemctl restart php8.2-fpm"));
    }

    #[test]
    fn mysql_statements_escape_passwords() {
        let db = DatabaseSpec {
            engine: DatabaseEngine::Mysql,
            name: "shop".into(),
            user: "shop".into(),
            password: r"a'b\c".into(),
        };
        let sql = mysql_statements(&db);
        assert!(sql.contains(r"IDENTIFIED BY 'a''b\\c'"));
        assert!(sql.ends_with("FLUSH PRIVILEGES;"));
    }
}
