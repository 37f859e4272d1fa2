use super::naming::validate_site_names;
use super::render_template;
use crate::config::StandaloneSettings;
use crate::error::Result;
use crate::model::{Site, WebServer};

const NGINX_TEMPLATE: &str = include_str!("../../templates/nginx-vhost.conf.j2");
const APACHE_TEMPLATE: &str = include_str!("../../templates/apache-vhost.conf.j2");

/// Where and for which web server a site's virtual host is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhostTarget {
    pub web_server: WebServer,
    /// File under `sites-available`.
    pub config_path: String,
    /// Link (nginx) or `a2ensite` result (Apache) under `sites-enabled`.
    pub enabled_path: String,
    pub document_root: String,
    pub php_socket: String,
    pub php_fpm_unit: String,
    pub cert_dir: String,
}

impl VhostTarget {
    pub fn for_site(site: &Site, settings: &StandaloneSettings) -> Self {
        let web_server = site.web_server.unwrap_or(settings.web_server);
        let file = format!("{}.conf", site.domain);
        let (available, enabled) = match web_server {
            WebServer::Nginx => (&settings.nginx_sites_available, &settings.nginx_sites_enabled),
            WebServer::Apache => (&settings.apache_sites_available, &settings.apache_sites_enabled),
        };

        Self {
            web_server,
            config_path: join(available, &file),
            enabled_path: join(enabled, &file),
            document_root: join(&settings.web_root, &site.domain),
            php_socket: settings.php_fpm_socket_for(&site.plan.php_version),
            php_fpm_unit: settings.php_fpm_unit_for(&site.plan.php_version),
            cert_dir: join(&settings.letsencrypt_live, &site.domain),
        }
    }

    /// The systemd unit serving HTTP.
    pub fn service_unit(&self) -> &'static str {
        match self.web_server {
            WebServer::Nginx => "nginx",
            WebServer::Apache => "apache2",
        }
    }

    /// Name `a2ensite`/`a2dissite` expect.
    pub fn site_name(&self) -> &str {
        self.config_path
            .rsplit('/')
            .next()
            .and_then(|f| f.strip_suffix(".conf"))
            .unwrap_or(&self.config_path)
    }
}

fn join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Render the virtual host, with or without the TLS server block.
pub fn virtual_host(site: &Site, target: &VhostTarget, tls: bool) -> Result<String> {
    validate_site_names(site)?;

    let (name, template) = match target.web_server {
        WebServer::Nginx => ("nginx-vhost", NGINX_TEMPLATE),
        WebServer::Apache => ("apache-vhost", APACHE_TEMPLATE),
    };

    render_template(
        name,
        template,
        minijinja::context! {
            domain => &site.domain,
            aliases => &site.aliases,
            server_names => site.server_names(),
            document_root => &target.document_root,
            php_socket => &target.php_socket,
            cert_dir => &target.cert_dir,
            tls => tls,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn site() -> Site {
        let mut site = Site::new("shop.test", "vps-1");
        site.aliases = vec!["www.shop.test".into()];
        site
    }

    #[test]
    fn nginx_paths_follow_settings() {
        let target = VhostTarget::for_site(&site(), &StandaloneSettings::default());
        assert_eq!(target.config_path, "/etc/nginx/sites-available/shop.test.conf");
        assert_eq!(target.enabled_path, "/etc/nginx/sites-enabled/shop.test.conf");
        assert_eq!(target.document_root, "/var/www/shop.test");
        assert_eq!(target.php_socket, "/run/php/php8.2-fpm.sock");
        assert_eq!(target.php_fpm_unit, "php8.2-fpm");
        assert_eq!(target.service_unit(), "nginx");
        assert_eq!(target.site_name(), "shop.test");
    }

    #[test]
    fn site_override_selects_apache() {
        let mut site = site();
        site.web_server = Some(WebServer::Apache);
        let target = VhostTarget::for_site(&site, &StandaloneSettings::default());
        assert_eq!(target.config_path, "/etc/apache2/sites-available/shop.test.conf");
        assert_eq!(target.service_unit(), "apache2");
    }

    #[test]
    fn hostile_alias_is_never_rendered() {
        let mut site = site();
        site.aliases.push("www.shop.test;\n    root /etc;\n    autoindex on".into());
        let target = VhostTarget::for_site(&site, &StandaloneSettings::default());

        let err = virtual_host(&site, &target, false).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn nginx_plain_and_tls_variants() {
        let site = site();
        let target = VhostTarget::for_site(&site, &StandaloneSettings::default());

        let plain = virtual_host(&site, &target, false).unwrap();
        assert!(plain.contains("server_name shop.test www.shop.test;"));
        assert!(plain.contains("fastcgi_pass unix:/run/php/php8.2-fpm.sock;"));
        assert!(!plain.contains("ssl_certificate"));
        assert_eq!(plain.matches("server {").count(), 1);

        let tls = virtual_host(&site, &target, true).unwrap();
        assert!(tls.contains("ssl_certificate /etc/letsencrypt/live/shop.test/fullchain.pem;"));
        assert!(tls.contains("return 301 https://$host$request_uri;"));
        assert_eq!(tls.matches("server {").count(), 2);
    }

    #[test]
    fn apache_plain_and_tls_variants() {
        let mut site = site();
        site.web_server = Some(WebServer::Apache);
        let target = VhostTarget::for_site(&site, &StandaloneSettings::default());

        let plain = virtual_host(&site, &target, false).unwrap();
        assert!(plain.contains("ServerAlias www.shop.test"));
        assert!(plain.contains("SetHandler \"proxy:unix:/run/php/php8.2-fpm.sock|fcgi://localhost\""));
        assert_eq!(plain.matches("<VirtualHost").count(), 1);

        let tls = virtual_host(&site, &target, true).unwrap();
        assert!(tls.contains("<VirtualHost *:443>"));
        assert!(tls.contains("SSLCertificateKeyFile /etc/letsencrypt/live/shop.test/privkey.pem"));
        assert!(tls.contains("RewriteCond %{REQUEST_URI}"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let site = site();
        let target = VhostTarget::for_site(&site, &StandaloneSettings::default());
        for tls in [false, true] {
            assert_eq!(
                virtual_host(&site, &target, tls).unwrap(),
                virtual_host(&site, &target, tls).unwrap()
            );
        }
    }
}
