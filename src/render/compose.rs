use serde::Serialize;

use super::naming::{validate_site_names, SiteNames};
use super::render_template;
use crate::config::ComposeSettings;
use crate::error::Result;
use crate::model::Site;

const COMPOSE_TEMPLATE: &str = include_str!("../../templates/docker-compose.yml.j2");
const NGINX_POD_TEMPLATE: &str = include_str!("../../templates/nginx-pod.conf.j2");

/// A service declared in a site's Compose file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposeService {
    pub name: String,
    pub container_name: String,
    pub image: String,
}

/// The services a site's Compose file declares, in file order.
pub fn compose_services(site: &Site, settings: &ComposeSettings) -> Vec<ComposeService> {
    let names = SiteNames::for_site(site);
    let service = |name: &str, image: String| ComposeService {
        name: name.to_string(),
        container_name: names.container(name),
        image,
    };

    let mut services = vec![
        service("web", settings.nginx_image.clone()),
        service("php", settings.php_image_for(&site.plan.php_version)),
    ];
    if site.plan.has_addon("redis") {
        services.push(service("redis", settings.redis_image.clone()));
    }
    if let Some(db) = &site.database {
        services.push(service("db", db.engine.image().to_string()));
    }
    services
}

#[derive(Serialize)]
struct DbContext {
    image: &'static str,
    data_dir: &'static str,
    env: Vec<(String, String)>,
}

/// Values are emitted as JSON strings, which YAML reads as double-quoted
/// scalars.
fn yaml_quoted(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

pub fn compose_definition(site: &Site, settings: &ComposeSettings) -> Result<String> {
    validate_site_names(site)?;
    let names = SiteNames::for_site(site);

    let mut php_env = vec![("SITE_DOMAIN".to_string(), yaml_quoted(&site.domain))];
    if site.plan.has_addon("redis") {
        php_env.push(("REDIS_HOST".to_string(), yaml_quoted("redis")));
    }

    let db = site.database.as_ref().map(|db| {
        php_env.push(("DB_CONNECTION".to_string(), yaml_quoted(db.engine.as_str())));
        php_env.push(("DB_HOST".to_string(), yaml_quoted("db")));
        php_env.push(("DB_PORT".to_string(), yaml_quoted(&db.engine.port().to_string())));
        php_env.push(("DB_DATABASE".to_string(), yaml_quoted(&db.name)));
        php_env.push(("DB_USERNAME".to_string(), yaml_quoted(&db.user)));
        php_env.push(("DB_PASSWORD".to_string(), yaml_quoted(&db.password)));

        let (db_var, user_var, pass_var, root_var) = db.engine.env_names();
        let mut env = vec![
            (db_var.to_string(), yaml_quoted(&db.name)),
            (user_var.to_string(), yaml_quoted(&db.user)),
            (pass_var.to_string(), yaml_quoted(&db.password)),
        ];
        if let Some(root_var) = root_var {
            env.push((root_var.to_string(), yaml_quoted(&db.password)));
        }
        DbContext {
            image: db.engine.image(),
            data_dir: db.engine.data_dir(),
            env,
        }
    });

    let router_rule = site
        .server_names()
        .iter()
        .map(|name| format!("Host(`{}`)", name))
        .collect::<Vec<_>>()
        .join(" || ");

    render_template(
        "docker-compose",
        COMPOSE_TEMPLATE,
        minijinja::context! {
            domain => &site.domain,
            project => &names.compose_project,
            network => &names.network,
            proxy_network => &settings.proxy_network,
            nginx_image => &settings.nginx_image,
            php_image => settings.php_image_for(&site.plan.php_version),
            redis_image => &settings.redis_image,
            redis => site.plan.has_addon("redis"),
            tls => site.ssl,
            router_rule => router_rule,
            cpus => site.plan.cpu_cores(),
            memory => format!("{}M", site.plan.memory_mb),
            php_env => php_env,
            db => db,
        },
    )
}

/// nginx server block for a container that forwards PHP to `php_upstream`
/// (`127.0.0.1:9000` inside a pod, `php:9000` on a Compose network).
pub fn nginx_pod_config(site: &Site, php_upstream: &str) -> Result<String> {
    validate_site_names(site)?;
    render_template(
        "nginx-pod",
        NGINX_POD_TEMPLATE,
        minijinja::context! {
            domain => &site.domain,
            server_names => site.server_names(),
            php_upstream => php_upstream,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatabaseEngine, DatabaseSpec};

    fn parse(text: &str) -> serde_yaml::Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn minimal_site_declares_web_and_php() {
        let site = Site::new("example.com", "docker-1");
        let doc = parse(&compose_definition(&site, &ComposeSettings::default()).unwrap());
        let names = SiteNames::for_site(&site);

        assert_eq!(doc["name"].as_str(), Some(names.compose_project.as_str()));
        let services = doc["services"].as_mapping().unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(
            doc["services"]["web"]["container_name"].as_str(),
            Some(names.container("web").as_str())
        );
        assert_eq!(doc["networks"]["site"]["name"].as_str(), Some(names.network.as_str()));
        assert_eq!(doc["networks"]["site"]["external"].as_bool(), Some(true));
        assert_eq!(
            doc["services"]["php"]["deploy"]["resources"]["limits"]["cpus"].as_str(),
            Some("0.5")
        );
    }

    #[test]
    fn database_and_redis_add_services() {
        let mut site = Site::new("shop.example", "docker-1");
        site.plan.addons.insert("redis".into());
        site.database = Some(DatabaseSpec {
            engine: DatabaseEngine::Mariadb,
            name: "shop".into(),
            user: "shop".into(),
            password: "pa\"ss: #word".into(),
        });
        let settings = ComposeSettings::default();
        let doc = parse(&compose_definition(&site, &settings).unwrap());

        assert_eq!(doc["services"]["redis"]["image"].as_str(), Some("redis:7-alpine"));
        assert_eq!(doc["services"]["db"]["image"].as_str(), Some("mariadb:11"));
        assert_eq!(
            doc["services"]["db"]["environment"]["MARIADB_PASSWORD"].as_str(),
            Some("pa\"ss: #word")
        );
        assert!(doc["volumes"].get("db-data").is_some());

        let declared: Vec<_> = compose_services(&site, &settings)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(declared, vec!["web", "php", "redis", "db"]);
    }

    #[test]
    fn tls_switches_router_entrypoint() {
        let mut site = Site::new("example.com", "docker-1");
        site.aliases = vec!["www.example.com".into()];
        site.ssl = true;
        let text = compose_definition(&site, &ComposeSettings::default()).unwrap();
        let doc = parse(&text);
        let labels = &doc["services"]["web"]["labels"];
        let project = SiteNames::for_site(&site).compose_project;

        assert_eq!(
            labels[format!("traefik.http.routers.{}.rule", project).as_str()].as_str(),
            Some("Host(`example.com`) || Host(`www.example.com`)")
        );
        assert_eq!(
            labels[format!("traefik.http.routers.{}.entrypoints", project).as_str()].as_str(),
            Some("websecure")
        );
    }

    #[test]
    fn proxy_network_is_joined_when_configured() {
        let site = Site::new("example.com", "docker-1");
        let settings = ComposeSettings {
            proxy_network: Some("edge".into()),
            ..ComposeSettings::default()
        };
        let doc = parse(&compose_definition(&site, &settings).unwrap());
        assert_eq!(doc["networks"]["proxy"]["name"].as_str(), Some("edge"));
        assert_eq!(doc["services"]["web"]["networks"][1].as_str(), Some("proxy"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut site = Site::new("example.com", "docker-1");
        site.plan.addons.insert("redis".into());
        let settings = ComposeSettings::default();
        assert_eq!(
            compose_definition(&site, &settings).unwrap(),
            compose_definition(&site, &settings).unwrap()
        );
    }

    #[test]
    fn pod_config_points_at_upstream() {
        let site = Site::new("example.com", "k8s-1");
        let conf = nginx_pod_config(&site, "php:9000").unwrap();
        assert!(conf.contains("fastcgi_pass php:9000;"));
        assert!(conf.contains("server_name example.com;"));
    }
}
