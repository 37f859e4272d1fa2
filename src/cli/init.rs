use anyhow::{bail, Context, Result};
use dialoguer::{Input, Select};
use minijinja::Environment;
use std::path::Path;

const CONFIG_TEMPLATE: &str = include_str!("../../templates/hostforge.toml.j2");
const INVENTORY_TEMPLATE: &str = include_str!("../../templates/inventory.toml.j2");

pub fn run(config_path: &Path, inventory_path: &Path) -> Result<()> {
    for path in [config_path, inventory_path] {
        if path.exists() {
            bail!("{} already exists", path.display());
        }
    }

    let host_id: String = Input::new()
        .with_prompt("Host id")
        .default("web1".to_string())
        .interact_text()?;

    let hostname: String = Input::new()
        .with_prompt("Host address")
        .interact_text()?;

    let user: String = Input::new()
        .with_prompt("SSH user")
        .default("root".to_string())
        .interact_text()?;

    let default_key = dirs::home_dir()
        .map(|h| h.join(".ssh/id_ed25519").display().to_string())
        .unwrap_or_else(|| "~/.ssh/id_ed25519".to_string());
    let private_key: String = Input::new()
        .with_prompt("Private key")
        .default(default_key)
        .interact_text()?;

    let topologies = ["detect", "kubernetes", "container-host", "standalone"];
    let topology_idx = Select::new()
        .with_prompt("Host topology")
        .items(&topologies)
        .default(0)
        .interact()?;
    let topology = match topologies[topology_idx] {
        "detect" => None,
        other => Some(other),
    };

    let web_servers = ["nginx", "apache"];
    let web_server_idx = Select::new()
        .with_prompt("Web server for standalone hosts")
        .items(&web_servers)
        .default(0)
        .interact()?;

    let domain: String = Input::new()
        .with_prompt("First site domain")
        .default("example.com".to_string())
        .validate_with(|d: &String| hostforge::render::validate_domain(d).map_err(|e| e.to_string()))
        .interact_text()?;

    let email: String = Input::new()
        .with_prompt("Certificate contact email (empty to skip)")
        .allow_empty(true)
        .interact_text()?;

    let answers = Answers {
        host_id,
        hostname,
        user,
        private_key,
        topology: topology.map(str::to_string),
        web_server: web_servers[web_server_idx].to_string(),
        domain,
        email: (!email.is_empty()).then_some(email),
    };
    let (config, inventory) = render(&answers)?;

    std::fs::write(config_path, config)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    std::fs::write(inventory_path, inventory)
        .with_context(|| format!("Failed to write {}", inventory_path.display()))?;

    crate::output::success(&format!("Created {}", config_path.display()));
    crate::output::success(&format!("Created {}", inventory_path.display()));
    crate::output::info(&format!(
        "Check reachability with `hostforge hosts check`, then `hostforge deploy {}`.",
        answers.domain
    ));

    Ok(())
}

struct Answers {
    host_id: String,
    hostname: String,
    user: String,
    private_key: String,
    topology: Option<String>,
    web_server: String,
    domain: String,
    email: Option<String>,
}

/// Render `(hostforge.toml, inventory.toml)`.
fn render(answers: &Answers) -> Result<(String, String)> {
    let mut env = Environment::new();
    env.add_template("hostforge.toml", CONFIG_TEMPLATE)?;
    env.add_template("inventory.toml", INVENTORY_TEMPLATE)?;

    let config = env.get_template("hostforge.toml")?.render(minijinja::context! {
        web_server => toml_string(&answers.web_server),
        email => answers.email.as_deref().map(toml_string),
    })?;
    let inventory = env.get_template("inventory.toml")?.render(minijinja::context! {
        host_id => toml_string(&answers.host_id),
        hostname => toml_string(&answers.hostname),
        user => toml_string(&answers.user),
        private_key => toml_string(&answers.private_key),
        topology => answers.topology.as_deref().map(toml_string),
        domain => toml_string(&answers.domain),
        ssl => answers.email.is_some(),
    })?;
    Ok((config, inventory))
}

/// A TOML string literal, quoted and escaped.
fn toml_string(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostforge::config::Settings;
    use hostforge::model::{Topology, WebServer};
    use hostforge::store::Inventory;

    fn answers() -> Answers {
        Answers {
            host_id: "web1".into(),
            hostname: "203.0.113.10".into(),
            user: "deploy".into(),
            private_key: "/home/me/.ssh/id_ed25519".into(),
            topology: Some("standalone".into()),
            web_server: "apache".into(),
            domain: "example.com".into(),
            email: Some("ops@example.com".into()),
        }
    }

    #[test]
    fn scaffold_parses_back() {
        let (config, inventory) = render(&answers()).unwrap();

        let settings = Settings::from_toml(&config).unwrap();
        assert_eq!(settings.standalone.web_server, WebServer::Apache);
        assert_eq!(settings.standalone.certbot_email.as_deref(), Some("ops@example.com"));

        let inventory = Inventory::from_toml(&inventory).unwrap();
        let host = inventory.host("web1").unwrap();
        assert_eq!(host.topology, Some(Topology::Standalone));
        assert_eq!(host.active_credential().unwrap().id, "default");
        assert!(inventory.site("example.com").unwrap().ssl);
    }

    #[test]
    fn detect_topology_and_no_email_are_left_out() {
        let mut answers = answers();
        answers.topology = None;
        answers.email = None;
        answers.hostname = "host \"with\" quotes".into();
        let (config, inventory) = render(&answers).unwrap();

        assert!(Settings::from_toml(&config).unwrap().standalone.certbot_email.is_none());
        let inventory = Inventory::from_toml(&inventory).unwrap();
        let host = inventory.host("web1").unwrap();
        assert_eq!(host.topology, None);
        assert_eq!(host.hostname, "host \"with\" quotes");
        assert!(!inventory.site("example.com").unwrap().ssl);
    }
}
