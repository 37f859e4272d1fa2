use anyhow::{Context, Result};
use std::path::Path;

use hostforge::config::Settings;
use hostforge::model::{Site, Topology};
use hostforge::render::{self, Bundle, VhostTarget};
use hostforge::store::Store;

use super::RenderKind;
use crate::output;

pub fn run(
    settings: &Settings,
    store: &dyn Store,
    domain: &str,
    kind: Option<RenderKind>,
    tls: bool,
    out: Option<&Path>,
) -> Result<()> {
    let site = store
        .site(domain)?
        .with_context(|| format!("Site {} is not in the inventory", domain))?;
    let kind = match kind {
        Some(kind) => kind,
        None => default_kind(store, &site)?,
    };

    // (file name, contents)
    let documents: Vec<(String, String)> = match kind {
        RenderKind::K8s => {
            let bundle: Bundle = render::security_objects(&site, &settings.kubernetes)?
                .merge(render::kubernetes_manifests(&site, &settings.kubernetes)?);
            match out {
                Some(_) => bundle
                    .artifacts()
                    .iter()
                    .enumerate()
                    .map(|(i, a)| (a.file_name(i), a.content.clone()))
                    .collect(),
                None => vec![("manifests.yaml".to_string(), bundle.to_yaml_stream())],
            }
        }
        RenderKind::Compose => vec![
            (
                "docker-compose.yml".to_string(),
                render::compose_definition(&site, &settings.compose)?,
            ),
            ("nginx.conf".to_string(), render::nginx_pod_config(&site, "php:9000")?),
        ],
        RenderKind::Vhost => {
            let target = VhostTarget::for_site(&site, &settings.standalone);
            vec![(
                format!("{}.conf", site.domain),
                render::virtual_host(&site, &target, tls)?,
            )]
        }
    };

    match out {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            for (name, content) in &documents {
                let path = dir.join(name);
                std::fs::write(&path, content)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            output::success(&format!(
                "Wrote {} file(s) to {}",
                documents.len(),
                dir.display()
            ));
        }
        None => {
            for (i, (name, content)) in documents.iter().enumerate() {
                if documents.len() > 1 {
                    if i > 0 {
                        println!();
                    }
                    println!("# {}", name);
                }
                print!("{}", content);
            }
        }
    }
    Ok(())
}

/// Generator matching the site's own topology, or the host's tag. Rendering
/// never probes the environment; untagged sites render as virtual hosts.
fn default_kind(store: &dyn Store, site: &Site) -> Result<RenderKind> {
    let host_topology = store.host(&site.host)?.and_then(|h| h.topology);
    Ok(match site.topology.or(host_topology) {
        Some(Topology::Kubernetes) => RenderKind::K8s,
        Some(Topology::ContainerHost) => RenderKind::Compose,
        Some(Topology::Standalone) | None => RenderKind::Vhost,
    })
}
