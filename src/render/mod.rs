//! Pure artifact generators: the same site and settings always render the
//! same bytes.

mod compose;
mod kubernetes;
pub mod naming;
mod security;
mod vhost;

use std::fmt;

use minijinja::Environment;
use serde::Serialize;

use crate::error::Result;

pub use compose::{compose_definition, compose_services, nginx_pod_config, ComposeService};
pub use kubernetes::kubernetes_manifests;
pub use naming::{sanitize_name, validate_domain, validate_site_names, SiteNames, DNS_LABEL_MAX};
pub use security::security_objects;
pub use vhost::{virtual_host, VhostTarget};

/// Kubernetes object kinds in the order they must be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    Namespace,
    ServiceAccount,
    Role,
    RoleBinding,
    NetworkPolicy,
    ResourceQuota,
    LimitRange,
    Secret,
    ConfigMap,
    PersistentVolumeClaim,
    Deployment,
    StatefulSet,
    Service,
    Ingress,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Namespace => "Namespace",
            ArtifactKind::ServiceAccount => "ServiceAccount",
            ArtifactKind::Role => "Role",
            ArtifactKind::RoleBinding => "RoleBinding",
            ArtifactKind::NetworkPolicy => "NetworkPolicy",
            ArtifactKind::ResourceQuota => "ResourceQuota",
            ArtifactKind::LimitRange => "LimitRange",
            ArtifactKind::Secret => "Secret",
            ArtifactKind::ConfigMap => "ConfigMap",
            ArtifactKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ArtifactKind::Deployment => "Deployment",
            ArtifactKind::StatefulSet => "StatefulSet",
            ArtifactKind::Service => "Service",
            ArtifactKind::Ingress => "Ingress",
        }
    }

    /// Workloads share a rank; everything else applies strictly in
    /// declaration order.
    fn apply_rank(&self) -> u8 {
        match self {
            ArtifactKind::Namespace => 0,
            ArtifactKind::ServiceAccount => 1,
            ArtifactKind::Role => 2,
            ArtifactKind::RoleBinding => 3,
            ArtifactKind::NetworkPolicy => 4,
            ArtifactKind::ResourceQuota => 5,
            ArtifactKind::LimitRange => 6,
            ArtifactKind::Secret => 7,
            ArtifactKind::ConfigMap => 8,
            ArtifactKind::PersistentVolumeClaim => 9,
            ArtifactKind::Deployment | ArtifactKind::StatefulSet => 10,
            ArtifactKind::Service => 11,
            ArtifactKind::Ingress => 12,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named YAML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
    pub content: String,
}

impl Artifact {
    /// File name used when the artifact is staged on a remote host, prefixed
    /// with its position so a directory listing shows the apply order.
    pub fn file_name(&self, index: usize) -> String {
        format!(
            "{:02}-{}-{}.yaml",
            index,
            self.kind.as_str().to_lowercase(),
            self.name
        )
    }
}

/// Ordered, immutable set of artifacts for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    artifacts: Vec<Artifact>,
}

impl Bundle {
    /// Build a bundle, sorting by apply order. The sort is stable so
    /// artifacts of the same rank keep their relative order.
    pub fn new(mut artifacts: Vec<Artifact>) -> Self {
        artifacts.sort_by_key(|a| a.kind.apply_rank());
        Self { artifacts }
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.kind == kind)
    }

    pub fn kinds(&self) -> Vec<ArtifactKind> {
        self.artifacts.iter().map(|a| a.kind).collect()
    }

    /// Concatenate two bundles, keeping the combined apply order.
    pub fn merge(self, other: Bundle) -> Bundle {
        let mut artifacts = self.artifacts;
        artifacts.extend(other.artifacts);
        Bundle::new(artifacts)
    }

    /// All documents as one multi-document YAML stream.
    pub fn to_yaml_stream(&self) -> String {
        self.artifacts
            .iter()
            .map(|a| a.content.trim_end())
            .collect::<Vec<_>>()
            .join("\n---\n")
            + "\n"
    }
}

fn to_artifact(kind: ArtifactKind, name: &str, value: &serde_json::Value) -> Result<Artifact> {
    Ok(Artifact {
        kind,
        name: name.to_string(),
        content: serde_yaml::to_string(value)?,
    })
}

pub(crate) fn render_template<S: Serialize>(name: &str, source: &str, ctx: S) -> Result<String> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template(name, source)?;
    let rendered = env.get_template(name)?.render(ctx)?;
    Ok(rendered)
}

/// Labels shared by every object belonging to a site.
fn site_labels(slug: &str, component: &str) -> serde_json::Value {
    serde_json::json!({
        "app.kubernetes.io/name": component,
        "app.kubernetes.io/instance": slug,
        "app.kubernetes.io/managed-by": "hostforge",
    })
}
