use serde_json::{json, Value};

use super::kubernetes::SERVICE_ACCOUNT;
use super::naming::{validate_site_names, SiteNames};
use super::{site_labels, to_artifact, Artifact, ArtifactKind, Bundle};
use crate::config::KubernetesSettings;
use crate::error::Result;
use crate::model::Site;

/// Per-site isolation objects: a service account with a read-only role,
/// default-deny network policies with narrow exceptions, and a quota plus
/// limit range derived from the hosting plan.
pub fn security_objects(site: &Site, settings: &KubernetesSettings) -> Result<Bundle> {
    validate_site_names(site)?;
    let names = SiteNames::for_site(site);
    let ns = names.namespace();

    let artifacts = vec![
        service_account(ns)?,
        role(ns)?,
        role_binding(ns)?,
        network_policy(ns, "default-deny", json!({}), json!(["Ingress", "Egress"]), None, None)?,
        network_policy(
            ns,
            "allow-ingress-controller",
            json!({ "matchLabels": site_labels(ns, "web") }),
            json!(["Ingress"]),
            Some(json!([{
                "from": [{
                    "namespaceSelector": {
                        "matchLabels": { "kubernetes.io/metadata.name": settings.ingress_namespace },
                    },
                }],
                "ports": [{ "protocol": "TCP", "port": 80 }],
            }])),
            None,
        )?,
        network_policy(
            ns,
            "allow-dns-egress",
            json!({}),
            json!(["Egress"]),
            None,
            Some(json!([{
                "to": [{ "namespaceSelector": {} }],
                "ports": [
                    { "protocol": "UDP", "port": 53 },
                    { "protocol": "TCP", "port": 53 },
                ],
            }])),
        )?,
        network_policy(
            ns,
            "allow-same-namespace",
            json!({}),
            json!(["Ingress", "Egress"]),
            Some(json!([{ "from": [{ "podSelector": {} }] }])),
            Some(json!([{ "to": [{ "podSelector": {} }] }])),
        )?,
        resource_quota(site, ns)?,
        limit_range(site, ns)?,
    ];

    Ok(Bundle::new(artifacts))
}

fn metadata(name: &str, ns: &str) -> Value {
    json!({
        "name": name,
        "namespace": ns,
        "labels": site_labels(ns, "security"),
    })
}

fn service_account(ns: &str) -> Result<Artifact> {
    let doc = json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": metadata(SERVICE_ACCOUNT, ns),
        "automountServiceAccountToken": false,
    });
    to_artifact(ArtifactKind::ServiceAccount, SERVICE_ACCOUNT, &doc)
}

fn role(ns: &str) -> Result<Artifact> {
    let doc = json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "Role",
        "metadata": metadata(SERVICE_ACCOUNT, ns),
        "rules": [{
            "apiGroups": [""],
            "resources": ["configmaps", "pods"],
            "verbs": ["get", "list", "watch"],
        }],
    });
    to_artifact(ArtifactKind::Role, SERVICE_ACCOUNT, &doc)
}

fn role_binding(ns: &str) -> Result<Artifact> {
    let doc = json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "RoleBinding",
        "metadata": metadata(SERVICE_ACCOUNT, ns),
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "Role",
            "name": SERVICE_ACCOUNT,
        },
        "subjects": [{
            "kind": "ServiceAccount",
            "name": SERVICE_ACCOUNT,
            "namespace": ns,
        }],
    });
    to_artifact(ArtifactKind::RoleBinding, SERVICE_ACCOUNT, &doc)
}

fn network_policy(
    ns: &str,
    name: &str,
    pod_selector: Value,
    policy_types: Value,
    ingress: Option<Value>,
    egress: Option<Value>,
) -> Result<Artifact> {
    let mut spec = json!({
        "podSelector": pod_selector,
        "policyTypes": policy_types,
    });
    if let Some(ingress) = ingress {
        spec["ingress"] = ingress;
    }
    if let Some(egress) = egress {
        spec["egress"] = egress;
    }

    let doc = json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": metadata(name, ns),
        "spec": spec,
    });
    to_artifact(ArtifactKind::NetworkPolicy, name, &doc)
}

fn resource_quota(site: &Site, ns: &str) -> Result<Artifact> {
    let plan = &site.plan;
    let volumes = if site.database.is_some() { 2 } else { 1 };
    let doc = json!({
        "apiVersion": "v1",
        "kind": "ResourceQuota",
        "metadata": metadata("site-quota", ns),
        "spec": {
            "hard": {
                "pods": plan.max_pods.to_string(),
                "limits.cpu": format!("{}m", plan.cpu * plan.max_pods),
                "limits.memory": format!("{}Mi", plan.memory_mb * plan.max_pods),
                "persistentvolumeclaims": volumes.to_string(),
                "requests.storage": format!("{}Gi", plan.storage_gb * volumes),
            },
        },
    });
    to_artifact(ArtifactKind::ResourceQuota, "site-quota", &doc)
}

fn limit_range(site: &Site, ns: &str) -> Result<Artifact> {
    let plan = &site.plan;
    let doc = json!({
        "apiVersion": "v1",
        "kind": "LimitRange",
        "metadata": metadata("site-limits", ns),
        "spec": {
            "limits": [{
                "type": "Container",
                "max": { "cpu": plan.cpu_quantity(), "memory": plan.memory_quantity() },
                "default": { "cpu": plan.cpu_quantity(), "memory": plan.memory_quantity() },
                "defaultRequest": {
                    "cpu": format!("{}m", (plan.cpu / 4).max(1)),
                    "memory": format!("{}Mi", (plan.memory_mb / 4).max(1)),
                },
            }],
        },
    });
    to_artifact(ArtifactKind::LimitRange, "site-limits", &doc)
}
