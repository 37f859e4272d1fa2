use serde_json::{json, Value};

use super::naming::{validate_site_names, SiteNames};
use super::{nginx_pod_config, site_labels, to_artifact, Artifact, ArtifactKind, Bundle};
use crate::config::KubernetesSettings;
use crate::error::Result;
use crate::model::{DatabaseSpec, Site};

pub(crate) const WEB_NAME: &str = "web";
pub(crate) const DB_NAME: &str = "db";
pub(crate) const SERVICE_ACCOUNT: &str = "site";
const SECRET_NAME: &str = "site-env";
const CONFIG_NAME: &str = "web-config";
const CONTENT_PVC: &str = "content";
const DB_PVC: &str = "db-data";
const TLS_SECRET: &str = "web-tls";
const CONTENT_PATH: &str = "/var/www/html";

/// Sidecars get a small fixed budget, capped by the plan.
const SIDECAR_CPU_MILLIS: u32 = 100;
const SIDECAR_MEMORY_MB: u32 = 128;

/// Render the workload bundle for a site: Namespace, Secret, ConfigMap, PVC,
/// Deployment, Service and Ingress, plus a database StatefulSet, Service and
/// PVC when the site requests one.
pub fn kubernetes_manifests(site: &Site, settings: &KubernetesSettings) -> Result<Bundle> {
    validate_site_names(site)?;
    let names = SiteNames::for_site(site);
    let ns = names.namespace();

    let mut artifacts = vec![
        namespace(&names)?,
        secret(site, ns)?,
        config_map(site, ns)?,
        pvc(CONTENT_PVC, ns, &site.plan.storage_quantity(), settings, WEB_NAME)?,
        deployment(site, ns, settings)?,
        service(WEB_NAME, ns, 80, WEB_NAME)?,
        ingress(site, ns, settings)?,
    ];

    if let Some(db) = &site.database {
        artifacts.push(pvc(DB_PVC, ns, &site.plan.storage_quantity(), settings, DB_NAME)?);
        artifacts.push(stateful_set(site, db, ns)?);
        artifacts.push(service(DB_NAME, ns, db.engine.port(), DB_NAME)?);
    }

    Ok(Bundle::new(artifacts))
}

fn metadata(name: &str, ns: &str, component: &str) -> Value {
    json!({
        "name": name,
        "namespace": ns,
        "labels": site_labels(ns, component),
    })
}

fn namespace(names: &SiteNames) -> Result<Artifact> {
    let doc = json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": names.namespace(),
            "labels": site_labels(names.namespace(), "site"),
        },
    });
    to_artifact(ArtifactKind::Namespace, names.namespace(), &doc)
}

fn secret(site: &Site, ns: &str) -> Result<Artifact> {
    let mut data = serde_json::Map::new();
    data.insert("SITE_DOMAIN".into(), json!(site.domain));
    if let Some(db) = &site.database {
        data.insert("DB_CONNECTION".into(), json!(db.engine.as_str()));
        data.insert("DB_HOST".into(), json!(DB_NAME));
        data.insert("DB_PORT".into(), json!(db.engine.port().to_string()));
        data.insert("DB_DATABASE".into(), json!(db.name));
        data.insert("DB_USERNAME".into(), json!(db.user));
        data.insert("DB_PASSWORD".into(), json!(db.password));
    }

    let doc = json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "Opaque",
        "metadata": metadata(SECRET_NAME, ns, "site"),
        "stringData": data,
    });
    to_artifact(ArtifactKind::Secret, SECRET_NAME, &doc)
}

fn config_map(site: &Site, ns: &str) -> Result<Artifact> {
    let conf = nginx_pod_config(site, "127.0.0.1:9000")?;
    let doc = json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": metadata(CONFIG_NAME, ns, WEB_NAME),
        "data": { "default.conf": conf },
    });
    to_artifact(ArtifactKind::ConfigMap, CONFIG_NAME, &doc)
}

fn pvc(
    name: &str,
    ns: &str,
    size: &str,
    settings: &KubernetesSettings,
    component: &str,
) -> Result<Artifact> {
    let mut spec = json!({
        "accessModes": ["ReadWriteOnce"],
        "resources": { "requests": { "storage": size } },
    });
    if let Some(class) = &settings.storage_class {
        spec["storageClassName"] = json!(class);
    }

    let doc = json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": metadata(name, ns, component),
        "spec": spec,
    });
    to_artifact(ArtifactKind::PersistentVolumeClaim, name, &doc)
}

fn limits(cpu_millis: u32, memory_mb: u32) -> Value {
    json!({
        "limits": {
            "cpu": format!("{}m", cpu_millis),
            "memory": format!("{}Mi", memory_mb),
        },
        "requests": {
            "cpu": format!("{}m", (cpu_millis / 4).max(1)),
            "memory": format!("{}Mi", (memory_mb / 4).max(1)),
        },
    })
}

fn deployment(site: &Site, ns: &str, settings: &KubernetesSettings) -> Result<Artifact> {
    let plan = &site.plan;
    let sidecar = limits(
        SIDECAR_CPU_MILLIS.min(plan.cpu),
        SIDECAR_MEMORY_MB.min(plan.memory_mb),
    );

    let mut containers = vec![
        json!({
            "name": "nginx",
            "image": settings.nginx_image,
            "ports": [{ "name": "http", "containerPort": 80 }],
            "resources": sidecar,
            "volumeMounts": [
                { "name": "content", "mountPath": CONTENT_PATH },
                { "name": "config", "mountPath": "/etc/nginx/conf.d", "readOnly": true },
            ],
            "readinessProbe": {
                "tcpSocket": { "port": 80 },
                "periodSeconds": 10,
            },
        }),
        json!({
            "name": "php",
            "image": settings.php_image_for(&plan.php_version),
            "ports": [{ "name": "fastcgi", "containerPort": 9000 }],
            "envFrom": [{ "secretRef": { "name": SECRET_NAME } }],
            "resources": limits(plan.cpu, plan.memory_mb),
            "volumeMounts": [{ "name": "content", "mountPath": CONTENT_PATH }],
        }),
    ];
    if plan.has_addon("redis") {
        containers.push(json!({
            "name": "redis",
            "image": settings.redis_image,
            "ports": [{ "name": "redis", "containerPort": 6379 }],
            "resources": sidecar,
        }));
    }

    let doc = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": metadata(WEB_NAME, ns, WEB_NAME),
        "spec": {
            "replicas": 1,
            "strategy": { "type": "Recreate" },
            "selector": { "matchLabels": site_labels(ns, WEB_NAME) },
            "template": {
                "metadata": { "labels": site_labels(ns, WEB_NAME) },
                "spec": {
                    "serviceAccountName": SERVICE_ACCOUNT,
                    "automountServiceAccountToken": false,
                    "containers": containers,
                    "volumes": [
                        { "name": "content", "persistentVolumeClaim": { "claimName": CONTENT_PVC } },
                        { "name": "config", "configMap": { "name": CONFIG_NAME } },
                    ],
                },
            },
        },
    });
    to_artifact(ArtifactKind::Deployment, WEB_NAME, &doc)
}

fn stateful_set(site: &Site, db: &DatabaseSpec, ns: &str) -> Result<Artifact> {
    let (db_var, user_var, pass_var, root_var) = db.engine.env_names();
    let secret_ref = |key: &str| json!({ "secretKeyRef": { "name": SECRET_NAME, "key": key } });

    let mut env = vec![
        json!({ "name": db_var, "valueFrom": secret_ref("DB_DATABASE") }),
        json!({ "name": user_var, "valueFrom": secret_ref("DB_USERNAME") }),
        json!({ "name": pass_var, "valueFrom": secret_ref("DB_PASSWORD") }),
    ];
    if let Some(root_var) = root_var {
        env.push(json!({ "name": root_var, "valueFrom": secret_ref("DB_PASSWORD") }));
    }

    let doc = json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": metadata(DB_NAME, ns, DB_NAME),
        "spec": {
            "serviceName": DB_NAME,
            "replicas": 1,
            "selector": { "matchLabels": site_labels(ns, DB_NAME) },
            "template": {
                "metadata": { "labels": site_labels(ns, DB_NAME) },
                "spec": {
                    "serviceAccountName": SERVICE_ACCOUNT,
                    "automountServiceAccountToken": false,
                    "containers": [{
                        "name": db.engine.as_str(),
                        "image": db.engine.image(),
                        "ports": [{ "name": "db", "containerPort": db.engine.port() }],
                        "env": env,
                        "resources": limits(site.plan.cpu, site.plan.memory_mb),
                        "volumeMounts": [{ "name": "data", "mountPath": db.engine.data_dir() }],
                    }],
                    "volumes": [
                        { "name": "data", "persistentVolumeClaim": { "claimName": DB_PVC } },
                    ],
                },
            },
        },
    });
    to_artifact(ArtifactKind::StatefulSet, DB_NAME, &doc)
}

fn service(name: &str, ns: &str, port: u16, component: &str) -> Result<Artifact> {
    let doc = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": metadata(name, ns, component),
        "spec": {
            "selector": site_labels(ns, component),
            "ports": [{ "name": "main", "port": port, "targetPort": port }],
        },
    });
    to_artifact(ArtifactKind::Service, name, &doc)
}

fn ingress(site: &Site, ns: &str, settings: &KubernetesSettings) -> Result<Artifact> {
    let hosts = site.server_names();
    let rules: Vec<Value> = hosts
        .iter()
        .map(|host| {
            json!({
                "host": host,
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": { "service": { "name": WEB_NAME, "port": { "number": 80 } } },
                    }],
                },
            })
        })
        .collect();

    let mut meta = metadata(WEB_NAME, ns, WEB_NAME);
    let mut spec = json!({
        "ingressClassName": settings.ingress_class,
        "rules": rules,
    });
    if site.ssl {
        meta["annotations"] = json!({ "cert-manager.io/cluster-issuer": settings.cluster_issuer });
        spec["tls"] = json!([{ "hosts": hosts, "secretName": TLS_SECRET }]);
    }

    let doc = json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": meta,
        "spec": spec,
    });
    to_artifact(ArtifactKind::Ingress, WEB_NAME, &doc)
}
