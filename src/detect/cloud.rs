use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::model::CloudProvider;

struct MetadataEndpoint {
    provider: CloudProvider,
    url: &'static str,
    header: Option<(&'static str, &'static str)>,
    /// IMDSv2-only EC2 instances answer tokenless requests with 401.
    unauthorized_counts: bool,
}

/// Tried in order; the first endpoint that answers wins. Several providers
/// also serve the EC2-style `/latest/meta-data` tree on 169.254.169.254, so
/// the provider-specific paths go first and the generic one last.
const METADATA_ENDPOINTS: &[MetadataEndpoint] = &[
    MetadataEndpoint {
        provider: CloudProvider::Gcp,
        url: "http://metadata.google.internal/computeMetadata/v1/instance/id",
        header: Some(("Metadata-Flavor", "Google")),
        unauthorized_counts: false,
    },
    MetadataEndpoint {
        provider: CloudProvider::Azure,
        url: "http://169.254.169.254/metadata/instance?api-version=2021-02-01",
        header: Some(("Metadata", "true")),
        unauthorized_counts: false,
    },
    MetadataEndpoint {
        provider: CloudProvider::DigitalOcean,
        url: "http://169.254.169.254/metadata/v1/id",
        header: None,
        unauthorized_counts: false,
    },
    MetadataEndpoint {
        provider: CloudProvider::Hetzner,
        url: "http://169.254.169.254/hetzner/v1/metadata/instance-id",
        header: None,
        unauthorized_counts: false,
    },
    MetadataEndpoint {
        provider: CloudProvider::Oracle,
        url: "http://169.254.169.254/opc/v2/instance/",
        header: Some(("Authorization", "Bearer Oracle")),
        unauthorized_counts: false,
    },
    MetadataEndpoint {
        provider: CloudProvider::Alibaba,
        url: "http://100.100.100.200/latest/meta-data/instance-id",
        header: None,
        unauthorized_counts: false,
    },
    MetadataEndpoint {
        provider: CloudProvider::Aws,
        url: "http://169.254.169.254/latest/meta-data/instance-id",
        header: None,
        unauthorized_counts: true,
    },
];

/// Query each metadata endpoint in turn, each bounded by `timeout`.
pub(super) async fn query_metadata(timeout: Duration) -> Option<CloudProvider> {
    let client = match reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .no_proxy()
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            debug!("Cannot build metadata client: {}", e);
            return None;
        }
    };

    first_answering(METADATA_ENDPOINTS, |endpoint| {
        let mut request = client.get(endpoint.url);
        if let Some((name, value)) = endpoint.header {
            request = request.header(name, value);
        }
        async move {
            match request.send().await {
                Ok(response) => Some(response.status()),
                Err(e) => {
                    debug!("No {} metadata: {}", endpoint.provider, e);
                    None
                }
            }
        }
    })
    .await
}

async fn first_answering<F, Fut>(
    endpoints: &'static [MetadataEndpoint],
    mut fetch: F,
) -> Option<CloudProvider>
where
    F: FnMut(&'static MetadataEndpoint) -> Fut,
    Fut: Future<Output = Option<StatusCode>>,
{
    for endpoint in endpoints {
        let Some(status) = fetch(endpoint).await else {
            continue;
        };
        if status.is_success() || (endpoint.unauthorized_counts && status == StatusCode::UNAUTHORIZED) {
            debug!("Metadata endpoint for {} answered {}", endpoint.provider, status);
            return Some(endpoint.provider);
        }
    }
    None
}

const ENV_HINTS: &[(&str, CloudProvider)] = &[
    ("AWS_REGION", CloudProvider::Aws),
    ("AWS_EXECUTION_ENV", CloudProvider::Aws),
    ("GOOGLE_CLOUD_PROJECT", CloudProvider::Gcp),
    ("AZURE_SUBSCRIPTION_ID", CloudProvider::Azure),
    ("WEBSITE_INSTANCE_ID", CloudProvider::Azure),
    ("DIGITALOCEAN_TOKEN", CloudProvider::DigitalOcean),
    ("HCLOUD_TOKEN", CloudProvider::Hetzner),
    ("OCI_RESOURCE_PRINCIPAL_VERSION", CloudProvider::Oracle),
    ("ALIBABA_CLOUD_REGION_ID", CloudProvider::Alibaba),
];

pub(super) fn provider_from_env(env: &HashMap<String, String>) -> Option<CloudProvider> {
    ENV_HINTS
        .iter()
        .find(|(name, _)| env.get(*name).is_some_and(|v| !v.is_empty()))
        .map(|(_, provider)| *provider)
}

const PROVIDER_ID_PREFIXES: &[(&str, CloudProvider)] = &[
    ("aws://", CloudProvider::Aws),
    ("gce://", CloudProvider::Gcp),
    ("azure://", CloudProvider::Azure),
    ("digitalocean://", CloudProvider::DigitalOcean),
    ("hcloud://", CloudProvider::Hetzner),
    ("oci://", CloudProvider::Oracle),
    ("alicloud://", CloudProvider::Alibaba),
];

const NODE_LABEL_HINTS: &[(&str, CloudProvider)] = &[
    ("eks.amazonaws.com/nodegroup", CloudProvider::Aws),
    ("cloud.google.com/gke-nodepool", CloudProvider::Gcp),
    ("kubernetes.azure.com/cluster", CloudProvider::Azure),
    ("doks.digitalocean.com/node-id", CloudProvider::DigitalOcean),
    ("csi.hetzner.cloud/location", CloudProvider::Hetzner),
    ("oci.oraclecloud.com/fault-domain", CloudProvider::Oracle),
    ("alibabacloud.com/nodepool-id", CloudProvider::Alibaba),
];

/// Classify a `kubectl get nodes -o json` document by `spec.providerID`
/// prefix, falling back to well-known node labels.
pub(super) fn provider_from_nodes(nodes: &Value) -> Option<CloudProvider> {
    let items = nodes.get("items")?.as_array()?;

    let by_provider_id = items.iter().find_map(|node| {
        let id = node.pointer("/spec/providerID")?.as_str()?;
        PROVIDER_ID_PREFIXES
            .iter()
            .find(|(prefix, _)| id.starts_with(prefix))
            .map(|(_, provider)| *provider)
    });
    if by_provider_id.is_some() {
        return by_provider_id;
    }

    items.iter().find_map(|node| {
        let labels = node.pointer("/metadata/labels")?.as_object()?;
        NODE_LABEL_HINTS
            .iter()
            .find(|(label, _)| labels.contains_key(*label))
            .map(|(_, provider)| *provider)
    })
}
