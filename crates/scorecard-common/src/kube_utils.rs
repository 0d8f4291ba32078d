//! Kubernetes helpers shared by the harness and the CLI

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiResource, Discovery};
use kube::{Client, Config};
use tracing::debug;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Split an apiVersion into (group, version); the core group is "".
///
/// ```
/// use scorecard_common::kube_utils::parse_api_version;
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), ("".to_string(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Group/version/kind for a manifest's apiVersion and kind
pub fn gvk(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = parse_api_version(api_version);
    GroupVersionKind::gvk(&group, &version, kind)
}

/// Build an ApiResource from an explicit apiVersion and kind.
///
/// The plural is guessed; prefer discovery results when the type is installed.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Irregular plurals among the kinds a scorecard run typically touches
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("podsecuritypolicy", "podsecuritypolicies"),
    ("networkpolicy", "networkpolicies"),
    ("ingressclass", "ingressclasses"),
    ("storageclass", "storageclasses"),
    ("priorityclass", "priorityclasses"),
    ("runtimeclass", "runtimeclasses"),
];

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// True if `name` refers to `kind` as a kind, singular or plural resource name.
///
/// Comparison ignores case, so `memcacheds`, `Memcached` and `memcached`
/// all match the kind `Memcached`.
pub fn kind_matches(name: &str, kind: &str) -> bool {
    name.eq_ignore_ascii_case(kind) || name.eq_ignore_ascii_case(&pluralize_kind(kind))
}

/// Render matchLabels as a label selector string (`a=b,c=d`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Run a full discovery pass, retrying transient failures
pub async fn run_discovery(client: &Client) -> Result<Discovery, Error> {
    let discovery = retry_with_backoff(&RetryConfig::default(), "api_discovery", || {
        let client = client.clone();
        async move { Discovery::new(client).run().await }
    })
    .await
    .map_err(|e| {
        Error::internal_with_context("discovery", format!("API discovery failed: {}", e))
    })?;
    debug!(groups = discovery.groups().count(), "API discovery complete");
    Ok(discovery)
}
