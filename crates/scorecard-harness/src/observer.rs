//! Reading the proxy sidecar's request log
//!
//! The proxy logs one JSON record per request it forwards. Lines that are
//! not JSON (startup banners, stack traces) are skipped.

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::debug;

use scorecard_common::Error;

use crate::cluster::ClusterApi;

/// Log message the proxy uses for per-request records
const REQUEST_INFO_MSG: &str = "Request Info";

#[derive(Debug, Default, Deserialize)]
struct ProxyRecord {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

fn records(logs: &str) -> impl Iterator<Item = ProxyRecord> + '_ {
    logs.lines()
        .filter_map(|line| serde_json::from_str::<ProxyRecord>(line.trim()).ok())
}

/// True if any record is a PUT or POST
pub fn has_write_traffic(logs: &str) -> bool {
    records(logs).any(|r| matches!(r.method.as_deref(), Some("PUT") | Some("POST")))
}

/// Fetch the container's full log and look for PUT/POST requests
pub async fn detect_write_traffic(
    cluster: &dyn ClusterApi,
    namespace: &str,
    pod: &str,
    container: &str,
) -> Result<bool, Error> {
    let logs = cluster.pod_logs(namespace, pod, container).await?;
    let found = has_write_traffic(&logs);
    debug!(pod, container, found, "scanned proxy log for writes");
    Ok(found)
}

/// An API resource the operator touched, as seen in a request path
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UsedResource {
    /// API group; empty for the core group
    pub group: String,
    /// API version, e.g. `v1`
    pub version: String,
    /// Plural resource name from the path, e.g. `pods`
    pub resource: String,
}

/// Parse an API request path into the resource it addresses.
///
/// Handles core (`/api/v1/...`) and group (`/apis/g/v/...`) paths, namespaced
/// and cluster-scoped, collection and single-object forms, with or without a
/// query string.
pub fn parse_request_uri(uri: &str) -> Option<UsedResource> {
    let path = uri.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let (group, version, rest) = match segments.as_slice() {
        ["api", version, rest @ ..] => ("", *version, rest),
        ["apis", group, version, rest @ ..] => (*group, *version, rest),
        _ => return None,
    };

    let resource = match rest {
        ["namespaces", _, resource, ..] => *resource,
        ["namespaces", ..] => "namespaces",
        [resource, ..] => *resource,
        [] => return None,
    };

    Some(UsedResource {
        group: group.to_string(),
        version: version.to_string(),
        resource: resource.to_string(),
    })
}

/// Resources named in the proxy's "Request Info" records
pub fn used_resources(logs: &str) -> BTreeSet<UsedResource> {
    records(logs)
        .filter(|r| r.msg.as_deref() == Some(REQUEST_INFO_MSG))
        .filter_map(|r| r.uri.as_deref().and_then(parse_request_uri))
        .collect()
}
