//! Resource provisioning
//!
//! Creates manifest resources in the run namespace, wires the proxy sidecar
//! into the operator Deployment and registers a teardown for everything it
//! creates.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, KeyToPath, ObjectFieldSelector, Pod, Secret,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::DynamicObject;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use scorecard_common::kube_utils::label_selector;
use scorecard_common::{poll_for, poll_until, Error, PROXY_CONTAINER_NAME, PROXY_URL};

use crate::cleanup::{delete_and_confirm, CleanupLedger};
use crate::cluster::{ClusterApi, ObjectKey};
use crate::config::PullPolicy;
use crate::context::Timing;
use crate::manifest::{load_resources, ManifestSource};

/// Secret holding the proxy kubeconfig
pub const KUBECONFIG_SECRET_NAME: &str = "scorecard-kubeconfig";
/// Key of the kubeconfig inside the secret
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";
/// Where the secret is mounted in every workload container
pub const KUBECONFIG_MOUNT_PATH: &str = "/scorecard-secret";
const KUBECONFIG_FILE: &str = "config";
const KUBECONFIG_ENV: &str = "KUBECONFIG";
const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";

/// Image and pull policy of the injected proxy container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxySettings {
    /// Proxy container image
    pub image: String,
    /// Pull policy for that image
    pub pull_policy: PullPolicy,
}

/// Creates resources for one CR run and remembers how to remove them
pub struct Provisioner {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    proxy: ProxySettings,
    timing: Timing,
    ledger: CleanupLedger,
    workload: Option<String>,
    proxy_pod: Option<Pod>,
    workload_tx: Option<Arc<watch::Sender<Option<ObjectKey>>>>,
}

impl Provisioner {
    /// Provisioner for `namespace` with nothing created yet
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        namespace: impl Into<String>,
        proxy: ProxySettings,
        timing: Timing,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            proxy,
            timing,
            ledger: CleanupLedger::new(),
            workload: None,
            proxy_pod: None,
            workload_tx: None,
        }
    }

    /// Publish the workload's identity on `tx` once it is created
    pub fn with_workload_watch(mut self, tx: Arc<watch::Sender<Option<ObjectKey>>>) -> Self {
        self.workload_tx = Some(tx);
        self
    }

    /// Pod running the workload and the proxy, once located
    pub fn proxy_pod(&self) -> Option<&Pod> {
        self.proxy_pod.as_ref()
    }

    /// Registered teardown actions
    pub fn ledger(&self) -> &CleanupLedger {
        &self.ledger
    }

    /// Create every resource in `source`, in document order
    pub async fn create_all(&mut self, source: &ManifestSource) -> Result<(), Error> {
        let resources = load_resources(source)?;
        info!(source = %source, count = resources.len(), "provisioning manifest");
        for object in resources {
            self.create_one(object).await?;
        }
        Ok(())
    }

    /// Create one resource in the run namespace.
    ///
    /// A Deployment becomes the workload: it gets the proxy sidecar, and the
    /// call returns only once its pod exists.
    pub async fn create_one(&mut self, mut object: DynamicObject) -> Result<DynamicObject, Error> {
        object.metadata.namespace = Some(self.namespace.clone());
        let is_workload = object
            .types
            .as_ref()
            .is_some_and(|t| t.kind == "Deployment");

        let mut selector = None;
        if is_workload {
            let name = object.metadata.name.clone().unwrap_or_default();
            if let Some(existing) = &self.workload {
                return Err(Error::MultipleWorkloads {
                    existing: existing.clone(),
                    rejected: name,
                });
            }
            let mut deployment = dynamic_to_deployment(&object)?;
            selector = Some(workload_selector(&deployment)?);
            self.workload = Some(name);

            self.create_kubeconfig_secret().await?;
            inject_proxy(&mut deployment, &self.proxy);
            object = deployment_to_dynamic(&deployment)?;
        }

        let created = self.create_with_discovery_retry(&object).await?;
        let key = ObjectKey::from_object(&created)?;
        info!(kind = %key.kind, name = %key.name, namespace = ?key.namespace, "created resource");
        self.register_cleanup(key.clone());

        if let Some(selector) = selector {
            if let Some(tx) = &self.workload_tx {
                tx.send_replace(Some(key.clone()));
            }
            self.proxy_pod = Some(self.wait_for_pod(&key, &selector).await?);
        }
        Ok(created)
    }

    /// Adopt a workload that is already running, such as one installed by
    /// OLM. Its pod becomes the proxy pod; nothing is created, published or
    /// registered for cleanup.
    pub async fn attach_workload(&mut self, name: &str) -> Result<Pod, Error> {
        let key = ObjectKey::namespaced("apps/v1", "Deployment", self.namespace.clone(), name);
        let object = self.cluster.get(&key).await?.ok_or_else(|| {
            Error::internal_with_context("provisioner", format!("{} does not exist", key))
        })?;
        let deployment = dynamic_to_deployment(&object)?;
        let selector = workload_selector(&deployment)?;
        self.workload = Some(name.to_string());

        let pod = self.wait_for_pod(&key, &selector).await?;
        self.proxy_pod = Some(pod.clone());
        Ok(pod)
    }

    /// Run all registered teardowns, newest first
    pub async fn cleanup(&mut self) -> Result<(), Error> {
        let result = self.ledger.drain().await;
        if let Some(tx) = &self.workload_tx {
            tx.send_replace(None);
        }
        self.workload = None;
        self.proxy_pod = None;
        result
    }

    fn register_cleanup(&mut self, key: ObjectKey) {
        let cluster = Arc::clone(&self.cluster);
        let poll = self.timing.cleanup;
        self.ledger.push(format!("delete {}", key), move || {
            delete_and_confirm(cluster, key, poll)
        });
    }

    async fn create_kubeconfig_secret(&mut self) -> Result<(), Error> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(KUBECONFIG_SECRET_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            string_data: Some(
                [(
                    KUBECONFIG_SECRET_KEY.to_string(),
                    proxy_kubeconfig(&self.namespace)?,
                )]
                .into(),
            ),
            ..Default::default()
        };
        let object = to_dynamic("Secret", "v1", &secret)?;
        let created = self.cluster.create(&object).await?;
        let key = ObjectKey::from_object(&created)?;
        debug!(name = KUBECONFIG_SECRET_NAME, namespace = %self.namespace, "created proxy kubeconfig");
        self.register_cleanup(key);
        Ok(())
    }

    /// Create, retrying once if the type has just been registered and
    /// discovery has not caught up yet. The first error wins.
    async fn create_with_discovery_retry(
        &self,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let original = match self.cluster.create(object).await {
            Ok(created) => return Ok(created),
            Err(e) => e,
        };

        let key = ObjectKey::from_object(object)?;
        let gvk = key.gvk();
        if self.cluster.is_served(&gvk).await {
            return Err(original);
        }

        debug!(kind = %key.kind, error = %original, "type not yet discovered, refreshing");
        let cluster = self.cluster.as_ref();
        let gvk_ref = &gvk;
        let operation = format!("discovery of {}", key.kind);
        let discovered = poll_until(&self.timing.discovery, &operation, || async move {
            if let Err(e) = cluster.refresh_discovery().await {
                debug!(error = %e, "discovery refresh failed");
                return Ok(false);
            }
            Ok(cluster.is_served(gvk_ref).await)
        })
        .await;
        if discovered.is_err() {
            return Err(original);
        }

        self.cluster.create(object).await.map_err(|retry| {
            warn!(kind = %key.kind, name = %key.name, error = %retry, "retry after discovery failed");
            original
        })
    }

    async fn wait_for_pod(&self, workload: &ObjectKey, selector: &str) -> Result<Pod, Error> {
        let cluster = self.cluster.as_ref();
        let namespace = self.namespace.as_str();
        let operation = format!("pod of {}", workload);
        let pod = poll_for(&self.timing.pod, &operation, || async move {
            let mut live: Vec<Pod> = cluster
                .list_pods(namespace, selector)
                .await?
                .into_iter()
                .filter(|p| p.metadata.deletion_timestamp.is_none())
                .collect();
            match live.len() {
                0 => Ok(None),
                1 => Ok(live.pop()),
                n => Err(Error::internal_with_context(
                    "provisioner",
                    format!("{} pods match selector '{}', expected one", n, selector),
                )),
            }
        })
        .await?;
        info!(pod = ?pod.metadata.name, workload = %workload, "located workload pod");
        Ok(pod)
    }
}

fn to_dynamic<T: serde::Serialize>(
    kind: &str,
    api_version: &str,
    typed: &T,
) -> Result<DynamicObject, Error> {
    let mut value =
        serde_json::to_value(typed).map_err(|e| Error::conversion(kind, e.to_string()))?;
    value["apiVersion"] = json!(api_version);
    value["kind"] = json!(kind);
    serde_json::from_value(value).map_err(|e| Error::conversion(kind, e.to_string()))
}

/// Generic object to typed Deployment
pub fn dynamic_to_deployment(object: &DynamicObject) -> Result<Deployment, Error> {
    let value =
        serde_json::to_value(object).map_err(|e| Error::conversion("Deployment", e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::conversion("Deployment", e.to_string()))
}

/// Typed Deployment back to a generic object
pub fn deployment_to_dynamic(deployment: &Deployment) -> Result<DynamicObject, Error> {
    to_dynamic("Deployment", "apps/v1", deployment)
}

fn workload_selector(deployment: &Deployment) -> Result<String, Error> {
    let selector = deployment
        .spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.as_ref())
        .map(label_selector)
        .unwrap_or_default();
    if selector.is_empty() {
        return Err(Error::validation_for_field(
            "namespaced-manifest",
            format!(
                "Deployment {} has no spec.selector.matchLabels",
                deployment.metadata.name.as_deref().unwrap_or_default()
            ),
        ));
    }
    Ok(selector)
}

/// Kubeconfig that sends every request through the sidecar.
///
/// The username carries a base64 owner reference, which the proxy uses to
/// attribute requests.
pub fn proxy_kubeconfig(namespace: &str) -> Result<String, Error> {
    let owner = OwnerReference {
        name: "scorecard".to_string(),
        ..Default::default()
    };
    let owner_json = serde_json::to_vec(&owner)
        .map_err(|e| Error::serialization_for_kind("OwnerReference", e.to_string()))?;
    let context = format!("{}/proxy-server", namespace);

    let doc = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": "proxy-server",
            "cluster": {"server": PROXY_URL, "insecure-skip-tls-verify": true},
        }],
        "contexts": [{
            "name": &context,
            "context": {
                "cluster": "proxy-server",
                "namespace": namespace,
                "user": "admin/proxy-server",
            },
        }],
        "current-context": &context,
        "preferences": {},
        "users": [{
            "name": "admin/proxy-server",
            "user": {"username": URL_SAFE.encode(owner_json), "password": "unused"},
        }],
    });
    serde_yaml::to_string(&doc).map_err(|e| Error::serialization_for_kind("kubeconfig", e.to_string()))
}

/// Mount the kubeconfig secret into every container and append the proxy
pub fn inject_proxy(deployment: &mut Deployment, proxy: &ProxySettings) {
    let pod_spec = deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default);

    pod_spec
        .volumes
        .get_or_insert_with(Default::default)
        .push(Volume {
            name: KUBECONFIG_SECRET_NAME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(KUBECONFIG_SECRET_NAME.to_string()),
                items: Some(vec![KeyToPath {
                    key: KUBECONFIG_SECRET_KEY.to_string(),
                    path: KUBECONFIG_FILE.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });

    let kubeconfig_path = format!("{}/{}", KUBECONFIG_MOUNT_PATH, KUBECONFIG_FILE);
    for container in &mut pod_spec.containers {
        container
            .volume_mounts
            .get_or_insert_with(Default::default)
            .push(VolumeMount {
                name: KUBECONFIG_SECRET_NAME.to_string(),
                mount_path: KUBECONFIG_MOUNT_PATH.to_string(),
                ..Default::default()
            });
        let env = container.env.get_or_insert_with(Default::default);
        env.retain(|e| e.name != KUBECONFIG_ENV);
        env.push(EnvVar {
            name: KUBECONFIG_ENV.to_string(),
            value: Some(kubeconfig_path.clone()),
            ..Default::default()
        });
    }

    pod_spec.containers.push(Container {
        name: PROXY_CONTAINER_NAME.to_string(),
        image: Some(proxy.image.clone()),
        image_pull_policy: Some(proxy.pull_policy.as_k8s().to_string()),
        command: Some(vec!["scorecard-proxy".to_string()]),
        env: Some(vec![EnvVar {
            name: WATCH_NAMESPACE_ENV.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    });
}
