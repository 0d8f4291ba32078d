//! Cluster capability used by the harness
//!
//! Everything the harness needs from the API server goes through
//! [`ClusterApi`], so provisioning and tests can run against a mock or an
//! in-memory cluster in unit tests.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, LogParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use kube::Client;
use tokio::sync::RwLock;
use tracing::{debug, info};

use scorecard_common::kube_utils::{gvk, run_discovery};
use scorecard_common::Error;

/// Identity of a cluster object: apiVersion, kind, namespace and name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// apiVersion, e.g. `apps/v1`
    pub api_version: String,
    /// Kind, e.g. `Deployment`
    pub kind: String,
    /// Namespace; `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object
    pub fn namespaced(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for an object as it appears in a manifest or API response
    pub fn from_object(object: &DynamicObject) -> Result<Self, Error> {
        let types = object
            .types
            .as_ref()
            .ok_or_else(|| Error::parse("object", "missing apiVersion/kind"))?;
        let name = object
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::parse(&types.kind, "missing metadata.name"))?;
        Ok(Self {
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            namespace: object.metadata.namespace.clone(),
            name,
        })
    }

    /// Group/version/kind of the object
    pub fn gvk(&self) -> GroupVersionKind {
        gvk(&self.api_version, &self.kind)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Operations the harness performs against the cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create an object, returning the server's copy
    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Fetch an object; `None` when the server answers not-found
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error>;

    /// Replace an object (full update)
    async fn replace(&self, object: &DynamicObject) -> Result<DynamicObject, Error>;

    /// Delete an object; not-found counts as success
    async fn delete(&self, key: &ObjectKey) -> Result<(), Error>;

    /// List pods in a namespace matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error>;

    /// Full (untailed) logs of one container
    async fn pod_logs(&self, namespace: &str, pod: &str, container: &str)
        -> Result<String, Error>;

    /// Whether the cached discovery data knows this type
    async fn is_served(&self, gvk: &GroupVersionKind) -> bool;

    /// Re-run API discovery, replacing the cached data
    async fn refresh_discovery(&self) -> Result<(), Error>;
}

/// [`ClusterApi`] backed by kube-rs with a cached discovery pass
pub struct KubeCluster {
    client: Client,
    discovery: RwLock<Discovery>,
}

impl KubeCluster {
    /// Wrap a client, running an initial discovery pass
    pub async fn connect(client: Client) -> Result<Self, Error> {
        let discovery = run_discovery(&client).await?;
        info!(
            namespace = %client.default_namespace(),
            "connected to cluster"
        );
        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
        })
    }

    /// Namespace from the active kubeconfig context
    pub fn default_namespace(&self) -> &str {
        self.client.default_namespace()
    }

    async fn resolve(
        &self,
        api_version: &str,
        kind: &str,
    ) -> Result<(ApiResource, ApiCapabilities), Error> {
        self.discovery
            .read()
            .await
            .resolve_gvk(&gvk(api_version, kind))
            .ok_or_else(|| Error::UnknownResourceType {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            })
    }

    async fn dynamic_api(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<(Api<DynamicObject>, Scope), Error> {
        let (ar, caps) = self.resolve(api_version, kind).await?;
        let api = match (&caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), &ar),
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &ar),
        };
        Ok((api, caps.scope))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject, Error> {
        let key = ObjectKey::from_object(object)?;
        let (api, scope) = self
            .dynamic_api(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;

        let mut object = object.clone();
        if matches!(scope, Scope::Cluster) {
            object.metadata.namespace = None;
        }
        debug!(object = %key, "creating");
        Ok(api.create(&PostParams::default(), &object).await?)
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error> {
        let (api, _) = self
            .dynamic_api(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        Ok(api.get_opt(&key.name).await?)
    }

    async fn replace(&self, object: &DynamicObject) -> Result<DynamicObject, Error> {
        let key = ObjectKey::from_object(object)?;
        let (api, _) = self
            .dynamic_api(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        Ok(api.replace(&key.name, &PostParams::default(), object).await?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), Error> {
        let (api, _) = self
            .dynamic_api(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items)
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String, Error> {
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        Ok(self.pods(namespace).logs(pod, &params).await?)
    }

    async fn is_served(&self, gvk: &GroupVersionKind) -> bool {
        self.discovery.read().await.resolve_gvk(gvk).is_some()
    }

    async fn refresh_discovery(&self) -> Result<(), Error> {
        let fresh = Discovery::new(self.client.clone()).run().await?;
        *self.discovery.write().await = fresh;
        Ok(())
    }
}
